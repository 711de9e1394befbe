//! Compatibility route handlers
//!
//! Expose the published-history name resolution to generated clients:
//! rewrite stale-named queries, resolve single names, and report which
//! legacy aliases an entity's results should carry.

use crate::compat::NameKind;
use crate::error::ApiResult;
use crate::normalize::{MetadataNormalizer, QueryMetadata};
use crate::routes::SuccessResponse;
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveQuery {
    pub name: String,
    pub kind: NameKind,
    pub parent: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedName {
    pub requested: String,
    pub current: String,
}

/// Rewrite every name in a query description to its current physical name
pub async fn normalize_query(
    State(state): State<SharedState>,
    Path(project_id): Path<Uuid>,
    Json(mut query): Json<QueryMetadata>,
) -> ApiResult<Json<SuccessResponse<QueryMetadata>>> {
    let history = state.compat.history(&state.snapshots, project_id).await?;

    let requested_entity = query.entity.clone();
    MetadataNormalizer::normalize(&history, &mut query);
    debug!(
        "Normalized query against project {}: '{}' -> '{}'",
        project_id, requested_entity, query.entity
    );

    Ok(Json(SuccessResponse::with_data(
        "Query normalized successfully.",
        query,
    )))
}

/// Resolve one possibly stale name to its current physical name
pub async fn resolve_name(
    State(state): State<SharedState>,
    Path(project_id): Path<Uuid>,
    Query(params): Query<ResolveQuery>,
) -> ApiResult<Json<SuccessResponse<ResolvedName>>> {
    let current = state
        .compat
        .resolve_current_name(
            &state.snapshots,
            project_id,
            &params.name,
            params.kind,
            params.parent.as_deref(),
        )
        .await?;

    Ok(Json(SuccessResponse::with_data(
        "Name resolved successfully.",
        ResolvedName {
            requested: params.name,
            current,
        },
    )))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualizeRequest {
    pub entity: String,
    pub rows: Vec<Map<String, Value>>,
}

/// Inject legacy-named aliases into result rows for clients generated
/// against an older version
pub async fn virtualize_results(
    State(state): State<SharedState>,
    Path(project_id): Path<Uuid>,
    Json(mut payload): Json<VirtualizeRequest>,
) -> ApiResult<Json<SuccessResponse<Vec<Map<String, Value>>>>> {
    let history = state.compat.history(&state.snapshots, project_id).await?;
    MetadataNormalizer::virtualize_result(&history, &payload.entity, &mut payload.rows);

    Ok(Json(SuccessResponse::with_data(
        "Result rows virtualized successfully.",
        payload.rows,
    )))
}

/// Current field name -> most recent prior name, for every renamed field
/// of the entity. Clients use this to alias result columns.
pub async fn result_mappings(
    State(state): State<SharedState>,
    Path((project_id, entity)): Path<(Uuid, String)>,
) -> ApiResult<Json<SuccessResponse<HashMap<String, String>>>> {
    let mappings = state
        .compat
        .result_mappings(&state.snapshots, project_id, &entity)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        "Result mappings fetched successfully.",
        mappings,
    )))
}
