//! Snapshot route handlers
//!
//! Capture, list, and inspect the immutable versioned snapshots of a
//! project's metadata.

use crate::error::{ApiResult, AppError};
use crate::metadata::Artifact;
use crate::routes::SuccessResponse;
use crate::state::SharedState;
use crate::versioning::SnapshotMetadata;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct CreateSnapshotQuery {
    pub version: String,
    #[serde(rename = "createdBy")]
    pub created_by: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDetail {
    #[serde(flatten)]
    pub snapshot: SnapshotMetadata,
    pub artifacts: Vec<Artifact>,
}

/// Capture the project's current artifacts as a new unpublished snapshot
pub async fn create_snapshot(
    State(state): State<SharedState>,
    Path(project_id): Path<Uuid>,
    Query(params): Query<CreateSnapshotQuery>,
) -> ApiResult<Json<SuccessResponse<SnapshotMetadata>>> {
    let version = params.version.trim();
    if version.is_empty() {
        return Err(AppError::Validation("Version label is required".to_string()));
    }

    // Surfaces a 404 before anything is written
    state.artifacts.get_project(project_id).await?;

    let artifacts = state.artifacts.list_artifacts(project_id).await?;
    debug!(
        "Capturing snapshot '{}' with {} artifacts",
        version,
        artifacts.len()
    );

    let created_by = params.created_by.as_deref().unwrap_or("designer");
    let snapshot = state
        .snapshots
        .create(project_id, version, created_by, &artifacts)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Snapshot '{}' captured successfully.", version),
        SnapshotMetadata::from(&snapshot),
    )))
}

/// List all snapshots of a project, newest first
pub async fn list_snapshots(
    State(state): State<SharedState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Vec<SnapshotMetadata>>>> {
    let snapshots = state.snapshots.list(project_id).await?;
    info!("Listed {} snapshots for project {}", snapshots.len(), project_id);

    Ok(Json(SuccessResponse::with_data(
        "Snapshots fetched successfully.",
        snapshots,
    )))
}

/// Fetch one live artifact by id
pub async fn get_artifact(
    State(state): State<SharedState>,
    Path(artifact_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Artifact>>> {
    let artifact = state.artifacts.get_artifact(artifact_id).await?;

    Ok(Json(SuccessResponse::with_data(
        "Artifact fetched successfully.",
        artifact,
    )))
}

/// Most recent snapshot by creation time, published or not
pub async fn get_latest_snapshot(
    State(state): State<SharedState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<SnapshotMetadata>>> {
    let snapshot = state
        .snapshots
        .get_latest(project_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("Project {} has no snapshots", project_id))
        })?;

    Ok(Json(SuccessResponse::with_data(
        "Snapshot fetched successfully.",
        SnapshotMetadata::from(&snapshot),
    )))
}

/// Fetch one snapshot by version label, including its artifact set
pub async fn get_snapshot(
    State(state): State<SharedState>,
    Path((project_id, version)): Path<(Uuid, String)>,
) -> ApiResult<Json<SuccessResponse<SnapshotDetail>>> {
    let snapshot = state.snapshots.get(project_id, &version).await?;
    let artifacts = snapshot.artifacts()?;

    Ok(Json(SuccessResponse::with_data(
        "Snapshot fetched successfully.",
        SnapshotDetail {
            snapshot: SnapshotMetadata::from(&snapshot),
            artifacts,
        },
    )))
}
