//! Migration route handlers
//!
//! Planning computes the identity-based delta between the last published
//! snapshot and the live artifacts. Applying captures a new snapshot,
//! evolves the project's target database transactionally, and publishes
//! the snapshot only after the DDL commits.

use crate::db::target_pool;
use crate::diff::{DiffEngine, MigrationPlan};
use crate::error::{ApiResult, AppError};
use crate::evolution::{DryRunReport, SchemaEvolution};
use crate::metadata::Artifact;
use crate::routes::SuccessResponse;
use crate::state::SharedState;
use crate::versioning::ProjectSnapshot;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct PlanQuery {
    /// Label the plan targets; purely descriptive until apply
    pub version: Option<String>,
}

#[derive(Deserialize)]
pub struct ApplyQuery {
    pub version: String,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    pub plan: MigrationPlan,
    pub statements: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResponse {
    pub plan: MigrationPlan,
    pub executed_statements: Vec<String>,
    pub published: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunResponse {
    pub plan: MigrationPlan,
    pub report: DryRunReport,
}

/// Diff a live artifact set against a published baseline.
///
/// A project with no published snapshot diffs against an empty baseline,
/// so every entity plans as added.
fn plan_between(
    project_id: Uuid,
    baseline: Option<&ProjectSnapshot>,
    live: &[Artifact],
    target_version: &str,
) -> Result<MigrationPlan, AppError> {
    let (source_version, old_artifacts) = match baseline {
        Some(snapshot) => (Some(snapshot.version.clone()), snapshot.artifacts()?),
        None => (None, Vec::new()),
    };

    DiffEngine::diff_artifacts(project_id, source_version, target_version, &old_artifacts, live)
}

/// Read the live artifacts once and plan against the last published
/// baseline. The returned artifact set is the exact set the plan describes;
/// apply must snapshot that set, not a fresh read, so the published
/// snapshot always matches the DDL that was executed.
async fn build_plan(
    state: &SharedState,
    project_id: Uuid,
    target_version: &str,
) -> Result<(MigrationPlan, Vec<Artifact>), AppError> {
    let live = state.artifacts.list_artifacts(project_id).await?;
    let baseline = state.snapshots.get_last_published(project_id).await?;
    let plan = plan_between(project_id, baseline.as_ref(), &live, target_version)?;
    Ok((plan, live))
}

/// Compute the migration plan and its DDL without executing anything
pub async fn plan_migration(
    State(state): State<SharedState>,
    Path(project_id): Path<Uuid>,
    Query(params): Query<PlanQuery>,
) -> ApiResult<Json<SuccessResponse<PlanResponse>>> {
    state.artifacts.get_project(project_id).await?;

    let target_version = params.version.as_deref().unwrap_or("draft");
    let (plan, _) = build_plan(&state, project_id, target_version).await?;
    let statements = SchemaEvolution::generate_statements(&plan);

    info!(
        "Planned migration for project {}: {} deltas, {} statements, breaking: {}",
        project_id,
        plan.deltas.len(),
        statements.len(),
        plan.has_breaking_changes
    );

    Ok(Json(SuccessResponse::with_data(
        "Migration plan computed successfully.",
        PlanResponse { plan, statements },
    )))
}

/// Apply (or dry-run) the pending migration against the project's target
/// database.
///
/// Dry runs execute the full DDL inside a transaction that always rolls
/// back; nothing is captured or published. A real apply captures the
/// snapshot first, and publishes it only after the transaction commits.
pub async fn apply_migration(
    State(state): State<SharedState>,
    Path(project_id): Path<Uuid>,
    Query(params): Query<ApplyQuery>,
) -> ApiResult<Response> {
    let version = params.version.trim();
    if version.is_empty() {
        return Err(AppError::Validation("Version label is required".to_string()));
    }

    let project = state.artifacts.get_project(project_id).await?;
    let (plan, live) = build_plan(&state, project_id, version).await?;
    let pool = target_pool(&project.connection_string)?;

    if params.dry_run {
        let report = SchemaEvolution::dry_run(&pool, &plan).await?;
        let message = if report.success {
            "Dry run succeeded; no changes were made."
        } else {
            "Dry run failed; no changes were made."
        };
        return Ok(Json(SuccessResponse::with_data(
            message,
            DryRunResponse { plan, report },
        ))
        .into_response());
    }

    // Snapshot the same artifact set the plan was computed from; a second
    // read could see a designer edit made after the diff
    let snapshot = state
        .snapshots
        .create(project_id, version, "designer", &live)
        .await?;

    match SchemaEvolution::apply(&pool, &plan).await {
        Ok(executed_statements) => {
            state.snapshots.mark_published(snapshot.id).await?;
            state.compat.invalidate(project_id).await;

            info!(
                "Published version '{}' for project {} ({} statements executed)",
                version,
                project_id,
                executed_statements.len()
            );

            Ok(Json(SuccessResponse::with_data(
                format!("Version '{}' applied and published successfully.", version),
                ApplyResponse {
                    plan,
                    executed_statements,
                    published: true,
                },
            ))
            .into_response())
        }
        Err(e) => {
            // The transaction rolled back; the captured snapshot stays
            // unpublished so the plan can be retried under a new label.
            warn!(
                "Migration for project {} version '{}' failed: {}",
                project_id, version, e
            );

            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "message": format!("Migration failed; version '{}' was not published", version),
                    "error": e.to_string(),
                    "code": "MIGRATION_FAILED",
                    "plan": plan,
                })),
            )
                .into_response())
        }
    }
}
