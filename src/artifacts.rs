//! Artifact Store
//!
//! Access to the live, editable project metadata maintained by the visual
//! designer. This service only reads artifacts - mutation belongs to the
//! designer's own CRUD layer - so the surface here is deliberately narrow:
//! list a project's artifacts, fetch one, fetch the project record.

use crate::error::AppError;
use crate::metadata::{Artifact, ArtifactType, Project};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

fn row_to_artifact(row: &Row) -> Result<Artifact, AppError> {
    let type_code: i16 = row.get("artifact_type");
    let artifact_type = ArtifactType::from_i16(type_code).ok_or_else(|| {
        AppError::Deserialization(format!("Unknown artifact type code {}", type_code))
    })?;
    let content: String = row.get("content");
    let content = serde_json::from_str(&content).map_err(|e| {
        AppError::Deserialization(format!(
            "Corrupt artifact content for '{}': {}",
            row.get::<_, String>("name"),
            e
        ))
    })?;

    Ok(Artifact {
        id: row.get("id"),
        project_id: row.get("project_id"),
        name: row.get("name"),
        artifact_type,
        content,
    })
}

/// Read-only store over the designer's artifact tables
pub struct PgArtifactStore {
    pool: Pool,
}

impl PgArtifactStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// All current artifacts of a project, ordered by name
    pub async fn list_artifacts(&self, project_id: Uuid) -> Result<Vec<Artifact>, AppError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, project_id, name, artifact_type, content \
                 FROM artifacts WHERE project_id = $1 ORDER BY name",
                &[&project_id],
            )
            .await?;
        rows.iter().map(row_to_artifact).collect()
    }

    pub async fn get_artifact(&self, artifact_id: Uuid) -> Result<Artifact, AppError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, project_id, name, artifact_type, content \
                 FROM artifacts WHERE id = $1",
                &[&artifact_id],
            )
            .await?;
        match row {
            Some(row) => row_to_artifact(&row),
            None => Err(AppError::NotFound(format!(
                "Artifact {} not found",
                artifact_id
            ))),
        }
    }

    pub async fn get_project(&self, project_id: Uuid) -> Result<Project, AppError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, name, connection_string FROM projects WHERE id = $1",
                &[&project_id],
            )
            .await?;
        row.map(|r| Project {
            id: r.get("id"),
            name: r.get("name"),
            connection_string: r.get("connection_string"),
        })
        .ok_or_else(|| AppError::NotFound(format!("Project {} not found", project_id)))
    }
}
