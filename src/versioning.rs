//! Project Snapshot Versioning
//!
//! Immutable, content-hashed captures of a project's full artifact set.
//! Think of these as "git commits" for low-code metadata: created freely as
//! drafts, marked published exactly once when their migration has been
//! applied to the target database.

use crate::error::AppError;
use crate::metadata::Artifact;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_postgres::error::SqlState;
use tokio_postgres::Row;
use uuid::Uuid;

/// An immutable capture of all project artifacts at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Version label, unique per project
    pub version: String,
    /// Deterministically serialized artifact set
    #[serde(skip_serializing)]
    pub content: String,
    /// SHA-256 digest over the serialized content, hex-encoded
    pub hash: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub is_published: bool,
}

impl ProjectSnapshot {
    /// Serialize an artifact set deterministically: artifacts sorted by
    /// name, object keys sorted by serde_json. Equal metadata always
    /// produces equal bytes, so the hash is tamper-evident.
    pub fn serialize_artifacts(artifacts: &[Artifact]) -> Result<String, AppError> {
        let mut sorted: Vec<&Artifact> = artifacts.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        serde_json::to_string(&sorted)
            .map_err(|e| AppError::Internal(format!("Failed to serialize artifacts: {}", e)))
    }

    /// Compute the content hash for serialized artifact bytes
    pub fn compute_hash(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Decode the embedded artifact set.
    ///
    /// Corrupt content is fatal for any comparison using this snapshot;
    /// it must never degrade into an empty artifact list.
    pub fn artifacts(&self) -> Result<Vec<Artifact>, AppError> {
        serde_json::from_str(&self.content).map_err(|e| {
            AppError::Deserialization(format!(
                "Corrupt artifact content in snapshot '{}': {}",
                self.version, e
            ))
        })
    }
}

/// Lightweight snapshot info for listings
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub id: Uuid,
    pub project_id: Uuid,
    pub version: String,
    pub hash: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub is_published: bool,
}

impl From<&ProjectSnapshot> for SnapshotMetadata {
    fn from(snapshot: &ProjectSnapshot) -> Self {
        Self {
            id: snapshot.id,
            project_id: snapshot.project_id,
            version: snapshot.version.clone(),
            hash: snapshot.hash.clone(),
            created_at: snapshot.created_at,
            created_by: snapshot.created_by.clone(),
            is_published: snapshot.is_published,
        }
    }
}

const SNAPSHOT_COLUMNS: &str =
    "id, project_id, version, content, hash, created_at, created_by, is_published";

fn row_to_snapshot(row: &Row) -> ProjectSnapshot {
    ProjectSnapshot {
        id: row.get("id"),
        project_id: row.get("project_id"),
        version: row.get("version"),
        content: row.get("content"),
        hash: row.get("hash"),
        created_at: row.get("created_at"),
        created_by: row.get("created_by"),
        is_published: row.get("is_published"),
    }
}

/// Store for versioned project snapshots, backed by PostgreSQL.
///
/// The unique index on `(project_id, version)` is the only concurrency
/// guard: two concurrent captures racing for the same label resolve to one
/// winner and one clean `DuplicateVersion` error.
pub struct SnapshotStore {
    pool: Pool,
}

impl SnapshotStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Capture the given artifact set as a new unpublished snapshot
    pub async fn create(
        &self,
        project_id: Uuid,
        version: &str,
        created_by: &str,
        artifacts: &[Artifact],
    ) -> Result<ProjectSnapshot, AppError> {
        let content = ProjectSnapshot::serialize_artifacts(artifacts)?;
        let hash = ProjectSnapshot::compute_hash(&content);

        let snapshot = ProjectSnapshot {
            id: Uuid::new_v4(),
            project_id,
            version: version.to_string(),
            content,
            hash,
            created_at: Utc::now(),
            created_by: created_by.to_string(),
            is_published: false,
        };

        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO project_snapshots \
                 (id, project_id, version, content, hash, created_at, created_by, is_published) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &snapshot.id,
                    &snapshot.project_id,
                    &snapshot.version,
                    &snapshot.content,
                    &snapshot.hash,
                    &snapshot.created_at,
                    &snapshot.created_by,
                    &snapshot.is_published,
                ],
            )
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    AppError::DuplicateVersion(format!(
                        "Version '{}' already exists for project {}",
                        version, project_id
                    ))
                } else {
                    AppError::Database(e)
                }
            })?;

        tracing::info!(
            "Captured snapshot '{}' for project {} ({} artifacts, hash {})",
            snapshot.version,
            project_id,
            artifacts.len(),
            &snapshot.hash[..12]
        );

        Ok(snapshot)
    }

    /// Get a snapshot by version label
    pub async fn get(&self, project_id: Uuid, version: &str) -> Result<ProjectSnapshot, AppError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM project_snapshots WHERE project_id = $1 AND version = $2",
                    SNAPSHOT_COLUMNS
                ),
                &[&project_id, &version],
            )
            .await?;

        row.map(|r| row_to_snapshot(&r)).ok_or_else(|| {
            AppError::NotFound(format!(
                "Snapshot '{}' not found for project {}",
                version, project_id
            ))
        })
    }

    /// Most recent snapshot by creation time, published or not
    pub async fn get_latest(&self, project_id: Uuid) -> Result<Option<ProjectSnapshot>, AppError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM project_snapshots WHERE project_id = $1 \
                     ORDER BY created_at DESC LIMIT 1",
                    SNAPSHOT_COLUMNS
                ),
                &[&project_id],
            )
            .await?;
        Ok(row.map(|r| row_to_snapshot(&r)))
    }

    /// Most recent published snapshot; the diff baseline for the next
    /// migration
    pub async fn get_last_published(
        &self,
        project_id: Uuid,
    ) -> Result<Option<ProjectSnapshot>, AppError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM project_snapshots \
                     WHERE project_id = $1 AND is_published = true \
                     ORDER BY created_at DESC LIMIT 1",
                    SNAPSHOT_COLUMNS
                ),
                &[&project_id],
            )
            .await?;
        Ok(row.map(|r| row_to_snapshot(&r)))
    }

    /// All published snapshots in chronological order, for history replay
    pub async fn list_published(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<ProjectSnapshot>, AppError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM project_snapshots \
                     WHERE project_id = $1 AND is_published = true \
                     ORDER BY created_at ASC",
                    SNAPSHOT_COLUMNS
                ),
                &[&project_id],
            )
            .await?;
        Ok(rows.iter().map(row_to_snapshot).collect())
    }

    /// List snapshot metadata, newest first
    pub async fn list(&self, project_id: Uuid) -> Result<Vec<SnapshotMetadata>, AppError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM project_snapshots WHERE project_id = $1 \
                     ORDER BY created_at DESC",
                    SNAPSHOT_COLUMNS
                ),
                &[&project_id],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| SnapshotMetadata::from(&row_to_snapshot(r)))
            .collect())
    }

    /// Flip the published flag. Called only after the snapshot's migration
    /// committed on the target database.
    pub async fn mark_published(&self, snapshot_id: Uuid) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE project_snapshots SET is_published = true WHERE id = $1",
                &[&snapshot_id],
            )
            .await?;
        if updated == 0 {
            return Err(AppError::NotFound(format!(
                "Snapshot {} not found",
                snapshot_id
            )));
        }
        tracing::info!("Marked snapshot {} as published", snapshot_id);
        Ok(())
    }
}
