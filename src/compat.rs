//! Compatibility Provider
//!
//! Lets callers who still use pre-rename names keep working after a schema
//! has evolved. The provider replays every published snapshot of a project
//! in chronological order and builds a reverse index from any historical
//! name to the current physical name, and back.
//!
//! Histories are cached per project and invalidated explicitly when a new
//! snapshot is published, so a warmed cache never hides a later rename.

use crate::error::AppError;
use crate::metadata::{ArtifactType, EntityMetadata};
use crate::versioning::{ProjectSnapshot, SnapshotStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Which namespace a legacy name belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameKind {
    Entity,
    Field,
}

/// The replayed naming history of one project.
///
/// All lookups are pure and infallible: unknown names resolve to
/// themselves, so a caller using a first-ever name (or an unknown project)
/// is never rejected.
#[derive(Debug, Default, Clone)]
pub struct ProjectHistory {
    /// Entity id -> most recent name
    entity_current: HashMap<Uuid, String>,
    /// Any historical entity name -> id
    entity_by_name: HashMap<String, Uuid>,
    /// Field id -> most recent name
    field_current: HashMap<Uuid, String>,
    /// (historical parent name, historical field name) -> field id
    field_by_key: HashMap<(String, String), Uuid>,
    /// Field id -> most recent prior name, for fields renamed at least once
    field_prior: HashMap<Uuid, String>,
    /// Entity id -> its field ids as of the latest snapshot
    fields_of: HashMap<Uuid, Vec<Uuid>>,
}

impl ProjectHistory {
    /// Replay published snapshots in the order given (chronological).
    pub fn from_snapshots(snapshots: &[ProjectSnapshot]) -> Result<Self, AppError> {
        let mut history = Self::default();
        for snapshot in snapshots {
            for artifact in snapshot.artifacts()? {
                if artifact.artifact_type == ArtifactType::Entity {
                    history.absorb(&artifact.entity_metadata()?);
                }
            }
        }
        Ok(history)
    }

    fn absorb(&mut self, entity: &EntityMetadata) {
        self.entity_by_name.insert(entity.name.clone(), entity.id);
        self.entity_current.insert(entity.id, entity.name.clone());

        let mut field_ids = Vec::with_capacity(entity.fields.len());
        for field in &entity.fields {
            if let Some(previous) = self.field_current.get(&field.id) {
                if previous != &field.name {
                    self.field_prior.insert(field.id, previous.clone());
                }
            }
            self.field_by_key
                .insert((entity.name.clone(), field.name.clone()), field.id);
            self.field_current.insert(field.id, field.name.clone());
            field_ids.push(field.id);
        }
        self.fields_of.insert(entity.id, field_ids);
    }

    /// Current name for a possibly historical entity name
    pub fn resolve_entity(&self, name: &str) -> String {
        self.entity_by_name
            .get(name)
            .and_then(|id| self.entity_current.get(id))
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Current name for a possibly historical field name.
    ///
    /// Prefers an exact `(parent, name)` match; when the caller does not
    /// reliably know the historical parent name, falls back to any
    /// historically known field with that name under any parent.
    pub fn resolve_field(&self, parent: Option<&str>, name: &str) -> String {
        let exact = parent
            .and_then(|p| self.field_by_key.get(&(p.to_string(), name.to_string())));

        let id = exact.or_else(|| {
            self.field_by_key
                .iter()
                .filter(|((_, field_name), _)| field_name == name)
                .min_by_key(|((parent_name, _), _)| parent_name.clone())
                .map(|(_, id)| id)
        });

        id.and_then(|id| self.field_current.get(id))
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// For every field of the entity that was ever renamed, map its current
    /// name to its most recent prior name. Supports output virtualization.
    pub fn result_mappings(&self, entity_name: &str) -> HashMap<String, String> {
        let Some(entity_id) = self.entity_by_name.get(entity_name) else {
            return HashMap::new();
        };
        let Some(field_ids) = self.fields_of.get(entity_id) else {
            return HashMap::new();
        };

        field_ids
            .iter()
            .filter_map(|id| {
                let prior = self.field_prior.get(id)?;
                let current = self.field_current.get(id)?;
                Some((current.clone(), prior.clone()))
            })
            .collect()
    }
}

/// Caching facade over published-history replay
pub struct CompatibilityProvider {
    cache: RwLock<HashMap<Uuid, Arc<ProjectHistory>>>,
}

impl CompatibilityProvider {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Lazily build (or reuse) the replayed history for a project
    pub async fn history(
        &self,
        snapshots: &SnapshotStore,
        project_id: Uuid,
    ) -> Result<Arc<ProjectHistory>, AppError> {
        {
            let cache = self.cache.read().await;
            if let Some(history) = cache.get(&project_id) {
                return Ok(history.clone());
            }
        }

        let published = snapshots.list_published(project_id).await?;
        let history = Arc::new(ProjectHistory::from_snapshots(&published)?);

        let mut cache = self.cache.write().await;
        let entry = cache.entry(project_id).or_insert_with(|| history.clone());
        Ok(entry.clone())
    }

    /// Drop the cached history for a project. Called after every publish so
    /// the next lookup sees the new snapshot.
    pub async fn invalidate(&self, project_id: Uuid) {
        let mut cache = self.cache.write().await;
        if cache.remove(&project_id).is_some() {
            tracing::debug!("Invalidated compatibility history for project {}", project_id);
        }
    }

    /// Resolve a possibly stale name to the current physical name.
    /// Unknown names come back unchanged.
    pub async fn resolve_current_name(
        &self,
        snapshots: &SnapshotStore,
        project_id: Uuid,
        legacy_name: &str,
        kind: NameKind,
        parent_name: Option<&str>,
    ) -> Result<String, AppError> {
        let history = self.history(snapshots, project_id).await?;
        Ok(match kind {
            NameKind::Entity => history.resolve_entity(legacy_name),
            NameKind::Field => history.resolve_field(parent_name, legacy_name),
        })
    }

    /// Current field name -> most recent prior name for one entity
    pub async fn result_mappings(
        &self,
        snapshots: &SnapshotStore,
        project_id: Uuid,
        entity_name: &str,
    ) -> Result<HashMap<String, String>, AppError> {
        let history = self.history(snapshots, project_id).await?;
        Ok(history.result_mappings(entity_name))
    }
}

impl Default for CompatibilityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::test_support::*;
    use crate::metadata::{EntityMetadata, FieldType};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn snapshot(project: Uuid, version: &str, entities: &[EntityMetadata]) -> ProjectSnapshot {
        let artifacts: Vec<_> = entities
            .iter()
            .map(|e| entity_artifact(project, e))
            .collect();
        let content = ProjectSnapshot::serialize_artifacts(&artifacts).unwrap();
        ProjectSnapshot {
            id: Uuid::new_v4(),
            project_id: project,
            version: version.to_string(),
            hash: ProjectSnapshot::compute_hash(&content),
            content,
            created_at: Utc::now(),
            created_by: "tests".to_string(),
            is_published: true,
        }
    }

    #[test]
    fn field_rename_resolves_to_current_name() {
        let project = Uuid::new_v4();
        let entity_id = Uuid::new_v4();
        let fee_id = Uuid::new_v4();

        let v1 = entity(
            entity_id,
            "Doctor",
            vec![field(fee_id, "ConsultationFee", FieldType::Decimal, false)],
        );
        let v2 = entity(
            entity_id,
            "Doctor",
            vec![field(fee_id, "BookingFee", FieldType::Decimal, false)],
        );

        let history = ProjectHistory::from_snapshots(&[
            snapshot(project, "v1", &[v1]),
            snapshot(project, "v2", &[v2]),
        ])
        .unwrap();

        assert_eq!(
            history.resolve_field(Some("Doctor"), "ConsultationFee"),
            "BookingFee"
        );
        // Current names resolve to themselves
        assert_eq!(
            history.resolve_field(Some("Doctor"), "BookingFee"),
            "BookingFee"
        );
    }

    #[test]
    fn unknown_names_pass_through_unchanged() {
        let history = ProjectHistory::default();
        assert_eq!(history.resolve_entity("Ghost"), "Ghost");
        assert_eq!(history.resolve_field(Some("Ghost"), "Nothing"), "Nothing");
    }

    #[test]
    fn entity_rename_resolves_and_survives_field_lookup() {
        let project = Uuid::new_v4();
        let entity_id = Uuid::new_v4();
        let name_id = Uuid::new_v4();

        let v1 = entity(
            entity_id,
            "Doctor",
            vec![field(name_id, "FullName", FieldType::String, true)],
        );
        let v2 = entity(
            entity_id,
            "Physician",
            vec![field(name_id, "FullName", FieldType::String, true)],
        );

        let history = ProjectHistory::from_snapshots(&[
            snapshot(project, "v1", &[v1]),
            snapshot(project, "v2", &[v2]),
        ])
        .unwrap();

        assert_eq!(history.resolve_entity("Doctor"), "Physician");
        // Legacy parent name still keys the field history
        assert_eq!(
            history.resolve_field(Some("Doctor"), "FullName"),
            "FullName"
        );
    }

    #[test]
    fn field_lookup_falls_back_across_parents() {
        let project = Uuid::new_v4();
        let entity_id = Uuid::new_v4();
        let fee_id = Uuid::new_v4();

        // v1: Doctor.ConsultationFee; v2: field renamed; v3: entity renamed.
        // A caller asking with the new entity name and the old field name has
        // a (parent, name) pair that never coexisted.
        let v1 = entity(
            entity_id,
            "Doctor",
            vec![field(fee_id, "ConsultationFee", FieldType::Decimal, false)],
        );
        let v2 = entity(
            entity_id,
            "Doctor",
            vec![field(fee_id, "BookingFee", FieldType::Decimal, false)],
        );
        let v3 = entity(
            entity_id,
            "Physician",
            vec![field(fee_id, "BookingFee", FieldType::Decimal, false)],
        );

        let history = ProjectHistory::from_snapshots(&[
            snapshot(project, "v1", &[v1]),
            snapshot(project, "v2", &[v2]),
            snapshot(project, "v3", &[v3]),
        ])
        .unwrap();

        assert_eq!(
            history.resolve_field(Some("Physician"), "ConsultationFee"),
            "BookingFee"
        );
    }

    #[test]
    fn result_mappings_cover_renamed_fields_only() {
        let project = Uuid::new_v4();
        let entity_id = Uuid::new_v4();
        let fee_id = Uuid::new_v4();
        let name_id = Uuid::new_v4();

        let v1 = entity(
            entity_id,
            "Doctor",
            vec![
                field(name_id, "FullName", FieldType::String, true),
                field(fee_id, "ConsultationFee", FieldType::Decimal, false),
            ],
        );
        let v2 = entity(
            entity_id,
            "Doctor",
            vec![
                field(name_id, "FullName", FieldType::String, true),
                field(fee_id, "BookingFee", FieldType::Decimal, false),
            ],
        );

        let history = ProjectHistory::from_snapshots(&[
            snapshot(project, "v1", &[v1]),
            snapshot(project, "v2", &[v2]),
        ])
        .unwrap();

        let mappings = history.result_mappings("Doctor");
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings["BookingFee"], "ConsultationFee");
    }

    #[test]
    fn twice_renamed_field_maps_to_most_recent_prior() {
        let project = Uuid::new_v4();
        let entity_id = Uuid::new_v4();
        let fee_id = Uuid::new_v4();

        let v1 = entity(
            entity_id,
            "Doctor",
            vec![field(fee_id, "Fee", FieldType::Decimal, false)],
        );
        let v2 = entity(
            entity_id,
            "Doctor",
            vec![field(fee_id, "ConsultationFee", FieldType::Decimal, false)],
        );
        let v3 = entity(
            entity_id,
            "Doctor",
            vec![field(fee_id, "BookingFee", FieldType::Decimal, false)],
        );

        let history = ProjectHistory::from_snapshots(&[
            snapshot(project, "v1", &[v1]),
            snapshot(project, "v2", &[v2]),
            snapshot(project, "v3", &[v3]),
        ])
        .unwrap();

        // Oldest name still resolves all the way forward
        assert_eq!(history.resolve_field(Some("Doctor"), "Fee"), "BookingFee");
        // But virtualization only surfaces the most recent prior name
        let mappings = history.result_mappings("Doctor");
        assert_eq!(mappings["BookingFee"], "ConsultationFee");
    }
}
