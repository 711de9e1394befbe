//! Metadata Diff Engine
//!
//! The core comparison engine that detects changes between two captures of a
//! project's metadata. Comparison is always keyed by the permanent element
//! id, so a rename is detected as a rename - never as a delete plus an add.

use crate::error::AppError;
use crate::metadata::{Artifact, ArtifactType, EntityMetadata, FieldMetadata, RelationMetadata};
use crate::versioning::ProjectSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// What happened to an element between two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaAction {
    Added,
    Removed,
    Updated,
    Renamed,
}

/// Kind of metadata element a delta describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataKind {
    Entity,
    Field,
    Relation,
    Enum,
}

/// One tracked property change inside a delta
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyChange {
    pub old: Option<Value>,
    pub new: Option<Value>,
    pub is_breaking: bool,
}

impl PropertyChange {
    fn safe(old: Option<Value>, new: Option<Value>) -> Self {
        Self {
            old,
            new,
            is_breaking: false,
        }
    }

    fn breaking(old: Option<Value>, new: Option<Value>) -> Self {
        Self {
            old,
            new,
            is_breaking: true,
        }
    }
}

/// One minimal change unit between two snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationDelta {
    pub kind: MetadataKind,
    pub action: DeltaAction,
    /// Permanent id of the element this delta describes
    pub element_id: Uuid,
    /// Current name of the element
    pub name: String,
    /// Only set for `Renamed` deltas
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_name: Option<String>,
    /// Property name -> change detail
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub changes: BTreeMap<String, PropertyChange>,
    /// Owning entity id, for field and relation deltas
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    /// Current (post-rename) name of the owning entity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
}

/// Summary statistics for a plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub entities_added: usize,
    pub entities_removed: usize,
    pub entities_renamed: usize,
    pub fields_added: usize,
    pub fields_removed: usize,
    pub fields_updated: usize,
    pub fields_renamed: usize,
    pub relations_added: usize,
    pub relations_removed: usize,
    pub total_changes: usize,
}

/// The ordered set of deltas between two snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    pub project_id: Uuid,
    /// Version of the baseline snapshot, `None` for a project's first plan
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_version: Option<String>,
    pub target_version: String,
    pub deltas: Vec<MigrationDelta>,
    pub summary: DiffSummary,
    /// True iff any property change in any delta is breaking
    pub has_breaking_changes: bool,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

/// The engine that compares two metadata captures
pub struct DiffEngine;

impl DiffEngine {
    /// Compare two immutable snapshots by deserializing their embedded
    /// artifact sets.
    pub fn diff_snapshots(
        old: &ProjectSnapshot,
        new: &ProjectSnapshot,
    ) -> Result<MigrationPlan, AppError> {
        let old_artifacts = old.artifacts()?;
        let new_artifacts = new.artifacts()?;
        Self::diff_artifacts(
            new.project_id,
            Some(old.version.clone()),
            &new.version,
            &old_artifacts,
            &new_artifacts,
        )
    }

    /// Compare two raw artifact collections directly. Used to preview a
    /// draft against the live published baseline without persisting first.
    pub fn diff_artifacts(
        project_id: Uuid,
        source_version: Option<String>,
        target_version: &str,
        old: &[Artifact],
        new: &[Artifact],
    ) -> Result<MigrationPlan, AppError> {
        let old_entities = Self::extract_entities(old)?;
        let new_entities = Self::extract_entities(new)?;

        let mut deltas = Vec::new();
        Self::diff_entities(&old_entities, &new_entities, &mut deltas);

        let summary = Self::calculate_summary(&deltas);
        let has_breaking_changes = deltas
            .iter()
            .any(|d| d.changes.values().any(|c| c.is_breaking));

        Ok(MigrationPlan {
            project_id,
            source_version,
            target_version: target_version.to_string(),
            deltas,
            summary,
            has_breaking_changes,
        })
    }

    /// Decode every entity artifact. Corrupt metadata aborts the whole
    /// comparison - a partial diff would silently lose elements.
    fn extract_entities(artifacts: &[Artifact]) -> Result<HashMap<Uuid, EntityMetadata>, AppError> {
        let mut entities = HashMap::new();
        for artifact in artifacts {
            if artifact.artifact_type == ArtifactType::Entity {
                let entity = artifact.entity_metadata()?;
                entities.insert(entity.id, entity);
            }
        }
        Ok(entities)
    }

    fn diff_entities(
        old: &HashMap<Uuid, EntityMetadata>,
        new: &HashMap<Uuid, EntityMetadata>,
        deltas: &mut Vec<MigrationDelta>,
    ) {
        // Added entities, with one field delta per field bundled under the
        // entity addition
        let mut added: Vec<&EntityMetadata> =
            new.values().filter(|e| !old.contains_key(&e.id)).collect();
        added.sort_by(|a, b| a.name.cmp(&b.name));

        for entity in added {
            deltas.push(MigrationDelta {
                kind: MetadataKind::Entity,
                action: DeltaAction::Added,
                element_id: entity.id,
                name: entity.name.clone(),
                previous_name: None,
                changes: BTreeMap::new(),
                parent_id: None,
                parent_name: None,
            });
            for field in &entity.fields {
                deltas.push(Self::field_added_delta(field, entity));
            }
        }

        // Removed entities; their fields disappear with the table, no
        // per-field deltas
        let mut removed: Vec<&EntityMetadata> =
            old.values().filter(|e| !new.contains_key(&e.id)).collect();
        removed.sort_by(|a, b| a.name.cmp(&b.name));

        for entity in removed {
            deltas.push(MigrationDelta {
                kind: MetadataKind::Entity,
                action: DeltaAction::Removed,
                element_id: entity.id,
                name: entity.name.clone(),
                previous_name: None,
                changes: BTreeMap::new(),
                parent_id: None,
                parent_name: None,
            });
        }

        // Entities present in both: same id means same logical element,
        // whatever it is called now
        let mut common: Vec<(&EntityMetadata, &EntityMetadata)> = old
            .values()
            .filter_map(|o| new.get(&o.id).map(|n| (o, n)))
            .collect();
        common.sort_by(|a, b| a.0.name.cmp(&b.0.name));

        for (old_entity, new_entity) in common {
            if old_entity.name != new_entity.name {
                let mut changes = BTreeMap::new();
                changes.insert(
                    "Name".to_string(),
                    // A rename never discards data by itself
                    PropertyChange::safe(
                        Some(json!(old_entity.name)),
                        Some(json!(new_entity.name)),
                    ),
                );
                deltas.push(MigrationDelta {
                    kind: MetadataKind::Entity,
                    action: DeltaAction::Renamed,
                    element_id: new_entity.id,
                    name: new_entity.name.clone(),
                    previous_name: Some(old_entity.name.clone()),
                    changes,
                    parent_id: None,
                    parent_name: None,
                });
            }
            Self::diff_fields(old_entity, new_entity, deltas);
            Self::diff_relations(old_entity, new_entity, deltas);
        }
    }

    fn field_added_delta(field: &FieldMetadata, parent: &EntityMetadata) -> MigrationDelta {
        let mut changes = BTreeMap::new();
        changes.insert(
            "Type".to_string(),
            PropertyChange::safe(None, Some(json!(field.field_type.logical_name()))),
        );
        MigrationDelta {
            kind: MetadataKind::Field,
            action: DeltaAction::Added,
            element_id: field.id,
            name: field.name.clone(),
            previous_name: None,
            changes,
            parent_id: Some(parent.id),
            parent_name: Some(parent.name.clone()),
        }
    }

    fn diff_fields(
        old_entity: &EntityMetadata,
        new_entity: &EntityMetadata,
        deltas: &mut Vec<MigrationDelta>,
    ) {
        let old_fields: HashMap<Uuid, &FieldMetadata> =
            old_entity.fields.iter().map(|f| (f.id, f)).collect();
        let new_fields: HashMap<Uuid, &FieldMetadata> =
            new_entity.fields.iter().map(|f| (f.id, f)).collect();

        // Added fields, in designer order
        for field in &new_entity.fields {
            if !old_fields.contains_key(&field.id) {
                deltas.push(Self::field_added_delta(field, new_entity));
            }
        }

        // Removed fields
        for field in &old_entity.fields {
            if !new_fields.contains_key(&field.id) {
                deltas.push(MigrationDelta {
                    kind: MetadataKind::Field,
                    action: DeltaAction::Removed,
                    element_id: field.id,
                    name: field.name.clone(),
                    previous_name: None,
                    changes: BTreeMap::new(),
                    parent_id: Some(new_entity.id),
                    parent_name: Some(new_entity.name.clone()),
                });
            }
        }

        // Fields present in both
        for old_field in &old_entity.fields {
            let Some(new_field) = new_fields.get(&old_field.id) else {
                continue;
            };
            if let Some(delta) = Self::compare_fields(old_field, new_field, new_entity) {
                deltas.push(delta);
            }
        }
    }

    fn compare_fields(
        old: &FieldMetadata,
        new: &FieldMetadata,
        parent: &EntityMetadata,
    ) -> Option<MigrationDelta> {
        let mut changes = BTreeMap::new();
        let renamed = old.name != new.name;

        if renamed {
            changes.insert(
                "Name".to_string(),
                PropertyChange::safe(Some(json!(old.name)), Some(json!(new.name))),
            );
        }

        if old.field_type != new.field_type {
            let change = if old.field_type.is_safe_widening(&new.field_type) {
                PropertyChange::safe(
                    Some(json!(old.field_type.logical_name())),
                    Some(json!(new.field_type.logical_name())),
                )
            } else {
                PropertyChange::breaking(
                    Some(json!(old.field_type.logical_name())),
                    Some(json!(new.field_type.logical_name())),
                )
            };
            changes.insert("Type".to_string(), change);
        }

        if old.is_required != new.is_required {
            // Tightening to required can reject nulls already stored
            let change = if new.is_required {
                PropertyChange::breaking(Some(json!(false)), Some(json!(true)))
            } else {
                PropertyChange::safe(Some(json!(true)), Some(json!(false)))
            };
            changes.insert("IsRequired".to_string(), change);
        }

        if changes.is_empty() {
            return None;
        }

        Some(MigrationDelta {
            kind: MetadataKind::Field,
            action: if renamed {
                DeltaAction::Renamed
            } else {
                DeltaAction::Updated
            },
            element_id: new.id,
            name: new.name.clone(),
            previous_name: renamed.then(|| old.name.clone()),
            changes,
            parent_id: Some(parent.id),
            parent_name: Some(parent.name.clone()),
        })
    }

    /// Relations have no id of their own; they are keyed by navigation
    /// property within the owning entity and only ever added or removed.
    /// The join tables they imply are materialized by a separate
    /// normalization step, so relation deltas produce no DDL.
    fn diff_relations(
        old_entity: &EntityMetadata,
        new_entity: &EntityMetadata,
        deltas: &mut Vec<MigrationDelta>,
    ) {
        let old_rels: HashMap<&str, &RelationMetadata> = old_entity
            .relations
            .iter()
            .map(|r| (r.navigation_property.as_str(), r))
            .collect();
        let new_rels: HashMap<&str, &RelationMetadata> = new_entity
            .relations
            .iter()
            .map(|r| (r.navigation_property.as_str(), r))
            .collect();

        for relation in &new_entity.relations {
            if !old_rels.contains_key(relation.navigation_property.as_str()) {
                let mut changes = BTreeMap::new();
                changes.insert(
                    "TargetEntity".to_string(),
                    PropertyChange::safe(None, Some(json!(relation.target_entity))),
                );
                deltas.push(MigrationDelta {
                    kind: MetadataKind::Relation,
                    action: DeltaAction::Added,
                    element_id: new_entity.id,
                    name: relation.navigation_property.clone(),
                    previous_name: None,
                    changes,
                    parent_id: Some(new_entity.id),
                    parent_name: Some(new_entity.name.clone()),
                });
            }
        }

        for relation in &old_entity.relations {
            if !new_rels.contains_key(relation.navigation_property.as_str()) {
                deltas.push(MigrationDelta {
                    kind: MetadataKind::Relation,
                    action: DeltaAction::Removed,
                    element_id: new_entity.id,
                    name: relation.navigation_property.clone(),
                    previous_name: None,
                    changes: BTreeMap::new(),
                    parent_id: Some(new_entity.id),
                    parent_name: Some(new_entity.name.clone()),
                });
            }
        }
    }

    fn calculate_summary(deltas: &[MigrationDelta]) -> DiffSummary {
        let mut summary = DiffSummary {
            total_changes: deltas.len(),
            ..DiffSummary::default()
        };

        for delta in deltas {
            match (delta.kind, delta.action) {
                (MetadataKind::Entity, DeltaAction::Added) => summary.entities_added += 1,
                (MetadataKind::Entity, DeltaAction::Removed) => summary.entities_removed += 1,
                (MetadataKind::Entity, DeltaAction::Renamed) => summary.entities_renamed += 1,
                (MetadataKind::Field, DeltaAction::Added) => summary.fields_added += 1,
                (MetadataKind::Field, DeltaAction::Removed) => summary.fields_removed += 1,
                (MetadataKind::Field, DeltaAction::Updated) => summary.fields_updated += 1,
                (MetadataKind::Field, DeltaAction::Renamed) => summary.fields_renamed += 1,
                (MetadataKind::Relation, DeltaAction::Added) => summary.relations_added += 1,
                (MetadataKind::Relation, DeltaAction::Removed) => summary.relations_removed += 1,
                _ => {}
            }
        }

        summary
    }
}
