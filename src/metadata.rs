//! Project Metadata Model
//!
//! The designer-facing metadata types: entities, fields, relations, and the
//! artifact container that holds them. Every entity and field carries a
//! permanent `Uuid` assigned at creation. The id never changes, even across
//! renames - all diffing is keyed by id, never by name.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Logical field type as the designer sees it.
///
/// The built-in scalar types map to SQL types during schema evolution;
/// anything else is the name of another entity or enum in the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Guid,
    Datetime,
    Decimal,
    Bool,
    /// Reference to another entity or enum by name
    #[serde(untagged)]
    Named(String),
}

impl FieldType {
    /// Logical type name as it appears in metadata and deltas
    pub fn logical_name(&self) -> &str {
        match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Guid => "guid",
            FieldType::Datetime => "datetime",
            FieldType::Decimal => "decimal",
            FieldType::Bool => "bool",
            FieldType::Named(name) => name,
        }
    }

    /// Whether changing a field from `self` to `to` preserves stored data.
    ///
    /// Only the widenings listed here are safe; every other type change is
    /// treated as breaking because existing values may fail the cast.
    pub fn is_safe_widening(&self, to: &FieldType) -> bool {
        matches!(
            (self, to),
            (FieldType::Int, FieldType::Decimal)
                | (FieldType::Int, FieldType::String)
                | (FieldType::Decimal, FieldType::String)
        )
    }
}

/// A single field of an entity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMetadata {
    /// Permanent identity, assigned once at creation
    pub id: Uuid,
    /// Display name, mutable
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub is_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_rules: Vec<String>,
}

/// Relation cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    OneToMany,
    ManyToOne,
    ManyToMany,
}

/// A relation from one entity to another, referenced by name.
///
/// Many-to-many join tables are materialized as intermediate entities by a
/// separate normalization step before the diff engine ever sees them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationMetadata {
    pub target_entity: String,
    pub kind: RelationKind,
    pub navigation_property: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_table: Option<String>,
}

/// An entity definition as edited in the designer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMetadata {
    /// Permanent identity, assigned once at creation
    pub id: Uuid,
    /// Display name, mutable; unique within a project at any instant
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub fields: Vec<FieldMetadata>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<RelationMetadata>,
    #[serde(default)]
    pub emit_create_event: bool,
    #[serde(default)]
    pub emit_update_event: bool,
    #[serde(default)]
    pub emit_delete_event: bool,
}

/// Kind of metadata an artifact holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Entity = 1,
    Page = 2,
    Workflow = 3,
    Query = 4,
    Menu = 5,
    Theme = 6,
    Api = 7,
    Job = 8,
    Enum = 9,
    Form = 10,
    Widget = 11,
}

impl ArtifactType {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            1 => Some(ArtifactType::Entity),
            2 => Some(ArtifactType::Page),
            3 => Some(ArtifactType::Workflow),
            4 => Some(ArtifactType::Query),
            5 => Some(ArtifactType::Menu),
            6 => Some(ArtifactType::Theme),
            7 => Some(ArtifactType::Api),
            8 => Some(ArtifactType::Job),
            9 => Some(ArtifactType::Enum),
            10 => Some(ArtifactType::Form),
            11 => Some(ArtifactType::Widget),
            _ => None,
        }
    }
}

/// The live, editable, named unit of project metadata.
///
/// Holds the JSON-serialized metadata of exactly one entity, page, workflow,
/// etc. The set of a project's current artifacts is its editable state;
/// snapshots freeze that set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Unique within a project at any instant
    pub name: String,
    pub artifact_type: ArtifactType,
    pub content: serde_json::Value,
}

impl Artifact {
    /// Decode the entity metadata this artifact holds.
    ///
    /// Corrupt content is a fatal input error for the caller, never silently
    /// dropped into an empty result.
    pub fn entity_metadata(&self) -> Result<EntityMetadata, AppError> {
        if self.artifact_type != ArtifactType::Entity {
            return Err(AppError::Validation(format!(
                "Artifact '{}' is not an entity artifact",
                self.name
            )));
        }
        serde_json::from_value(self.content.clone()).map_err(|e| {
            AppError::Deserialization(format!(
                "Corrupt entity metadata in artifact '{}': {}",
                self.name, e
            ))
        })
    }
}

/// A low-code project as registered in the metadata store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    /// Connection string of the generated application's database,
    /// the target of schema evolution
    #[serde(skip_serializing)]
    pub connection_string: String,
}
