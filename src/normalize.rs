//! Metadata Normalization
//!
//! Applies the compatibility history transparently around query execution:
//! an incoming query description built with possibly-stale names is
//! rewritten to current names before execution, and legacy-named aliases
//! are injected back into result rows afterward.

use crate::compat::ProjectHistory;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How conditions in a filter group combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterLogic {
    And,
    Or,
}

/// One field comparison inside a filter group
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCondition {
    pub field: String,
    pub operator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Set when the condition compares against a subquery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subquery: Option<Box<QueryMetadata>>,
}

/// A possibly nested group of filter conditions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterGroup {
    pub logic: FilterLogic,
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<FilterGroup>,
}

/// An aggregation over a field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    pub field: String,
    pub function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// An ordering term
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ordering {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

/// A query description as produced by a generated client, possibly using
/// names that predate one or more published renames
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMetadata {
    pub entity: String,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterGroup>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregations: Vec<Aggregation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ordering: Vec<Ordering>,
    /// Union sub-queries, each normalized against its own entity
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unions: Vec<QueryMetadata>,
}

pub struct MetadataNormalizer;

impl MetadataNormalizer {
    /// Rewrite every name in the query to its current physical name.
    ///
    /// Field names resolve against the query's root entity; subqueries and
    /// union branches recurse with their own entity as the parent.
    pub fn normalize(history: &ProjectHistory, query: &mut QueryMetadata) {
        // The legacy entity name keys the field history, so resolve fields
        // against the name as given, then rewrite the entity itself.
        let parent = query.entity.clone();

        for field in &mut query.fields {
            *field = history.resolve_field(Some(&parent), field);
        }
        if let Some(filter) = &mut query.filter {
            Self::normalize_filter(history, &parent, filter);
        }
        for aggregation in &mut query.aggregations {
            aggregation.field = history.resolve_field(Some(&parent), &aggregation.field);
        }
        for ordering in &mut query.ordering {
            ordering.field = history.resolve_field(Some(&parent), &ordering.field);
        }
        for union in &mut query.unions {
            Self::normalize(history, union);
        }

        query.entity = history.resolve_entity(&parent);
    }

    fn normalize_filter(history: &ProjectHistory, parent: &str, group: &mut FilterGroup) {
        for condition in &mut group.conditions {
            condition.field = history.resolve_field(Some(parent), &condition.field);
            if let Some(subquery) = &mut condition.subquery {
                Self::normalize(history, subquery);
            }
        }
        for nested in &mut group.groups {
            Self::normalize_filter(history, parent, nested);
        }
    }

    /// Inject legacy-named aliases into result rows: for every current
    /// field name with no legacy-named key present, add the legacy key with
    /// the same value. Existing keys are never overwritten.
    pub fn virtualize_result(
        history: &ProjectHistory,
        root_entity: &str,
        rows: &mut [Map<String, Value>],
    ) {
        let mappings = history.result_mappings(root_entity);
        if mappings.is_empty() {
            return;
        }

        for row in rows.iter_mut() {
            for (current, legacy) in &mappings {
                if row.contains_key(legacy) {
                    continue;
                }
                if let Some(value) = row.get(current) {
                    let value = value.clone();
                    row.insert(legacy.clone(), value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::test_support::*;
    use crate::metadata::{EntityMetadata, FieldType};
    use crate::versioning::ProjectSnapshot;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use uuid::Uuid;

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

    /// Doctor.ConsultationFee renamed to BookingFee, entity later renamed
    /// to Physician
    fn renamed_history() -> ProjectHistory {
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
            "Physician",
            vec![
                field(name_id, "FullName", FieldType::String, true),
                field(fee_id, "BookingFee", FieldType::Decimal, false),
            ],
        );

        ProjectHistory::from_snapshots(&[
            snapshot(project, "v1", &[v1]),
            snapshot(project, "v2", &[v2]),
        ])
        .unwrap()
    }

    #[test]
    fn normalizes_entity_fields_filters_and_ordering() {
        let history = renamed_history();
        let mut query = QueryMetadata {
            entity: "Doctor".to_string(),
            fields: vec!["FullName".to_string(), "ConsultationFee".to_string()],
            filter: Some(FilterGroup {
                logic: FilterLogic::And,
                conditions: vec![FilterCondition {
                    field: "ConsultationFee".to_string(),
                    operator: "gt".to_string(),
                    value: Some(json!(100)),
                    subquery: None,
                }],
                groups: vec![FilterGroup {
                    logic: FilterLogic::Or,
                    conditions: vec![FilterCondition {
                        field: "FullName".to_string(),
                        operator: "like".to_string(),
                        value: Some(json!("Dr%")),
                        subquery: None,
                    }],
                    groups: vec![],
                }],
            }),
            aggregations: vec![Aggregation {
                field: "ConsultationFee".to_string(),
                function: "avg".to_string(),
                alias: None,
            }],
            ordering: vec![Ordering {
                field: "ConsultationFee".to_string(),
                descending: true,
            }],
            unions: vec![],
        };

        MetadataNormalizer::normalize(&history, &mut query);

        assert_eq!(query.entity, "Physician");
        assert_eq!(query.fields, vec!["FullName", "BookingFee"]);
        let filter = query.filter.unwrap();
        assert_eq!(filter.conditions[0].field, "BookingFee");
        assert_eq!(filter.groups[0].conditions[0].field, "FullName");
        assert_eq!(query.aggregations[0].field, "BookingFee");
        assert_eq!(query.ordering[0].field, "BookingFee");
    }

    #[test]
    fn normalizes_subqueries_and_unions_recursively() {
        let history = renamed_history();
        let mut query = QueryMetadata {
            entity: "Doctor".to_string(),
            fields: vec![],
            filter: Some(FilterGroup {
                logic: FilterLogic::And,
                conditions: vec![FilterCondition {
                    field: "ConsultationFee".to_string(),
                    operator: "in".to_string(),
                    value: None,
                    subquery: Some(Box::new(QueryMetadata {
                        entity: "Doctor".to_string(),
                        fields: vec!["ConsultationFee".to_string()],
                        filter: None,
                        aggregations: vec![],
                        ordering: vec![],
                        unions: vec![],
                    })),
                }],
                groups: vec![],
            }),
            aggregations: vec![],
            ordering: vec![],
            unions: vec![QueryMetadata {
                entity: "Doctor".to_string(),
                fields: vec!["ConsultationFee".to_string()],
                filter: None,
                aggregations: vec![],
                ordering: vec![],
                unions: vec![],
            }],
        };

        MetadataNormalizer::normalize(&history, &mut query);

        let filter = query.filter.unwrap();
        let subquery = filter.conditions[0].subquery.as_ref().unwrap();
        assert_eq!(subquery.entity, "Physician");
        assert_eq!(subquery.fields, vec!["BookingFee"]);
        assert_eq!(query.unions[0].entity, "Physician");
        assert_eq!(query.unions[0].fields, vec!["BookingFee"]);
    }

    #[test]
    fn unknown_names_survive_normalization_unchanged() {
        let history = ProjectHistory::default();
        let mut query = QueryMetadata {
            entity: "Doctor".to_string(),
            fields: vec!["ConsultationFee".to_string()],
            filter: None,
            aggregations: vec![],
            ordering: vec![],
            unions: vec![],
        };

        MetadataNormalizer::normalize(&history, &mut query);

        assert_eq!(query.entity, "Doctor");
        assert_eq!(query.fields, vec!["ConsultationFee"]);
    }

    #[test]
    fn virtualize_injects_legacy_alias() {
        let history = renamed_history();
        let mut rows = vec![json!({ "FullName": "Dr. Rao", "BookingFee": 120 })
            .as_object()
            .unwrap()
            .clone()];

        MetadataNormalizer::virtualize_result(&history, "Physician", &mut rows);

        assert_eq!(rows[0]["BookingFee"], json!(120));
        assert_eq!(rows[0]["ConsultationFee"], json!(120));
        // Unrenamed fields gain no alias
        assert_eq!(rows[0].len(), 3);
    }

    #[test]
    fn virtualize_never_overwrites_existing_keys() {
        let history = renamed_history();
        let mut rows = vec![json!({ "BookingFee": 120, "ConsultationFee": 95 })
            .as_object()
            .unwrap()
            .clone()];

        MetadataNormalizer::virtualize_result(&history, "Physician", &mut rows);

        assert_eq!(rows[0]["ConsultationFee"], json!(95));
    }
}
