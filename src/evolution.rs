//! Schema Evolution Engine
//!
//! Turns a `MigrationPlan` into ordered PostgreSQL DDL and applies it as one
//! all-or-nothing transaction against the target database. Nothing is ever
//! dropped: removed fields and entities are renamed to deprecated,
//! timestamp-suffixed names so data survives for rollback and audit.

use crate::diff::{DeltaAction, MetadataKind, MigrationDelta, MigrationPlan};
use crate::error::AppError;
use chrono::{NaiveDate, Utc};
use deadpool_postgres::Pool;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Map a logical field type to its PostgreSQL column type.
/// Entity and enum references are stored as text.
fn sql_type(logical: &str) -> &'static str {
    match logical {
        "int" => "INTEGER",
        "decimal" => "DECIMAL(18,2)",
        "datetime" => "TIMESTAMP WITH TIME ZONE",
        "guid" => "UUID",
        "bool" => "BOOLEAN",
        _ => "TEXT",
    }
}

/// Deprecated name used for soft deletes: `_deprecated_<name>_<yyyyMMdd>`
fn deprecated_name(name: &str, today: NaiveDate) -> String {
    format!("_deprecated_{}_{}", name, today.format("%Y%m%d"))
}

/// Result of a dry-run validation of a migration plan
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub statements: Vec<String>,
}

pub struct SchemaEvolution;

impl SchemaEvolution {
    /// Generate the ordered DDL for a plan.
    ///
    /// The order is strict - later statements depend on earlier ones:
    /// creates, entity renames, column adds, column renames, type changes,
    /// field soft deletes, entity soft deletes.
    pub fn generate_statements(plan: &MigrationPlan) -> Vec<String> {
        Self::generate_statements_on(plan, Utc::now().date_naive())
    }

    pub fn generate_statements_on(plan: &MigrationPlan, today: NaiveDate) -> Vec<String> {
        let mut statements = Vec::new();

        // Entity deltas decide which table name a field delta targets:
        // added and renamed entities appear here under their current name.
        let added_entities: HashSet<Uuid> = plan
            .deltas
            .iter()
            .filter(|d| d.kind == MetadataKind::Entity && d.action == DeltaAction::Added)
            .map(|d| d.element_id)
            .collect();
        let current_entity_names: HashMap<Uuid, &str> = plan
            .deltas
            .iter()
            .filter(|d| d.kind == MetadataKind::Entity)
            .map(|d| (d.element_id, d.name.as_str()))
            .collect();

        let table_for = |delta: &MigrationDelta| -> Option<String> {
            let parent_id = delta.parent_id?;
            current_entity_names
                .get(&parent_id)
                .map(|n| (*n).to_string())
                .or_else(|| delta.parent_name.clone())
        };

        // 1. CREATE TABLE for added entities, with every bundled field as a
        //    column so no later ADD COLUMN is needed
        for delta in Self::select(plan, MetadataKind::Entity, DeltaAction::Added) {
            let mut columns = vec!["    \"id\" UUID PRIMARY KEY".to_string()];
            for field in plan.deltas.iter().filter(|d| {
                d.kind == MetadataKind::Field
                    && d.action == DeltaAction::Added
                    && d.parent_id == Some(delta.element_id)
            }) {
                columns.push(format!(
                    "    \"{}\" {}",
                    field.name,
                    sql_type(Self::new_type(field))
                ));
            }
            statements.push(format!(
                "CREATE TABLE \"{}\" (\n{}\n);",
                delta.name,
                columns.join(",\n")
            ));
        }

        // 2. Entity renames
        for delta in Self::select(plan, MetadataKind::Entity, DeltaAction::Renamed) {
            if let Some(previous) = &delta.previous_name {
                statements.push(format!(
                    "ALTER TABLE \"{}\" RENAME TO \"{}\";",
                    previous, delta.name
                ));
            }
        }

        // 3. Column adds for fields whose parent table already existed
        for delta in Self::select(plan, MetadataKind::Field, DeltaAction::Added) {
            let parent_added = delta
                .parent_id
                .map(|id| added_entities.contains(&id))
                .unwrap_or(false);
            if parent_added {
                continue;
            }
            if let Some(table) = table_for(delta) {
                statements.push(format!(
                    "ALTER TABLE \"{}\" ADD COLUMN \"{}\" {};",
                    table,
                    delta.name,
                    sql_type(Self::new_type(delta))
                ));
            }
        }

        // 4. Column renames
        for delta in Self::select(plan, MetadataKind::Field, DeltaAction::Renamed) {
            let (Some(table), Some(previous)) = (table_for(delta), &delta.previous_name) else {
                continue;
            };
            statements.push(format!(
                "ALTER TABLE \"{}\" RENAME COLUMN \"{}\" TO \"{}\";",
                table, previous, delta.name
            ));
        }

        // 5. Type changes, with an explicit cast so existing data is
        //    reinterpreted rather than rejected. The new type comes from the
        //    delta's "Type" property change; the diff engine emits one for
        //    every type change by construction. Runs after renames, so the
        //    column already has its current name.
        for delta in plan.deltas.iter().filter(|d| {
            d.kind == MetadataKind::Field
                && matches!(d.action, DeltaAction::Updated | DeltaAction::Renamed)
        }) {
            let Some(table) = table_for(delta) else {
                continue;
            };
            if delta.changes.get("Type").and_then(|c| c.old.as_ref()).is_some() {
                let column_type = sql_type(Self::new_type(delta));
                statements.push(format!(
                    "ALTER TABLE \"{}\" ALTER COLUMN \"{}\" TYPE {} USING \"{}\"::{};",
                    table, delta.name, column_type, delta.name, column_type
                ));
            }
            if let Some(required) = delta
                .changes
                .get("IsRequired")
                .and_then(|c| c.new.as_ref())
                .and_then(|v| v.as_bool())
            {
                let clause = if required { "SET NOT NULL" } else { "DROP NOT NULL" };
                statements.push(format!(
                    "ALTER TABLE \"{}\" ALTER COLUMN \"{}\" {};",
                    table, delta.name, clause
                ));
            }
        }

        // 6. Field soft deletes - never DROP COLUMN
        for delta in Self::select(plan, MetadataKind::Field, DeltaAction::Removed) {
            if let Some(table) = table_for(delta) {
                statements.push(format!(
                    "ALTER TABLE \"{}\" RENAME COLUMN \"{}\" TO \"{}\";",
                    table,
                    delta.name,
                    deprecated_name(&delta.name, today)
                ));
            }
        }

        // 7. Entity soft deletes - never DROP TABLE
        for delta in Self::select(plan, MetadataKind::Entity, DeltaAction::Removed) {
            statements.push(format!(
                "ALTER TABLE \"{}\" RENAME TO \"{}\";",
                delta.name,
                deprecated_name(&delta.name, today)
            ));
        }

        statements
    }

    fn select<'a>(
        plan: &'a MigrationPlan,
        kind: MetadataKind,
        action: DeltaAction,
    ) -> impl Iterator<Item = &'a MigrationDelta> {
        plan.deltas
            .iter()
            .filter(move |d| d.kind == kind && d.action == action)
    }

    /// New logical type from the delta's "Type" property change
    fn new_type(delta: &MigrationDelta) -> &str {
        delta
            .changes
            .get("Type")
            .and_then(|c| c.new.as_ref())
            .and_then(|v| v.as_str())
            .unwrap_or("string")
    }

    /// Execute every statement of the plan inside a single transaction.
    ///
    /// Commits on full success; any single failure rolls back the whole
    /// batch, so partial application is never observable. An empty plan is a
    /// no-op and opens no transaction.
    pub async fn apply(pool: &Pool, plan: &MigrationPlan) -> Result<Vec<String>, AppError> {
        let statements = Self::generate_statements(plan);
        if statements.is_empty() {
            tracing::info!(
                "Plan '{}' for project {} has no DDL to apply",
                plan.target_version,
                plan.project_id
            );
            return Ok(statements);
        }

        let mut client = pool.get().await?;
        let transaction = client.transaction().await?;

        for (i, statement) in statements.iter().enumerate() {
            transaction
                .execute(statement.as_str(), &[])
                .await
                // Dropping the transaction rolls everything back
                .map_err(|e| AppError::MigrationApply {
                    index: i + 1,
                    reason: e.to_string(),
                })?;
        }

        transaction.commit().await?;

        tracing::info!(
            "Applied {} statements for project {} version '{}'",
            statements.len(),
            plan.project_id,
            plan.target_version
        );

        Ok(statements)
    }

    /// Validate the plan against the target database in a transaction that
    /// is always rolled back.
    pub async fn dry_run(pool: &Pool, plan: &MigrationPlan) -> Result<DryRunReport, AppError> {
        let statements = Self::generate_statements(plan);
        if statements.is_empty() {
            return Ok(DryRunReport {
                success: true,
                error: None,
                statements,
            });
        }

        let mut client = pool.get().await?;
        let transaction = client.transaction().await?;

        for (i, statement) in statements.iter().enumerate() {
            if let Err(e) = transaction.execute(statement.as_str(), &[]).await {
                return Ok(DryRunReport {
                    success: false,
                    error: Some(format!("Statement {} failed: {}", i + 1, e)),
                    statements,
                });
            }
        }

        transaction.rollback().await?;

        Ok(DryRunReport {
            success: true,
            error: None,
            statements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::test_support::*;
    use crate::diff::DiffEngine;
    use crate::metadata::{Artifact, FieldType};
    use pretty_assertions::assert_eq;

    fn fixed_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 24).unwrap()
    }

    fn statements_for(old: &[Artifact], new: &[Artifact]) -> Vec<String> {
        let plan =
            DiffEngine::diff_artifacts(Uuid::new_v4(), Some("v1".to_string()), "v2", old, new)
                .unwrap();
        SchemaEvolution::generate_statements_on(&plan, fixed_date())
    }

    #[test]
    fn added_entity_becomes_single_create_table() {
        let project = Uuid::new_v4();
        let specialization = entity(
            Uuid::new_v4(),
            "Specialization",
            vec![
                field(Uuid::new_v4(), "Name", FieldType::String, true),
                field(Uuid::new_v4(), "Code", FieldType::Int, false),
            ],
        );

        let statements = statements_for(&[], &[entity_artifact(project, &specialization)]);

        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0],
            "CREATE TABLE \"Specialization\" (\n    \"id\" UUID PRIMARY KEY,\n    \"Name\" TEXT,\n    \"Code\" INTEGER\n);"
        );
        assert!(!statements.iter().any(|s| s.contains("ADD COLUMN")));
    }

    #[test]
    fn field_added_to_existing_entity_is_add_column() {
        let project = Uuid::new_v4();
        let entity_id = Uuid::new_v4();
        let name_id = Uuid::new_v4();

        let before = entity(
            entity_id,
            "Doctor",
            vec![field(name_id, "Name", FieldType::String, true)],
        );
        let mut after = before.clone();
        after
            .fields
            .push(field(Uuid::new_v4(), "JoinedAt", FieldType::Datetime, false));

        let statements = statements_for(
            &[entity_artifact(project, &before)],
            &[entity_artifact(project, &after)],
        );

        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"Doctor\" ADD COLUMN \"JoinedAt\" TIMESTAMP WITH TIME ZONE;"
                    .to_string()
            ]
        );
    }

    #[test]
    fn add_column_targets_post_rename_table_name() {
        let project = Uuid::new_v4();
        let entity_id = Uuid::new_v4();
        let name_id = Uuid::new_v4();

        let before = entity(
            entity_id,
            "Doctor",
            vec![field(name_id, "Name", FieldType::String, true)],
        );
        let mut after = entity(
            entity_id,
            "Physician",
            vec![field(name_id, "Name", FieldType::String, true)],
        );
        after
            .fields
            .push(field(Uuid::new_v4(), "LicenseNo", FieldType::String, false));

        let statements = statements_for(
            &[entity_artifact(project, &before)],
            &[entity_artifact(project, &after)],
        );

        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"Doctor\" RENAME TO \"Physician\";".to_string(),
                "ALTER TABLE \"Physician\" ADD COLUMN \"LicenseNo\" TEXT;".to_string(),
            ]
        );
    }

    #[test]
    fn field_rename_is_rename_column() {
        let project = Uuid::new_v4();
        let entity_id = Uuid::new_v4();
        let fee_id = Uuid::new_v4();

        let before = entity(
            entity_id,
            "Doctor",
            vec![field(fee_id, "ConsultationFee", FieldType::Decimal, false)],
        );
        let after = entity(
            entity_id,
            "Doctor",
            vec![field(fee_id, "BookingFee", FieldType::Decimal, false)],
        );

        let statements = statements_for(
            &[entity_artifact(project, &before)],
            &[entity_artifact(project, &after)],
        );

        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"Doctor\" RENAME COLUMN \"ConsultationFee\" TO \"BookingFee\";"
                    .to_string()
            ]
        );
    }

    #[test]
    fn type_change_uses_delta_property() {
        let project = Uuid::new_v4();
        let entity_id = Uuid::new_v4();
        let amount_id = Uuid::new_v4();

        let before = entity(
            entity_id,
            "Invoice",
            vec![field(amount_id, "Amount", FieldType::Int, false)],
        );
        let after = entity(
            entity_id,
            "Invoice",
            vec![field(amount_id, "Amount", FieldType::Decimal, false)],
        );

        let statements = statements_for(
            &[entity_artifact(project, &before)],
            &[entity_artifact(project, &after)],
        );

        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"Invoice\" ALTER COLUMN \"Amount\" TYPE DECIMAL(18,2) USING \"Amount\"::DECIMAL(18,2);"
                    .to_string()
            ]
        );
    }

    #[test]
    fn required_flip_toggles_not_null() {
        let project = Uuid::new_v4();
        let entity_id = Uuid::new_v4();
        let email_id = Uuid::new_v4();

        let optional = entity(
            entity_id,
            "Patient",
            vec![field(email_id, "Email", FieldType::String, false)],
        );
        let required = entity(
            entity_id,
            "Patient",
            vec![field(email_id, "Email", FieldType::String, true)],
        );

        let tightened = statements_for(
            &[entity_artifact(project, &optional)],
            &[entity_artifact(project, &required)],
        );
        assert_eq!(
            tightened,
            vec!["ALTER TABLE \"Patient\" ALTER COLUMN \"Email\" SET NOT NULL;".to_string()]
        );

        let loosened = statements_for(
            &[entity_artifact(project, &required)],
            &[entity_artifact(project, &optional)],
        );
        assert_eq!(
            loosened,
            vec!["ALTER TABLE \"Patient\" ALTER COLUMN \"Email\" DROP NOT NULL;".to_string()]
        );
    }

    #[test]
    fn removed_field_is_soft_deleted() {
        let project = Uuid::new_v4();
        let entity_id = Uuid::new_v4();
        let keep_id = Uuid::new_v4();

        let before = entity(
            entity_id,
            "Doctor",
            vec![
                field(keep_id, "Name", FieldType::String, true),
                field(Uuid::new_v4(), "LegacyNote", FieldType::String, false),
            ],
        );
        let after = entity(
            entity_id,
            "Doctor",
            vec![field(keep_id, "Name", FieldType::String, true)],
        );

        let statements = statements_for(
            &[entity_artifact(project, &before)],
            &[entity_artifact(project, &after)],
        );

        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"Doctor\" RENAME COLUMN \"LegacyNote\" TO \"_deprecated_LegacyNote_20260824\";"
                    .to_string()
            ]
        );
        assert!(!statements.iter().any(|s| s.contains("DROP")));
    }

    #[test]
    fn removed_entity_is_soft_deleted() {
        let project = Uuid::new_v4();
        let legacy = entity(
            Uuid::new_v4(),
            "LegacyAudit",
            vec![field(Uuid::new_v4(), "Note", FieldType::String, false)],
        );

        let statements = statements_for(&[entity_artifact(project, &legacy)], &[]);

        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"LegacyAudit\" RENAME TO \"_deprecated_LegacyAudit_20260824\";"
                    .to_string()
            ]
        );
    }

    #[test]
    fn empty_plan_generates_no_statements() {
        let project = Uuid::new_v4();
        let doctor = entity(
            Uuid::new_v4(),
            "Doctor",
            vec![field(Uuid::new_v4(), "Name", FieldType::String, true)],
        );
        let artifacts = vec![entity_artifact(project, &doctor)];

        let statements = statements_for(&artifacts, &artifacts);
        assert!(statements.is_empty());
    }

    #[test]
    fn renamed_and_retyped_field_casts_under_new_name() {
        let project = Uuid::new_v4();
        let entity_id = Uuid::new_v4();
        let fee_id = Uuid::new_v4();

        let before = entity(
            entity_id,
            "Doctor",
            vec![field(fee_id, "Fee", FieldType::Int, false)],
        );
        let after = entity(
            entity_id,
            "Doctor",
            vec![field(fee_id, "BookingFee", FieldType::Decimal, false)],
        );

        let statements = statements_for(
            &[entity_artifact(project, &before)],
            &[entity_artifact(project, &after)],
        );

        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"Doctor\" RENAME COLUMN \"Fee\" TO \"BookingFee\";".to_string(),
                "ALTER TABLE \"Doctor\" ALTER COLUMN \"BookingFee\" TYPE DECIMAL(18,2) USING \"BookingFee\"::DECIMAL(18,2);"
                    .to_string(),
            ]
        );
    }

    // The transactional tests below run only when TEST_DATABASE_URL points
    // at a scratch PostgreSQL database; without it they are no-ops.
    fn scratch_pool() -> Option<deadpool_postgres::Pool> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        crate::db::target_pool(&url).ok()
    }

    /// Baseline has an entity whose table does not exist in the scratch
    /// database, so the plan's ADD COLUMN fails after the CREATE TABLE
    /// succeeded inside the transaction.
    fn mid_batch_failing_plan(suffix: &str) -> (MigrationPlan, String) {
        let project = Uuid::new_v4();
        let ghost_id = Uuid::new_v4();
        let note_id = Uuid::new_v4();
        let alpha_name = format!("Alpha{}", suffix);

        let ghost_before = entity(
            ghost_id,
            &format!("Ghost{}", suffix),
            vec![field(note_id, "Note", FieldType::String, false)],
        );
        let mut ghost_after = ghost_before.clone();
        ghost_after
            .fields
            .push(field(Uuid::new_v4(), "Extra", FieldType::String, false));
        let alpha = entity(
            Uuid::new_v4(),
            &alpha_name,
            vec![field(Uuid::new_v4(), "Name", FieldType::String, true)],
        );

        let plan = DiffEngine::diff_artifacts(
            project,
            Some("v1".to_string()),
            "v2",
            &[entity_artifact(project, &ghost_before)],
            &[
                entity_artifact(project, &alpha),
                entity_artifact(project, &ghost_after),
            ],
        )
        .unwrap();
        (plan, alpha_name)
    }

    async fn table_exists(pool: &deadpool_postgres::Pool, name: &str) -> bool {
        let client = pool.get().await.unwrap();
        let row = client
            .query_one(
                "SELECT to_regclass($1) IS NOT NULL",
                &[&format!("\"{}\"", name)],
            )
            .await
            .unwrap();
        row.get(0)
    }

    #[tokio::test]
    async fn failed_statement_rolls_back_the_whole_batch() {
        let Some(pool) = scratch_pool() else { return };
        let suffix = Uuid::new_v4().simple().to_string();
        let (plan, alpha_name) = mid_batch_failing_plan(&suffix);

        let statements = SchemaEvolution::generate_statements(&plan);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE"));

        let err = SchemaEvolution::apply(&pool, &plan).await.unwrap_err();
        assert!(matches!(err, AppError::MigrationApply { index: 2, .. }));

        // The CREATE TABLE that succeeded inside the transaction must not
        // be observable after the rollback
        assert!(!table_exists(&pool, &alpha_name).await);
    }

    #[tokio::test]
    async fn dry_run_never_leaves_changes_behind() {
        let Some(pool) = scratch_pool() else { return };
        let suffix = Uuid::new_v4().simple().to_string();
        let (failing_plan, alpha_name) = mid_batch_failing_plan(&suffix);

        let report = SchemaEvolution::dry_run(&pool, &failing_plan).await.unwrap();
        assert!(!report.success);
        assert!(report.error.as_deref().unwrap().contains("Statement 2"));
        assert!(!table_exists(&pool, &alpha_name).await);

        // A valid plan also rolls back: dry runs validate, never apply
        let project = Uuid::new_v4();
        let beta_name = format!("Beta{}", suffix);
        let beta = entity(
            Uuid::new_v4(),
            &beta_name,
            vec![field(Uuid::new_v4(), "Name", FieldType::String, true)],
        );
        let valid_plan = DiffEngine::diff_artifacts(
            project,
            None,
            "v1",
            &[],
            &[entity_artifact(project, &beta)],
        )
        .unwrap();

        let report = SchemaEvolution::dry_run(&pool, &valid_plan).await.unwrap();
        assert!(report.success);
        assert!(!table_exists(&pool, &beta_name).await);
    }

    #[test]
    fn logical_type_mapping() {
        assert_eq!(sql_type("int"), "INTEGER");
        assert_eq!(sql_type("decimal"), "DECIMAL(18,2)");
        assert_eq!(sql_type("datetime"), "TIMESTAMP WITH TIME ZONE");
        assert_eq!(sql_type("guid"), "UUID");
        assert_eq!(sql_type("bool"), "BOOLEAN");
        assert_eq!(sql_type("string"), "TEXT");
        assert_eq!(sql_type("Specialization"), "TEXT");
    }
}
