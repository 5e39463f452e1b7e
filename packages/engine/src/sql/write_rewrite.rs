use std::collections::HashSet;

use serde_json::Value as JsonValue;
use sqlparser::ast::{Delete, FromTable, Insert, Statement, TableFactor};

use crate::context::{EngineContext, SchemaAddress};
use crate::sql::classify::delete_target;
use crate::sql::mutation::{extract_insert_mutation_rows, InsertMutationRow};
use crate::sql::surface::{
    classify_write_target, escape_sql_string, quote_ident, WriteTarget,
    FILE_DESCRIPTOR_SCHEMA_KEY, INTERNAL_STATE_VTABLE, MUTATION_ROW_CTE,
    STATE_BY_VERSION, STATE_MUTATION_KEY_COLUMNS, TRANSACTION_STATE_TABLE,
};
use crate::sql::validate::validate_mutation_row;
use crate::EngineError;

/// Rewrites one mutation statement into physical SQL. `Ok(None)` is the
/// fallback signal: the statement is executed exactly as written. The
/// decision is atomic per statement; a script mixes rewritten and
/// fallen-back statements freely.
pub(crate) fn rewrite_statement_for_write(
    statement: &Statement,
    params: &[JsonValue],
    context: &EngineContext,
) -> Result<Option<String>, EngineError> {
    match statement {
        Statement::Insert(insert) => rewrite_insert(insert, params, context),
        Statement::Update {
            table,
            assignments,
            from,
            selection,
            returning,
            ..
        } => {
            if from.is_some() || returning.is_some() || !table.joins.is_empty() {
                return Ok(None);
            }
            let TableFactor::Table {
                name,
                alias: None,
                args: None,
                ..
            } = &table.relation
            else {
                return Ok(None);
            };
            let target = classify_write_target(name);
            let Some(physical) = physical_state_table(target) else {
                return Ok(None);
            };
            let Some(version_filter) = version_filter(target, context) else {
                return Ok(None);
            };

            let predicate = combine_predicates(
                selection.as_ref().map(|expr| expr.to_string()),
                version_filter,
            );
            let set_clause = assignments
                .iter()
                .map(|assignment| assignment.to_string())
                .collect::<Vec<_>>()
                .join(", ");

            Ok(Some(format!(
                "{cte} UPDATE {physical} SET {set_clause}{keys}",
                cte = mutation_row_cte(physical, predicate.as_deref()),
                keys = mutation_key_membership(),
            )))
        }
        Statement::Delete(delete) => rewrite_delete(delete, context),
        _ => Ok(None),
    }
}

fn rewrite_insert(
    insert: &Insert,
    params: &[JsonValue],
    context: &EngineContext,
) -> Result<Option<String>, EngineError> {
    let target = classify_write_target(&insert.table_name);
    if !target.is_state_surface() {
        // File descriptor writes keep their legacy path.
        return Ok(None);
    }
    if insert.or.is_some()
        || insert.on.is_some()
        || insert.returning.is_some()
        || insert.table_alias.is_some()
        || insert.partitioned.is_some()
        || !insert.after_columns.is_empty()
    {
        return Ok(None);
    }

    let Some(rows) = extract_insert_mutation_rows(insert, params)? else {
        return Ok(None);
    };

    // Resolve every row's version before validating any of them, so a
    // resolution failure falls back without side effects.
    let mut resolved = Vec::with_capacity(rows.len());
    for row in &rows {
        let Some(version_id) = resolve_row_version(row, target, context) else {
            return Ok(None);
        };
        resolved.push(version_id);
    }

    for (row, version_id) in rows.iter().zip(&resolved) {
        validate_mutation_row(context, row, version_id)?;
    }

    // Validation runs first so invalid descriptor rows still abort, then the
    // descriptor path declines the rewrite.
    if rows
        .iter()
        .any(|row| row.schema_key == FILE_DESCRIPTOR_SCHEMA_KEY)
    {
        return Ok(None);
    }

    let statements: Vec<String> = rows
        .iter()
        .zip(&resolved)
        .map(|(row, version_id)| render_staging_upsert(row, version_id))
        .collect();

    Ok(Some(statements.join("; ")))
}

fn rewrite_delete(delete: &Delete, context: &EngineContext) -> Result<Option<String>, EngineError> {
    if !delete.tables.is_empty()
        || delete.using.is_some()
        || delete.returning.is_some()
        || !delete.order_by.is_empty()
        || delete.limit.is_some()
    {
        return Ok(None);
    }
    let tables = match &delete.from {
        FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
    };
    let [table] = tables.as_slice() else {
        return Ok(None);
    };
    if !table.joins.is_empty() {
        return Ok(None);
    }
    let TableFactor::Table {
        alias: None,
        args: None,
        ..
    } = &table.relation
    else {
        return Ok(None);
    };

    let Some(target) = delete_target(delete) else {
        return Ok(None);
    };
    let Some(physical) = physical_state_table(target) else {
        return Ok(None);
    };
    let Some(version_filter) = version_filter(target, context) else {
        return Ok(None);
    };

    let predicate = combine_predicates(
        delete.selection.as_ref().map(|expr| expr.to_string()),
        version_filter,
    );

    Ok(Some(format!(
        "{cte} DELETE FROM {physical}{keys}",
        cte = mutation_row_cte(physical, predicate.as_deref()),
        keys = mutation_key_membership(),
    )))
}

/// Pre-pass over a script statement: the schema addresses its insert rows
/// reference, so the context loader can fetch them in one sweep. Unsupported
/// shapes contribute nothing; they will fall back during the rewrite proper.
pub(crate) fn collect_schema_addresses(
    statement: &Statement,
    params: &[JsonValue],
    addresses: &mut HashSet<SchemaAddress>,
) -> Result<(), EngineError> {
    let Statement::Insert(insert) = statement else {
        return Ok(());
    };
    if !classify_write_target(&insert.table_name).is_state_surface() {
        return Ok(());
    }
    if let Some(rows) = extract_insert_mutation_rows(insert, params)? {
        for row in rows {
            addresses.insert(SchemaAddress {
                schema_key: row.schema_key,
                schema_version: row.schema_version,
            });
        }
    }
    Ok(())
}

fn resolve_row_version(
    row: &InsertMutationRow,
    target: WriteTarget,
    context: &EngineContext,
) -> Option<String> {
    if let Some(version_id) = &row.version_id {
        return Some(version_id.clone());
    }
    if target.is_version_implicit() {
        return context.active_version_id.clone();
    }
    // Version-explicit surfaces require the row to carry one.
    None
}

fn physical_state_table(target: WriteTarget) -> Option<&'static str> {
    match target {
        WriteTarget::State | WriteTarget::StateAll | WriteTarget::StateByVersion => {
            Some(STATE_BY_VERSION)
        }
        WriteTarget::StateVtable => Some(INTERNAL_STATE_VTABLE),
        WriteTarget::File | WriteTarget::Other => None,
    }
}

/// The AND-combined version predicate for version-implicit targets, `Some("")`
/// when no filter is needed, `None` when the ambient version cannot be
/// resolved and the statement must fall back.
fn version_filter(target: WriteTarget, context: &EngineContext) -> Option<Option<String>> {
    if !target.is_version_implicit() {
        return Some(None);
    }
    let active = context.active_version_id.as_deref()?;
    Some(Some(format!(
        "version_id = '{}'",
        escape_sql_string(active)
    )))
}

fn combine_predicates(selection: Option<String>, version_filter: Option<String>) -> Option<String> {
    match (selection, version_filter) {
        (Some(selection), Some(version)) => Some(format!("({selection}) AND {version}")),
        (Some(selection), None) => Some(selection),
        (None, Some(version)) => Some(version),
        (None, None) => None,
    }
}

/// Snapshots the affected mutation keys before the physical statement runs,
/// in deterministic key order, so the mutation log is stable regardless of
/// the underlying row order.
fn mutation_row_cte(physical: &str, predicate: Option<&str>) -> String {
    let keys = STATE_MUTATION_KEY_COLUMNS.join(", ");
    let where_clause = predicate
        .map(|predicate| format!(" WHERE {predicate}"))
        .unwrap_or_default();
    format!(
        "WITH {cte} AS (SELECT {keys} FROM {physical}{where_clause} ORDER BY {keys})",
        cte = quote_ident(MUTATION_ROW_CTE),
    )
}

fn mutation_key_membership() -> String {
    let keys = STATE_MUTATION_KEY_COLUMNS.join(", ");
    format!(
        " WHERE ({keys}) IN (SELECT {keys} FROM {cte})",
        cte = quote_ident(MUTATION_ROW_CTE),
    )
}

fn render_staging_upsert(row: &InsertMutationRow, resolved_version_id: &str) -> String {
    let version_sql = row
        .rendered
        .version_id
        .clone()
        .unwrap_or_else(|| format!("'{}'", escape_sql_string(resolved_version_id)));

    format!(
        "INSERT INTO {staging} \
         (entity_id, schema_key, file_id, plugin_key, schema_version, version_id, \
          snapshot_content, metadata, untracked) \
         VALUES ({entity_id}, {schema_key}, {file_id}, {plugin_key}, {schema_version}, \
          {version_id}, {snapshot_content}, {metadata}, {untracked}) \
         ON CONFLICT(entity_id, file_id, schema_key, version_id) DO UPDATE SET \
         plugin_key = excluded.plugin_key, \
         schema_version = excluded.schema_version, \
         snapshot_content = excluded.snapshot_content, \
         metadata = excluded.metadata, \
         untracked = excluded.untracked",
        staging = TRANSACTION_STATE_TABLE,
        entity_id = row.rendered.entity_id,
        schema_key = row.rendered.schema_key,
        file_id = row.rendered.file_id,
        plugin_key = row.rendered.plugin_key,
        schema_version = row.rendered.schema_version,
        version_id = version_sql,
        snapshot_content = row.rendered.snapshot_content,
        metadata = row.rendered.metadata,
        untracked = row.rendered.untracked,
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use sqlparser::ast::Statement;
    use sqlparser::dialect::SQLiteDialect;
    use sqlparser::parser::Parser;

    use super::rewrite_statement_for_write;
    use crate::context::{EngineContext, SchemaAddress};
    use crate::sql::placeholders::normalize_placeholders;
    use crate::ErrorCode;

    fn parse_one(sql: &str, params_len: usize) -> Statement {
        let mut statements = Parser::parse_sql(&SQLiteDialect {}, sql).expect("sql should parse");
        normalize_placeholders(&mut statements, params_len).expect("placeholders should bind");
        statements.remove(0)
    }

    fn context_with_schema() -> EngineContext {
        EngineContext::for_tests(
            Some("v-active"),
            &["v-active", "v-other"],
            vec![(
                SchemaAddress {
                    schema_key: "paragraph".to_string(),
                    schema_version: "1.0".to_string(),
                },
                json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
            )],
        )
    }

    const FULL_INSERT: &str = "INSERT INTO state \
        (entity_id, schema_key, file_id, plugin_key, schema_version, snapshot_content) \
        VALUES ('e1', 'paragraph', 'f1', 'p1', '1.0', '{\"text\":\"hi\"}')";

    #[test]
    fn rewrites_state_inserts_into_staging_upserts() {
        let statement = parse_one(FULL_INSERT, 0);
        let sql = rewrite_statement_for_write(&statement, &[], &context_with_schema())
            .expect("rewrite should succeed")
            .expect("insert should be rewritten");

        assert!(sql.starts_with("INSERT INTO stateline_internal_transaction_state"));
        assert!(sql.contains("version_id"));
        assert!(sql.contains("'v-active'"));
        assert!(sql.contains("ON CONFLICT(entity_id, file_id, schema_key, version_id)"));
    }

    #[test]
    fn falls_back_when_no_active_version_is_set() {
        let statement = parse_one(FULL_INSERT, 0);
        let context = EngineContext::for_tests(None, &["v-other"], vec![]);
        assert!(rewrite_statement_for_write(&statement, &[], &context)
            .expect("rewrite should succeed")
            .is_none());
    }

    #[test]
    fn explicit_version_targets_require_a_version_column() {
        let statement = parse_one(
            "INSERT INTO state_by_version \
             (entity_id, schema_key, file_id, plugin_key, schema_version) \
             VALUES ('e1', 'paragraph', 'f1', 'p1', '1.0')",
            0,
        );
        assert!(
            rewrite_statement_for_write(&statement, &[], &context_with_schema())
                .expect("rewrite should succeed")
                .is_none()
        );
    }

    #[test]
    fn rejects_rows_that_fail_schema_validation() {
        let statement = parse_one(
            "INSERT INTO state \
             (entity_id, schema_key, file_id, plugin_key, schema_version, snapshot_content) \
             VALUES ('e1', 'paragraph', 'f1', 'p1', '1.0', '{\"text\":7}')",
            0,
        );
        let error = rewrite_statement_for_write(&statement, &[], &context_with_schema())
            .expect_err("invalid snapshot must abort");
        assert_eq!(error.code, ErrorCode::RewriteValidation);
    }

    #[test]
    fn explicit_unknown_versions_abort_with_does_not_exist() {
        let statement = parse_one(
            "INSERT INTO state_by_version \
             (entity_id, schema_key, file_id, plugin_key, schema_version, version_id) \
             VALUES ('e1', 'paragraph', 'f1', 'p1', '1.0', 'missing-version')",
            0,
        );
        let error = rewrite_statement_for_write(&statement, &[], &context_with_schema())
            .expect_err("unknown explicit version must abort");
        assert_eq!(error.code, ErrorCode::RewriteValidation);
        assert!(error.message.contains("does not exist"));
    }

    #[test]
    fn returning_clauses_fall_back() {
        let statement = parse_one(
            "INSERT INTO state \
             (entity_id, schema_key, file_id, plugin_key, schema_version) \
             VALUES ('e1', 'paragraph', 'f1', 'p1', '1.0') RETURNING entity_id",
            0,
        );
        assert!(
            rewrite_statement_for_write(&statement, &[], &context_with_schema())
                .expect("rewrite should succeed")
                .is_none()
        );
    }

    #[test]
    fn updates_snapshot_keys_before_mutating() {
        let statement = parse_one(
            "UPDATE state_by_version SET snapshot_content = '{}' WHERE entity_id = 'e1'",
            0,
        );
        let sql = rewrite_statement_for_write(&statement, &[], &context_with_schema())
            .expect("rewrite should succeed")
            .expect("update should be rewritten");

        assert!(sql.starts_with("WITH \"__stateline_mutation_rows\" AS (SELECT"));
        assert!(sql.contains("UPDATE state_by_version SET snapshot_content = '{}'"));
        assert!(sql.contains(
            "(entity_id, schema_key, file_id, version_id) IN \
             (SELECT entity_id, schema_key, file_id, version_id FROM \"__stateline_mutation_rows\")"
        ));
    }

    #[test]
    fn version_implicit_updates_pin_the_active_version() {
        let statement = parse_one("UPDATE state SET snapshot_content = NULL", 0);
        let sql = rewrite_statement_for_write(&statement, &[], &context_with_schema())
            .expect("rewrite should succeed")
            .expect("update should be rewritten");
        assert!(sql.contains("WHERE version_id = 'v-active' ORDER BY"));
    }

    #[test]
    fn deletes_use_the_same_key_snapshot() {
        let statement = parse_one(
            "DELETE FROM state_by_version WHERE schema_key = 'paragraph'",
            0,
        );
        let sql = rewrite_statement_for_write(&statement, &[], &context_with_schema())
            .expect("rewrite should succeed")
            .expect("delete should be rewritten");
        assert!(sql.contains("DELETE FROM state_by_version WHERE"));
        assert!(sql.contains("(schema_key = 'paragraph')") || sql.contains("schema_key = 'paragraph'"));
    }

    #[test]
    fn deletes_with_limits_fall_back() {
        let statement = parse_one("DELETE FROM state_by_version LIMIT 5", 0);
        assert!(
            rewrite_statement_for_write(&statement, &[], &context_with_schema())
                .expect("rewrite should succeed")
                .is_none()
        );
    }
}
