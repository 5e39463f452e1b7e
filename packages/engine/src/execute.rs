use std::collections::HashSet;

use sqlparser::ast::{Statement, TableFactor};

use crate::boundary::{
    codec, ExecuteRequest, ExecuteResult, HostCallbacks, HostDetectChangesRequest,
    HostExecuteRequest,
};
use crate::context::load_context;
use crate::error_classification::map_host_error;
use crate::sql::placeholders::normalize_placeholders;
use crate::sql::surface::{classify_write_target, WriteTarget};
use crate::sql::write_rewrite::{collect_schema_addresses, rewrite_statement_for_write};
use crate::sql::{
    classify_script, delete_target, parse_script, read_rewrite, ExecutePlan, RowsAffectedMode,
    StatementKind,
};
use crate::{EngineError, ErrorCode};

/// Classification-only entry point: the plan a script would execute under,
/// without touching the host. Unparseable SQL plans as passthrough; the
/// parse error surfaces later, from SQLite itself.
pub fn plan_execute(sql: &str) -> ExecutePlan {
    match parse_script(sql) {
        Ok(script) => ExecutePlan::for_kind(classify_script(&script)),
        Err(_) => ExecutePlan::for_kind(StatementKind::Passthrough),
    }
}

/// Runs one execute request through the full pipeline: parse, classify,
/// rewrite, execute through the host, then plugin change detection for
/// mutating kinds. The engine never opens a transaction; everything runs
/// inside whatever transaction the caller holds.
pub async fn execute_with_host<H: HostCallbacks + ?Sized>(
    host: &H,
    request: ExecuteRequest,
) -> Result<ExecuteResult, EngineError> {
    let script = parse_script(&request.sql)
        .map_err(|error| EngineError::sqlite_execution(format!("failed to parse SQL: {error}")))?;
    let kind = classify_script(&script);
    let plan = ExecutePlan::for_kind(kind);

    let physical_sql = match kind {
        StatementKind::Passthrough => request.sql.clone(),
        StatementKind::ReadRewrite => {
            let mut statements = parsed_statements(&script)?;
            // Explicit ?N positions survive the rewrite; the host binds them
            // globally across the rendered script.
            let mut changed = normalize_placeholders(&mut statements, request.params.len())?;
            for statement in &mut statements {
                changed |= read_rewrite::rewrite_statement_for_read(statement)?;
            }
            if changed {
                render_script(&statements)
            } else {
                request.sql.clone()
            }
        }
        StatementKind::WriteRewrite | StatementKind::Validation => {
            let mut statements = parsed_statements(&script)?;
            if kind == StatementKind::Validation {
                enforce_validation_surface(&statements)?;
            }
            let placeholders_changed =
                normalize_placeholders(&mut statements, request.params.len())?;

            let mut schema_addresses = HashSet::new();
            for statement in &statements {
                collect_schema_addresses(statement, &request.params, &mut schema_addresses)?;
            }
            let context = load_context(host, &request.request_id, &schema_addresses).await?;

            let mut rendered = Vec::with_capacity(statements.len());
            let mut changed = placeholders_changed;
            for statement in &statements {
                match rewrite_statement_for_write(statement, &request.params, &context)? {
                    Some(sql) => {
                        changed = true;
                        rendered.push(sql);
                    }
                    None => rendered.push(statement.to_string()),
                }
            }
            if changed {
                rendered.join("; ")
            } else {
                request.sql.clone()
            }
        }
    };

    let response = host
        .execute(HostExecuteRequest {
            request_id: request.request_id.clone(),
            sql: physical_sql,
            params: request.params.clone(),
            statement_kind: kind,
        })
        .await
        .map_err(|error| map_host_error(error, ErrorCode::SqliteExecution))?;

    let mut plugin_changes = Vec::new();
    if matches!(kind, StatementKind::WriteRewrite | StatementKind::Validation) {
        for change_request in &request.plugin_change_requests {
            let detected = host
                .detect_changes(HostDetectChangesRequest {
                    request_id: request.request_id.clone(),
                    plugin_key: change_request.plugin_key.clone(),
                    before: change_request.before.clone(),
                    after: change_request.after.clone(),
                })
                .await
                .map_err(|error| map_host_error(error, ErrorCode::DetectChanges))?;
            plugin_changes.extend(detected.changes);
        }
    }

    let rows_affected = match plan.rows_affected_mode {
        RowsAffectedMode::RowsLength => response.rows.len() as i64,
        RowsAffectedMode::SqliteChanges => response.rows_affected,
    };

    Ok(ExecuteResult {
        statement_kind: kind,
        rows: response.rows,
        rows_affected,
        last_insert_row_id: response.last_insert_row_id,
        plugin_changes,
    })
}

/// JSON-in, JSON-out wrapper around [`execute_with_host`] for embedders that
/// speak the serialized boundary protocol.
pub async fn execute_serialized<H: HostCallbacks + ?Sized>(
    host: &H,
    payload: &str,
) -> Result<String, EngineError> {
    let request = codec::decode_execute_request(payload)?;
    let result = execute_with_host(host, request).await?;
    serde_json::to_string(&result)
        .map_err(|error| EngineError::unknown(format!("failed to serialize result: {error}")))
}

/// Non-passthrough scripts contain only parsed statements by construction;
/// a raw segment here is an engine bug, not caller input.
fn parsed_statements(
    script: &[crate::sql::ScriptStatement],
) -> Result<Vec<Statement>, EngineError> {
    script
        .iter()
        .map(|statement| {
            statement.parsed().cloned().ok_or_else(|| {
                EngineError::unknown("raw segment survived classification as rewrite")
            })
        })
        .collect()
}

fn render_script(statements: &[Statement]) -> String {
    statements
        .iter()
        .map(Statement::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn enforce_validation_surface(statements: &[Statement]) -> Result<(), EngineError> {
    for statement in statements {
        let valid = classify_write_target_of(statement)
            .map(|target| target.is_validation_surface())
            .unwrap_or(false);
        if !valid {
            return Err(EngineError::rewrite_validation(
                "validation statements may only mutate state or state_all",
            ));
        }
    }
    Ok(())
}

fn classify_write_target_of(statement: &Statement) -> Option<WriteTarget> {
    match statement {
        Statement::Insert(insert) => Some(classify_write_target(&insert.table_name)),
        Statement::Update { table, .. } => match &table.relation {
            TableFactor::Table { name, .. } => Some(classify_write_target(name)),
            _ => None,
        },
        Statement::Delete(delete) => delete_target(delete),
        _ => None,
    }
}
