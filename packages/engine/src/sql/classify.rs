use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    Delete, FromTable, Query, SetExpr, Statement, TableFactor, TableWithJoins,
};

use crate::sql::parser::ScriptStatement;
use crate::sql::surface::{classify_write_target, is_read_surface_name, WriteTarget};

/// Routing decision for one statement. Closed enum; external integrators
/// depend on the serialized names, which are append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    ReadRewrite,
    WriteRewrite,
    Validation,
    Passthrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessMode {
    Full,
    None,
}

/// How `rows_affected` is derived: returned-row count for reads and
/// passthrough, engine-reported mutation count for writes and validation
/// (multi-row CTE writes do not echo one row per mutation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowsAffectedMode {
    RowsLength,
    SqliteChanges,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutePlan {
    pub statement_kind: StatementKind,
    pub preprocess_mode: PreprocessMode,
    pub rows_affected_mode: RowsAffectedMode,
}

impl ExecutePlan {
    pub fn for_kind(statement_kind: StatementKind) -> Self {
        let preprocess_mode = match statement_kind {
            StatementKind::Passthrough => PreprocessMode::None,
            _ => PreprocessMode::Full,
        };
        let rows_affected_mode = match statement_kind {
            StatementKind::ReadRewrite | StatementKind::Passthrough => RowsAffectedMode::RowsLength,
            StatementKind::WriteRewrite | StatementKind::Validation => {
                RowsAffectedMode::SqliteChanges
            }
        };
        ExecutePlan {
            statement_kind,
            preprocess_mode,
            rows_affected_mode,
        }
    }
}

/// Pure, total classification of one parsed statement. Unknown shapes are
/// passthrough by construction: the rewrite surface is a closed allowlist,
/// never a blocklist.
pub fn classify_statement(statement: &Statement) -> StatementKind {
    match statement {
        Statement::Query(query) => {
            if query_references_state_surface(query) {
                StatementKind::ReadRewrite
            } else {
                StatementKind::Passthrough
            }
        }
        Statement::Insert(insert) => kind_for_write_target(classify_write_target(&insert.table_name)),
        Statement::Update { table, .. } => match &table.relation {
            TableFactor::Table { name, .. } => kind_for_write_target(classify_write_target(name)),
            _ => StatementKind::Passthrough,
        },
        Statement::Delete(delete) => match delete_target(delete) {
            Some(target) => kind_for_write_target(target),
            None => StatementKind::Passthrough,
        },
        _ => StatementKind::Passthrough,
    }
}

/// Script-level routing: any raw segment or non-CRUD statement makes the
/// whole script passthrough; otherwise validation outranks write, which
/// outranks read.
pub fn classify_script(script: &[ScriptStatement]) -> StatementKind {
    let mut saw_read = false;
    let mut saw_write = false;
    let mut saw_validation = false;

    for statement in script {
        let Some(parsed) = statement.parsed() else {
            return StatementKind::Passthrough;
        };
        if !matches!(
            parsed,
            Statement::Query(_) | Statement::Insert(_) | Statement::Update { .. } | Statement::Delete(_)
        ) {
            return StatementKind::Passthrough;
        }
        match classify_statement(parsed) {
            StatementKind::Validation => saw_validation = true,
            StatementKind::WriteRewrite => saw_write = true,
            StatementKind::ReadRewrite => saw_read = true,
            StatementKind::Passthrough => {}
        }
    }

    if saw_validation {
        StatementKind::Validation
    } else if saw_write {
        StatementKind::WriteRewrite
    } else if saw_read {
        StatementKind::ReadRewrite
    } else {
        StatementKind::Passthrough
    }
}

fn kind_for_write_target(target: WriteTarget) -> StatementKind {
    if target.is_validation_surface() {
        StatementKind::Validation
    } else if target.is_state_surface() || target == WriteTarget::File {
        StatementKind::WriteRewrite
    } else {
        StatementKind::Passthrough
    }
}

pub(crate) fn delete_target(delete: &Delete) -> Option<WriteTarget> {
    let tables = match &delete.from {
        FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
    };
    let first = tables.first()?;
    match &first.relation {
        TableFactor::Table { name, .. } => Some(classify_write_target(name)),
        _ => None,
    }
}

pub(crate) fn query_references_state_surface(query: &Query) -> bool {
    if let Some(with_clause) = &query.with {
        if with_clause
            .cte_tables
            .iter()
            .any(|cte| query_references_state_surface(&cte.query))
        {
            return true;
        }
    }
    set_expr_references_state_surface(&query.body)
}

fn set_expr_references_state_surface(set_expr: &SetExpr) -> bool {
    match set_expr {
        SetExpr::Select(select) => select
            .from
            .iter()
            .any(table_with_joins_references_state_surface),
        SetExpr::Query(query) => query_references_state_surface(query),
        SetExpr::SetOperation { left, right, .. } => {
            set_expr_references_state_surface(left) || set_expr_references_state_surface(right)
        }
        _ => false,
    }
}

fn table_with_joins_references_state_surface(table_with_joins: &TableWithJoins) -> bool {
    table_factor_references_state_surface(&table_with_joins.relation)
        || table_with_joins
            .joins
            .iter()
            .any(|join| table_factor_references_state_surface(&join.relation))
}

fn table_factor_references_state_surface(table_factor: &TableFactor) -> bool {
    match table_factor {
        TableFactor::Table { name, .. } => is_read_surface_name(name),
        TableFactor::Derived { subquery, .. } => query_references_state_surface(subquery),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => table_with_joins_references_state_surface(table_with_joins),
        _ => false,
    }
}
