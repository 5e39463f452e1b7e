use sqlparser::ast::{
    Ident, Query, Select, SetExpr, Statement, TableAlias, TableFactor, TableWithJoins,
};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;

use crate::sql::surface::{
    classify_write_target, WriteTarget, ACTIVE_VERSION_TABLE, STATE_BY_VERSION, STATE_CACHE_TABLE,
    TRANSACTION_STATE_TABLE,
};
use crate::EngineError;

/// Rewrites state-surface table references into the segment-union subquery.
/// Returns whether anything changed, so untouched statements can keep their
/// original text byte for byte.
pub(crate) fn rewrite_statement_for_read(statement: &mut Statement) -> Result<bool, EngineError> {
    match statement {
        Statement::Query(query) => rewrite_query(query),
        _ => Ok(false),
    }
}

fn rewrite_query(query: &mut Query) -> Result<bool, EngineError> {
    let mut changed = false;
    if let Some(with_clause) = &mut query.with {
        for cte in &mut with_clause.cte_tables {
            changed |= rewrite_query(&mut cte.query)?;
        }
    }
    changed |= rewrite_set_expr(&mut query.body)?;
    Ok(changed)
}

fn rewrite_set_expr(set_expr: &mut SetExpr) -> Result<bool, EngineError> {
    match set_expr {
        SetExpr::Select(select) => rewrite_select(select),
        SetExpr::Query(query) => rewrite_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            let left_changed = rewrite_set_expr(left)?;
            let right_changed = rewrite_set_expr(right)?;
            Ok(left_changed || right_changed)
        }
        _ => Ok(false),
    }
}

fn rewrite_select(select: &mut Select) -> Result<bool, EngineError> {
    let mut changed = false;
    for table_with_joins in &mut select.from {
        changed |= rewrite_table_with_joins(table_with_joins)?;
    }
    Ok(changed)
}

fn rewrite_table_with_joins(table_with_joins: &mut TableWithJoins) -> Result<bool, EngineError> {
    let mut changed = rewrite_table_factor(&mut table_with_joins.relation)?;
    for join in &mut table_with_joins.joins {
        changed |= rewrite_table_factor(&mut join.relation)?;
    }
    Ok(changed)
}

fn rewrite_table_factor(table_factor: &mut TableFactor) -> Result<bool, EngineError> {
    match table_factor {
        TableFactor::Table {
            name, alias, args, ..
        } => {
            let target = classify_write_target(name);
            if args.is_some() || !target.is_state_surface() {
                return Ok(false);
            }

            let surface_name = name
                .0
                .last()
                .map(|part| part.value.clone())
                .unwrap_or_default();
            let subquery = build_segment_union_subquery(target)?;
            let derived_alias = alias.take().unwrap_or_else(|| TableAlias {
                name: Ident::new(surface_name),
                columns: Vec::new(),
            });
            *table_factor = TableFactor::Derived {
                lateral: false,
                subquery: Box::new(subquery),
                alias: Some(derived_alias),
            };
            Ok(true)
        }
        TableFactor::Derived { subquery, .. } => rewrite_query(subquery),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => rewrite_table_with_joins(table_with_joins),
        TableFactor::Pivot { table, .. } => rewrite_table_factor(table),
        TableFactor::Unpivot { table, .. } => rewrite_table_factor(table),
        TableFactor::MatchRecognize { table, .. } => rewrite_table_factor(table),
        _ => Ok(false),
    }
}

const STATE_COLUMNS: &str = "entity_id, schema_key, file_id, plugin_key, schema_version, \
    version_id, snapshot_content, metadata, untracked";
const STATE_KEY: &str = "entity_id, schema_key, file_id, version_id";

/// Builds the union over the three physical segments. Staging outranks the
/// cache, which outranks the committed `state_by_version` relation;
/// ROW_NUMBER keeps exactly one row per state key. Committed state sits in
/// the same relation the update/delete rewrites mutate, so a rewritten read
/// always sees prior physical writes.
fn build_segment_union_subquery(target: WriteTarget) -> Result<Query, EngineError> {
    let version_filter = if target == WriteTarget::State {
        format!(" AND version_id IN (SELECT version_id FROM {ACTIVE_VERSION_TABLE})")
    } else {
        String::new()
    };

    let sql = format!(
        "SELECT {STATE_COLUMNS} FROM (\
            SELECT *, ROW_NUMBER() OVER (\
                PARTITION BY {STATE_KEY} \
                ORDER BY segment_rank, {STATE_KEY}\
            ) AS segment_pick FROM (\
                SELECT {STATE_COLUMNS}, 0 AS segment_rank FROM {TRANSACTION_STATE_TABLE} \
                UNION ALL \
                SELECT {STATE_COLUMNS}, 1 AS segment_rank FROM {STATE_CACHE_TABLE} \
                UNION ALL \
                SELECT {STATE_COLUMNS}, 2 AS segment_rank FROM {STATE_BY_VERSION}\
            )\
        ) WHERE segment_pick = 1{version_filter}"
    );

    let statements = Parser::parse_sql(&SQLiteDialect {}, &sql).map_err(|error| {
        EngineError::unknown(format!("failed to construct read rewrite subquery: {error}"))
    })?;
    let statement = statements.into_iter().next().ok_or_else(|| {
        EngineError::unknown("read rewrite subquery produced no statement")
    })?;
    match statement {
        Statement::Query(query) => Ok(*query),
        _ => Err(EngineError::unknown(
            "read rewrite subquery must be a SELECT",
        )),
    }
}
