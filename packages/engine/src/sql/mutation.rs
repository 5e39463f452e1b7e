use serde_json::Value as JsonValue;
use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, FunctionArguments, Insert, SetExpr, Value as SqlValue,
};

use crate::sql::placeholders::placeholder_position;
use crate::EngineError;

/// One normalized insert row: evaluated values for validation plus rendered
/// SQL fragments for the physical upsert. Consumed immediately by the write
/// rewriter and never persisted.
#[derive(Debug, Clone)]
pub(crate) struct InsertMutationRow {
    pub(crate) entity_id: String,
    pub(crate) schema_key: String,
    pub(crate) file_id: String,
    pub(crate) plugin_key: String,
    pub(crate) schema_version: String,
    /// Explicit version expression evaluated to a string, when the row
    /// supplied one.
    pub(crate) version_id: Option<String>,
    pub(crate) snapshot_content: Option<JsonValue>,
    pub(crate) untracked: bool,
    pub(crate) rendered: RenderedInsertRow,
}

/// SQL fragments rendered from the original expressions, placeholder
/// positions intact. Absent optional columns get SQL-safe defaults.
#[derive(Debug, Clone)]
pub(crate) struct RenderedInsertRow {
    pub(crate) entity_id: String,
    pub(crate) schema_key: String,
    pub(crate) file_id: String,
    pub(crate) plugin_key: String,
    pub(crate) schema_version: String,
    pub(crate) version_id: Option<String>,
    pub(crate) snapshot_content: String,
    pub(crate) metadata: String,
    pub(crate) untracked: String,
}

const REQUIRED_COLUMNS: [&str; 5] = [
    "entity_id",
    "schema_key",
    "file_id",
    "plugin_key",
    "schema_version",
];

/// Extracts mutation rows from an `INSERT ... VALUES`. `Ok(None)` means the
/// shape is unsupported and the statement must fall back untouched — the
/// decision is atomic for the whole statement, never per row. `Err` means the
/// data is invalid (e.g. a malformed JSON literal) and the statement must
/// abort.
pub(crate) fn extract_insert_mutation_rows(
    insert: &Insert,
    params: &[JsonValue],
) -> Result<Option<Vec<InsertMutationRow>>, EngineError> {
    let Some(source) = &insert.source else {
        // INSERT ... DEFAULT VALUES carries no required columns.
        return Ok(None);
    };
    let SetExpr::Values(values) = &*source.body else {
        // INSERT ... SELECT is not rewritten in this pass.
        return Ok(None);
    };
    if insert.columns.is_empty() {
        // A bare VALUES list has no unambiguous column mapping.
        return Ok(None);
    }

    let column_names: Vec<String> = insert
        .columns
        .iter()
        .map(|ident| ident.value.to_lowercase())
        .collect();
    let column_index = |name: &str| column_names.iter().position(|column| column == name);

    let mut rows = Vec::with_capacity(values.rows.len());
    for row in &values.rows {
        if row.len() != column_names.len() {
            return Ok(None);
        }

        let mut required = Vec::with_capacity(REQUIRED_COLUMNS.len());
        for column in REQUIRED_COLUMNS {
            let Some(index) = column_index(column) else {
                return Ok(None);
            };
            let Some(value) = evaluate_expr(&row[index], params, false)? else {
                return Ok(None);
            };
            let Some(text) = value.as_str().filter(|text| !text.is_empty()) else {
                return Ok(None);
            };
            required.push((index, text.to_string()));
        }

        let version_id = match column_index("version_id") {
            Some(index) => {
                let Some(value) = evaluate_expr(&row[index], params, false)? else {
                    return Ok(None);
                };
                match value.as_str().filter(|text| !text.is_empty()) {
                    Some(text) => Some((index, text.to_string())),
                    None => return Ok(None),
                }
            }
            None => None,
        };

        let snapshot_content = match column_index("snapshot_content") {
            Some(index) => {
                let Some(value) = evaluate_expr(&row[index], params, true)? else {
                    return Ok(None);
                };
                match value {
                    JsonValue::Null => None,
                    other => Some((index, other)),
                }
            }
            None => None,
        };

        let untracked = match column_index("untracked") {
            Some(index) => {
                let Some(value) = evaluate_expr(&row[index], params, false)? else {
                    return Ok(None);
                };
                match value {
                    JsonValue::Bool(flag) => flag,
                    JsonValue::Number(number) => number.as_i64() != Some(0),
                    JsonValue::Null => false,
                    _ => return Ok(None),
                }
            }
            None => false,
        };

        let rendered = RenderedInsertRow {
            entity_id: row[required[0].0].to_string(),
            schema_key: row[required[1].0].to_string(),
            file_id: row[required[2].0].to_string(),
            plugin_key: row[required[3].0].to_string(),
            schema_version: row[required[4].0].to_string(),
            version_id: version_id.as_ref().map(|(index, _)| row[*index].to_string()),
            snapshot_content: snapshot_content
                .as_ref()
                .map(|(index, _)| row[*index].to_string())
                .unwrap_or_else(|| "NULL".to_string()),
            metadata: column_index("metadata")
                .map(|index| row[index].to_string())
                .unwrap_or_else(|| "NULL".to_string()),
            untracked: column_index("untracked")
                .map(|index| row[index].to_string())
                .unwrap_or_else(|| "0".to_string()),
        };

        rows.push(InsertMutationRow {
            entity_id: required[0].1.clone(),
            schema_key: required[1].1.clone(),
            file_id: required[2].1.clone(),
            plugin_key: required[3].1.clone(),
            schema_version: required[4].1.clone(),
            version_id: version_id.map(|(_, text)| text),
            snapshot_content: snapshot_content.map(|(_, value)| value),
            untracked,
            rendered,
        });
    }

    Ok(Some(rows))
}

/// Evaluates a value expression against the bound parameters. `Ok(None)`
/// marks an expression shape the rewriter does not understand (fallback);
/// `Err` marks data that can never be valid (abort).
pub(crate) fn evaluate_expr(
    expr: &Expr,
    params: &[JsonValue],
    parse_json_strings: bool,
) -> Result<Option<JsonValue>, EngineError> {
    match expr {
        Expr::Value(value) => evaluate_sql_value(value, params, parse_json_strings),
        Expr::Nested(inner) => evaluate_expr(inner, params, parse_json_strings),
        Expr::Function(function) => {
            let function_name = function.name.to_string().to_lowercase();
            if function_name != "json" {
                return Ok(None);
            }
            let FunctionArguments::List(argument_list) = &function.args else {
                return Ok(None);
            };
            if argument_list.args.len() != 1 {
                return Ok(None);
            }
            let FunctionArg::Unnamed(FunctionArgExpr::Expr(inner)) = &argument_list.args[0] else {
                return Ok(None);
            };
            evaluate_expr(inner, params, true)
        }
        _ => Ok(None),
    }
}

fn evaluate_sql_value(
    value: &SqlValue,
    params: &[JsonValue],
    parse_json_strings: bool,
) -> Result<Option<JsonValue>, EngineError> {
    match value {
        SqlValue::SingleQuotedString(text)
        | SqlValue::DoubleQuotedString(text)
        | SqlValue::TripleSingleQuotedString(text)
        | SqlValue::TripleDoubleQuotedString(text)
        | SqlValue::EscapedStringLiteral(text)
        | SqlValue::UnicodeStringLiteral(text)
        | SqlValue::NationalStringLiteral(text) => {
            if parse_json_strings {
                let parsed = serde_json::from_str::<JsonValue>(text).map_err(|error| {
                    EngineError::rewrite_validation(format!(
                        "failed to parse JSON snapshot content: {error}"
                    ))
                })?;
                Ok(Some(parsed))
            } else {
                Ok(Some(JsonValue::String(text.clone())))
            }
        }
        SqlValue::Number(number, _) => {
            if let Ok(parsed) = number.parse::<i64>() {
                return Ok(Some(JsonValue::Number(parsed.into())));
            }
            if let Ok(parsed) = number.parse::<f64>() {
                if let Some(json_number) = serde_json::Number::from_f64(parsed) {
                    return Ok(Some(JsonValue::Number(json_number)));
                }
            }
            Err(EngineError::rewrite_validation(format!(
                "unsupported numeric literal in state mutation: {number}"
            )))
        }
        SqlValue::Boolean(boolean) => Ok(Some(JsonValue::Bool(*boolean))),
        SqlValue::Null => Ok(Some(JsonValue::Null)),
        SqlValue::Placeholder(token) => {
            let Some(position) = placeholder_position(token) else {
                return Ok(None);
            };
            let Some(bound) = params.get(position - 1) else {
                return Err(EngineError::protocol_mismatch(format!(
                    "placeholder '{token}' references a parameter that was not provided"
                )));
            };
            if parse_json_strings {
                if let JsonValue::String(text) = bound {
                    if let Ok(parsed) = serde_json::from_str::<JsonValue>(text) {
                        return Ok(Some(parsed));
                    }
                }
            }
            Ok(Some(bound.clone()))
        }
        _ => Ok(None),
    }
}
