use cel::Program;
use jsonschema::JSONSchema;
use serde_json::Value as JsonValue;

use crate::context::{EngineContext, SchemaAddress};
use crate::sql::mutation::InsertMutationRow;
use crate::EngineError;

/// Runs the full validation gate for one extracted row. Order is fixed:
/// version existence, schema presence, CEL expression compile checks, then
/// JSON Schema validation of the snapshot content.
pub(crate) fn validate_mutation_row(
    context: &EngineContext,
    row: &InsertMutationRow,
    resolved_version_id: &str,
) -> Result<(), EngineError> {
    if !context.has_version(resolved_version_id) {
        return Err(EngineError::rewrite_validation(format!(
            "Version with id '{resolved_version_id}' does not exist"
        )));
    }

    let address = SchemaAddress {
        schema_key: row.schema_key.clone(),
        schema_version: row.schema_version.clone(),
    };
    let Some(schema) = context.schema(&address) else {
        return Err(EngineError::rewrite_validation(format!(
            "schema '{}' ({}) is not stored",
            row.schema_key, row.schema_version
        )));
    };

    compile_embedded_cel_expressions(schema)?;

    if let Some(snapshot) = &row.snapshot_content {
        validate_snapshot_content(schema, &row.schema_key, &row.schema_version, snapshot)?;
    }

    Ok(())
}

/// Walks the stored schema and compiles every `x-default` and
/// `x-override-columns` string it finds. A schema carrying an expression
/// that can never evaluate is rejected at write time rather than surfacing
/// later during materialization.
fn compile_embedded_cel_expressions(schema: &JsonValue) -> Result<(), EngineError> {
    match schema {
        JsonValue::Object(map) => {
            for (key, value) in map {
                if key == "x-default" || key == "x-override-columns" {
                    compile_cel_values(value)?;
                }
                compile_embedded_cel_expressions(value)?;
            }
            Ok(())
        }
        JsonValue::Array(values) => {
            for value in values {
                compile_embedded_cel_expressions(value)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn compile_cel_values(value: &JsonValue) -> Result<(), EngineError> {
    match value {
        JsonValue::String(expression) => {
            Program::compile(expression).map_err(|error| {
                EngineError::rewrite_validation(format!(
                    "failed to parse CEL expression '{expression}': {error}"
                ))
            })?;
            Ok(())
        }
        JsonValue::Object(map) => {
            for nested in map.values() {
                compile_cel_values(nested)?;
            }
            Ok(())
        }
        JsonValue::Array(values) => {
            for nested in values {
                compile_cel_values(nested)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn validate_snapshot_content(
    schema: &JsonValue,
    schema_key: &str,
    schema_version: &str,
    snapshot: &JsonValue,
) -> Result<(), EngineError> {
    let compiled = JSONSchema::compile(schema).map_err(|error| {
        EngineError::rewrite_validation(format!(
            "failed to compile schema '{schema_key}' ({schema_version}): {error}"
        ))
    })?;

    if let Err(errors) = compiled.validate(snapshot) {
        let mut parts = Vec::new();
        for error in errors {
            let path = error.instance_path.to_string();
            let message = error.to_string();
            if path.is_empty() {
                parts.push(message);
            } else {
                parts.push(format!("{path} {message}"));
            }
        }
        return Err(EngineError::rewrite_validation(format!(
            "snapshot_content does not match schema '{schema_key}' ({schema_version}): {}",
            parts.join("; ")
        )));
    }

    Ok(())
}
