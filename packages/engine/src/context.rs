use std::collections::{HashMap, HashSet};

use serde_json::Value as JsonValue;

use crate::boundary::{HostCallbacks, HostExecuteRequest};
use crate::error_classification::map_host_error;
use crate::sql::StatementKind;
use crate::{EngineError, ErrorCode};

/// Identifies one stored schema by its `x-key`/`x-version` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaAddress {
    pub schema_key: String,
    pub schema_version: String,
}

/// Snapshot of the database facts the write pipeline needs: the active
/// version pointer, the set of known version ids, and the stored schemas the
/// script references. Loaded once per script, read-only afterwards, so every
/// statement in a script validates against the same picture.
#[derive(Debug, Clone, Default)]
pub struct EngineContext {
    pub active_version_id: Option<String>,
    pub existing_version_ids: HashSet<String>,
    pub schemas: HashMap<SchemaAddress, JsonValue>,
}

impl EngineContext {
    pub fn has_version(&self, version_id: &str) -> bool {
        self.existing_version_ids.contains(version_id)
    }

    pub fn schema(&self, address: &SchemaAddress) -> Option<&JsonValue> {
        self.schemas.get(address)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        active_version_id: Option<&str>,
        version_ids: &[&str],
        schemas: Vec<(SchemaAddress, JsonValue)>,
    ) -> Self {
        Self {
            active_version_id: active_version_id.map(str::to_string),
            existing_version_ids: version_ids.iter().map(|id| id.to_string()).collect(),
            schemas: schemas.into_iter().collect(),
        }
    }
}

const ACTIVE_VERSION_SQL: &str = "SELECT version_id FROM active_version LIMIT 1";
const VERSION_IDS_SQL: &str = "SELECT id FROM version";
const STORED_SCHEMA_SQL: &str = "SELECT value FROM stored_schema \
    WHERE json_extract(value, '$.\"x-key\"') = ?1 \
    AND json_extract(value, '$.\"x-version\"') = ?2 \
    ORDER BY rowid DESC LIMIT 1";

/// Loads the write-pipeline context through the host boundary. All lookups
/// run as passthrough reads inside the caller's transaction, so staged but
/// uncommitted versions and schemas are visible.
pub(crate) async fn load_context<H: HostCallbacks + ?Sized>(
    host: &H,
    request_id: &str,
    schema_addresses: &HashSet<SchemaAddress>,
) -> Result<EngineContext, EngineError> {
    let mut context = EngineContext::default();

    let active = query(host, request_id, ACTIVE_VERSION_SQL, Vec::new()).await?;
    context.active_version_id = active
        .first()
        .and_then(|row| row_column(row, "version_id"))
        .and_then(|value| value.as_str().map(str::to_string));

    let versions = query(host, request_id, VERSION_IDS_SQL, Vec::new()).await?;
    for row in &versions {
        if let Some(id) = row_column(row, "id").and_then(JsonValue::as_str) {
            context.existing_version_ids.insert(id.to_string());
        }
    }

    for address in schema_addresses {
        let rows = query(
            host,
            request_id,
            STORED_SCHEMA_SQL,
            vec![
                JsonValue::String(address.schema_key.clone()),
                JsonValue::String(address.schema_version.clone()),
            ],
        )
        .await?;
        if let Some(schema) = rows.first().and_then(decode_stored_schema_row) {
            context.schemas.insert(address.clone(), schema);
        }
    }

    Ok(context)
}

async fn query<H: HostCallbacks + ?Sized>(
    host: &H,
    request_id: &str,
    sql: &str,
    params: Vec<JsonValue>,
) -> Result<Vec<JsonValue>, EngineError> {
    let response = host
        .execute(HostExecuteRequest {
            request_id: request_id.to_string(),
            sql: sql.to_string(),
            params,
            statement_kind: StatementKind::Passthrough,
        })
        .await
        .map_err(|error| map_host_error(error, ErrorCode::SqliteExecution))?;
    Ok(response.rows)
}

fn row_column<'a>(row: &'a JsonValue, column: &str) -> Option<&'a JsonValue> {
    match row {
        JsonValue::Object(map) => map.get(column),
        // Positional row encodings surface single-column results as 1-element
        // arrays.
        JsonValue::Array(values) => values.first(),
        _ => None,
    }
}

/// The `value` column holds the schema either as a JSON string or as an
/// already-decoded object, depending on how the host serializes rows.
fn decode_stored_schema_row(row: &JsonValue) -> Option<JsonValue> {
    match row_column(row, "value")? {
        JsonValue::String(text) => serde_json::from_str(text).ok(),
        object @ JsonValue::Object(_) => Some(object.clone()),
        _ => None,
    }
}
