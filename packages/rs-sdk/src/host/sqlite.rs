use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params_from_iter, Connection, Row};
use serde_json::{Map, Number, Value as JsonValue};
use stateline_engine::{
    param_as_bytes, split_sql_statements, EngineError, HostCallbacks, HostDetectChangesRequest,
    HostDetectChangesResponse, HostExecuteRequest, HostExecuteResponse, StatementKind,
};

/// Change detector for one plugin key. `before` is `None` when the file is
/// being created; `after` is always present.
pub type DetectChangesFn =
    Box<dyn Fn(Option<&[u8]>, &[u8]) -> Result<Vec<JsonValue>, EngineError> + Send>;

/// Host backed by an owned rusqlite connection. Statements run on the
/// connection as-is; the host never opens or closes transactions, so the
/// caller's transaction scope is preserved.
pub struct SqliteHost {
    conn: Mutex<Connection>,
    plugins: Mutex<HashMap<String, DetectChangesFn>>,
}

impl SqliteHost {
    pub fn in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()
            .map_err(|err| EngineError::sqlite_execution(err.to_string()))?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            plugins: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_plugin(&self, plugin_key: impl Into<String>, detect: DetectChangesFn) {
        if let Ok(mut plugins) = self.plugins.lock() {
            plugins.insert(plugin_key.into(), detect);
        }
    }

    /// Runs setup SQL directly against the connection, bypassing the engine.
    pub fn execute_batch(&self, sql: &str) -> Result<(), EngineError> {
        let conn = lock(&self.conn)?;
        conn.execute_batch(sql)
            .map_err(|err| EngineError::sqlite_execution(err.to_string()))
    }
}

#[async_trait(?Send)]
impl HostCallbacks for SqliteHost {
    async fn execute(
        &self,
        request: HostExecuteRequest,
    ) -> Result<HostExecuteResponse, EngineError> {
        let conn = lock(&self.conn)?;
        let pieces = split_sql_statements(&request.sql)
            .map_err(|err| EngineError::sqlite_execution(err.to_string()))?;
        let params: Vec<rusqlite::types::Value> =
            request.params.iter().map(json_to_sql_value).collect();

        let mut rows = Vec::new();
        let mut rows_affected: i64 = 0;
        let mut last_insert_row_id = None;
        // Rewritten scripts carry explicit `?N` placeholders, so every piece
        // binds from position 1 of the shared params array. Passthrough
        // scripts keep their original bare `?` tokens, which SQLite numbers
        // per statement; a running offset keeps those consuming the shared
        // array left to right across pieces.
        let mut consumed = 0usize;
        for piece in &pieces {
            let mut stmt = conn
                .prepare(piece)
                .map_err(|err| EngineError::sqlite_execution(err.to_string()))?;

            let bound = stmt.parameter_count();
            let start = if request.statement_kind == StatementKind::Passthrough {
                consumed
            } else {
                0
            };
            if start + bound > params.len() {
                return Err(EngineError::protocol_mismatch(format!(
                    "script binds {} parameters but only {} were provided",
                    start + bound,
                    params.len()
                )));
            }
            let bound_params = params[start..start + bound].iter().cloned();
            consumed = start + bound;

            if stmt.column_count() > 0 {
                let columns: Vec<String> = stmt
                    .column_names()
                    .into_iter()
                    .map(|name| name.to_string())
                    .collect();
                let mut result = stmt
                    .query(params_from_iter(bound_params))
                    .map_err(|err| EngineError::sqlite_execution(err.to_string()))?;
                while let Some(row) = result
                    .next()
                    .map_err(|err| EngineError::sqlite_execution(err.to_string()))?
                {
                    rows.push(map_row(row, &columns)?);
                }
            } else {
                let rowid_before = conn.last_insert_rowid();
                let changed = stmt
                    .execute(params_from_iter(bound_params))
                    .map_err(|err| EngineError::sqlite_execution(err.to_string()))?;
                rows_affected += changed as i64;
                // SQLite only moves last_insert_rowid on a successful INSERT;
                // pure reads and updates must not surface a stale id.
                let rowid_after = conn.last_insert_rowid();
                if rowid_after != rowid_before {
                    last_insert_row_id = Some(rowid_after);
                }
            }
        }

        Ok(HostExecuteResponse {
            rows,
            rows_affected,
            last_insert_row_id,
        })
    }

    async fn detect_changes(
        &self,
        request: HostDetectChangesRequest,
    ) -> Result<HostDetectChangesResponse, EngineError> {
        let plugins = lock(&self.plugins)?;
        let detect = plugins.get(&request.plugin_key).ok_or_else(|| {
            EngineError::detect_changes(format!(
                "no plugin registered for key '{}'",
                request.plugin_key
            ))
        })?;

        let before = if request.before.is_empty() {
            None
        } else {
            Some(request.before.as_slice())
        };
        let changes = detect(before, &request.after)?;
        Ok(HostDetectChangesResponse { changes })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<std::sync::MutexGuard<'_, T>, EngineError> {
    mutex
        .lock()
        .map_err(|_| EngineError::sqlite_execution("sqlite mutex poisoned"))
}

fn map_row(row: &Row<'_>, columns: &[String]) -> Result<JsonValue, EngineError> {
    let mut record = Map::with_capacity(columns.len());
    for (idx, column) in columns.iter().enumerate() {
        let value = row
            .get_ref(idx)
            .map_err(|err| EngineError::sqlite_execution(err.to_string()))?;
        let json = match value {
            rusqlite::types::ValueRef::Null => JsonValue::Null,
            rusqlite::types::ValueRef::Integer(value) => JsonValue::Number(value.into()),
            rusqlite::types::ValueRef::Real(value) => Number::from_f64(value)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            rusqlite::types::ValueRef::Text(value) => {
                JsonValue::String(String::from_utf8_lossy(value).to_string())
            }
            rusqlite::types::ValueRef::Blob(value) => JsonValue::Array(
                value.iter().map(|byte| JsonValue::Number((*byte).into())).collect(),
            ),
        };
        record.insert(column.clone(), json);
    }
    Ok(JsonValue::Object(record))
}

fn json_to_sql_value(value: &JsonValue) -> rusqlite::types::Value {
    match value {
        JsonValue::Null => rusqlite::types::Value::Null,
        JsonValue::Bool(flag) => rusqlite::types::Value::Integer(*flag as i64),
        JsonValue::Number(number) => {
            if let Some(integer) = number.as_i64() {
                rusqlite::types::Value::Integer(integer)
            } else {
                rusqlite::types::Value::Real(number.as_f64().unwrap_or(0.0))
            }
        }
        JsonValue::String(text) => rusqlite::types::Value::Text(text.clone()),
        array @ JsonValue::Array(_) => match param_as_bytes(array) {
            Some(bytes) => rusqlite::types::Value::Blob(bytes),
            None => rusqlite::types::Value::Text(array.to_string()),
        },
        object @ JsonValue::Object(_) => rusqlite::types::Value::Text(object.to_string()),
    }
}
