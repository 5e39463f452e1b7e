use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::sql::StatementKind;

/// One statement execution as issued by the embedding application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub request_id: String,
    pub sql: String,
    #[serde(default)]
    pub params: Vec<JsonValue>,
    #[serde(default)]
    pub plugin_change_requests: Vec<PluginChangeRequest>,
}

/// Caller-supplied before/after byte pair for plugin change detection.
/// Empty `before` bytes mean the file is being created; the boundary host
/// must not synthesize a zero-length comparison target for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PluginChangeRequest {
    pub plugin_key: String,
    #[serde(default)]
    pub before: Vec<u8>,
    #[serde(default)]
    pub after: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResult {
    pub statement_kind: StatementKind,
    pub rows: Vec<JsonValue>,
    pub rows_affected: i64,
    pub last_insert_row_id: Option<i64>,
    pub plugin_changes: Vec<JsonValue>,
}

/// Physical SQL handed to the boundary host for execution against its live
/// connection, inside the caller's already-open transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostExecuteRequest {
    pub request_id: String,
    pub sql: String,
    #[serde(default)]
    pub params: Vec<JsonValue>,
    pub statement_kind: StatementKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostExecuteResponse {
    #[serde(default)]
    pub rows: Vec<JsonValue>,
    pub rows_affected: i64,
    #[serde(default)]
    pub last_insert_row_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostDetectChangesRequest {
    pub request_id: String,
    pub plugin_key: String,
    #[serde(default)]
    pub before: Vec<u8>,
    #[serde(default)]
    pub after: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostDetectChangesResponse {
    #[serde(default)]
    pub changes: Vec<JsonValue>,
}
