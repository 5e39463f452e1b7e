//! Strict decode of wire envelopes. Shape errors always map to
//! `PROTOCOL_MISMATCH` and are checked before any semantic interpretation of
//! the payload, so a malformed envelope can never be misclassified as a
//! semantic failure.

use serde_json::Value as JsonValue;

use crate::boundary::wire::{ExecuteRequest, PluginChangeRequest};
use crate::EngineError;

pub fn decode_execute_request(raw: &str) -> Result<ExecuteRequest, EngineError> {
    let value: JsonValue = serde_json::from_str(raw).map_err(|error| {
        EngineError::protocol_mismatch(format!("execute request is not valid JSON: {error}"))
    })?;
    decode_execute_request_value(&value)
}

pub fn decode_execute_request_value(value: &JsonValue) -> Result<ExecuteRequest, EngineError> {
    let record = value.as_object().ok_or_else(|| {
        EngineError::protocol_mismatch("execute request must be a JSON object")
    })?;

    let request_id = required_string(record.get("requestId"), "requestId")?;
    let sql = required_string(record.get("sql"), "sql")?;

    let params = match record.get("params") {
        None | Some(JsonValue::Null) => Vec::new(),
        Some(JsonValue::Array(values)) => values.clone(),
        Some(other) => {
            return Err(EngineError::protocol_mismatch(format!(
                "params must be a JSON array, got {}",
                json_type_name(other)
            )))
        }
    };

    let plugin_change_requests = match record.get("pluginChangeRequests") {
        None | Some(JsonValue::Null) => Vec::new(),
        Some(JsonValue::Array(values)) => values
            .iter()
            .map(decode_plugin_change_request)
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => {
            return Err(EngineError::protocol_mismatch(format!(
                "pluginChangeRequests must be a JSON array, got {}",
                json_type_name(other)
            )))
        }
    };

    Ok(ExecuteRequest {
        request_id,
        sql,
        params,
        plugin_change_requests,
    })
}

fn decode_plugin_change_request(value: &JsonValue) -> Result<PluginChangeRequest, EngineError> {
    let record = value.as_object().ok_or_else(|| {
        EngineError::protocol_mismatch("plugin change request must be a JSON object")
    })?;

    let plugin_key = required_string(record.get("pluginKey"), "pluginKey")?;
    let before = decode_byte_array(record.get("before"), "before")?;
    let after = decode_byte_array(record.get("after"), "after")?;

    Ok(PluginChangeRequest {
        plugin_key,
        before,
        after,
    })
}

/// Decodes a required byte-array field. Every element must be an integer in
/// 0–255; anything else is a protocol mismatch, never a silent clamp.
pub fn decode_byte_array(
    value: Option<&JsonValue>,
    field: &str,
) -> Result<Vec<u8>, EngineError> {
    let values = match value {
        None | Some(JsonValue::Null) => return Ok(Vec::new()),
        Some(JsonValue::Array(values)) => values,
        Some(other) => {
            return Err(EngineError::protocol_mismatch(format!(
                "{field} must be a JSON array of bytes, got {}",
                json_type_name(other)
            )))
        }
    };

    let mut bytes = Vec::with_capacity(values.len());
    for (index, element) in values.iter().enumerate() {
        let byte = element
            .as_u64()
            .filter(|value| *value <= 255)
            .ok_or_else(|| {
                EngineError::protocol_mismatch(format!(
                    "{field}[{index}] is not a valid byte (0-255): {element}"
                ))
            })?;
        bytes.push(byte as u8);
    }
    Ok(bytes)
}

/// Interprets a parameter value as a byte buffer when — and only when — it is
/// a non-empty array whose every element is a valid byte. Ordinary numeric
/// arrays that fail that test are left to the caller as plain arrays, so
/// false-positive coercion never happens.
pub fn param_as_bytes(value: &JsonValue) -> Option<Vec<u8>> {
    let values = value.as_array()?;
    if values.is_empty() {
        return None;
    }
    let mut bytes = Vec::with_capacity(values.len());
    for element in values {
        let byte = element.as_u64().filter(|value| *value <= 255)?;
        bytes.push(byte as u8);
    }
    Some(bytes)
}

fn required_string(value: Option<&JsonValue>, field: &str) -> Result<String, EngineError> {
    match value {
        Some(JsonValue::String(text)) => Ok(text.clone()),
        Some(other) => Err(EngineError::protocol_mismatch(format!(
            "{field} must be a string, got {}",
            json_type_name(other)
        ))),
        None => Err(EngineError::protocol_mismatch(format!(
            "missing required field {field}"
        ))),
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{decode_byte_array, decode_execute_request, param_as_bytes};
    use crate::ErrorCode;

    #[test]
    fn decodes_a_full_execute_request() {
        let raw = r#"{
            "requestId": "req-1",
            "sql": "SELECT 1",
            "params": ["a", 2, null],
            "pluginChangeRequests": [
                { "pluginKey": "json", "before": [], "after": [1, 2, 255] }
            ]
        }"#;
        let request = decode_execute_request(raw).expect("request should decode");
        assert_eq!(request.request_id, "req-1");
        assert_eq!(request.params.len(), 3);
        assert_eq!(request.plugin_change_requests[0].after, vec![1, 2, 255]);
        assert!(request.plugin_change_requests[0].before.is_empty());
    }

    #[test]
    fn rejects_non_array_params_before_any_semantic_interpretation() {
        // The SQL would classify as a validation statement, but the shape
        // check must win.
        let raw = r#"{
            "requestId": "req-2",
            "sql": "INSERT INTO state (entity_id) VALUES ('e')",
            "params": {"not": "an array"}
        }"#;
        let error = decode_execute_request(raw).expect_err("decode should fail");
        assert_eq!(error.code, ErrorCode::ProtocolMismatch);
    }

    #[test]
    fn rejects_out_of_range_byte_values() {
        let error = decode_byte_array(Some(&json!([0, 255, 256])), "before")
            .expect_err("256 is not a byte");
        assert_eq!(error.code, ErrorCode::ProtocolMismatch);

        let error =
            decode_byte_array(Some(&json!([-1])), "after").expect_err("-1 is not a byte");
        assert_eq!(error.code, ErrorCode::ProtocolMismatch);
    }

    #[test]
    fn reconstitutes_byte_buffers_only_for_all_byte_arrays() {
        assert_eq!(param_as_bytes(&json!([1, 2, 3])), Some(vec![1, 2, 3]));
        assert_eq!(param_as_bytes(&json!([1, 300])), None);
        assert_eq!(param_as_bytes(&json!([1.5, 2])), None);
        assert_eq!(param_as_bytes(&json!([])), None);
        assert_eq!(param_as_bytes(&json!("text")), None);
    }
}
