use serde_json::Value as JsonValue;

use crate::{EngineError, ErrorCode};

/// Keyword heuristics for failures that arrive without a recognized code.
///
/// Precedence is fixed and load-bearing: a message matching an earlier rule
/// must never be classified by a later one.
pub fn classify_error_message(message: &str) -> ErrorCode {
    let lower = message.to_lowercase();

    if lower.contains("detect") && lower.contains("change") {
        return ErrorCode::DetectChanges;
    }
    if lower.contains("sqlite") || lower.contains("no such table") {
        return ErrorCode::SqliteExecution;
    }
    if lower.contains("unsupported") || lower.contains("dialect") {
        return ErrorCode::UnsupportedSqliteFeature;
    }
    if lower.contains("protocol") || lower.contains("callback") {
        return ErrorCode::ProtocolMismatch;
    }
    if lower.contains("timeout") {
        return ErrorCode::Timeout;
    }
    if lower.contains("validation") || lower.contains("rewrite") {
        return ErrorCode::RewriteValidation;
    }

    ErrorCode::Unknown
}

/// Normalizes an arbitrary JSON payload produced by a boundary host into the
/// closed taxonomy. An object carrying a recognized `code` passes through
/// unchanged; an object or string carrying only a message is classified by
/// keywords; anything else is `UNKNOWN`.
pub fn normalize_boundary_error(raw: &JsonValue) -> EngineError {
    match raw {
        JsonValue::Object(record) => {
            let message = record
                .get("message")
                .and_then(|value| value.as_str())
                .unwrap_or("boundary host reported an error")
                .to_string();

            if let Some(code) = record
                .get("code")
                .and_then(|value| value.as_str())
                .and_then(ErrorCode::parse)
            {
                let mut error = EngineError::new(code, message);
                if let Some(details) = record.get("details") {
                    error = error.with_details(details.clone());
                }
                return error;
            }

            EngineError::new(classify_error_message(&message), message)
        }
        JsonValue::String(message) => {
            EngineError::new(classify_error_message(message), message.clone())
        }
        other => EngineError::unknown(format!("unclassifiable boundary failure: {other}")),
    }
}

/// Re-codes a host failure before it crosses back to the caller. Errors that
/// already carry a meaningful code pass through; `UNKNOWN` errors are
/// classified by message, falling back to the call-site default so raw host
/// error text never leaks unclassified.
pub(crate) fn map_host_error(error: EngineError, default_code: ErrorCode) -> EngineError {
    if error.code != ErrorCode::Unknown {
        return error;
    }
    let classified = classify_error_message(&error.message);
    let code = if classified == ErrorCode::Unknown {
        default_code
    } else {
        classified
    };
    EngineError {
        code,
        message: error.message,
        details: error.details,
    }
}
