use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Stable error taxonomy for everything that crosses the engine boundary.
///
/// The set of codes is append-only: adding a code is a minor change, removing
/// or renaming one is a breaking change, and message text may change at any
/// time. Callers must match on `code` and never on `message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SqliteExecution,
    DetectChanges,
    RewriteValidation,
    UnsupportedSqliteFeature,
    ProtocolMismatch,
    Timeout,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::SqliteExecution => "SQLITE_EXECUTION",
            ErrorCode::DetectChanges => "DETECT_CHANGES",
            ErrorCode::RewriteValidation => "REWRITE_VALIDATION",
            ErrorCode::UnsupportedSqliteFeature => "UNSUPPORTED_SQLITE_FEATURE",
            ErrorCode::ProtocolMismatch => "PROTOCOL_MISMATCH",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(code: &str) -> Option<ErrorCode> {
        match code {
            "SQLITE_EXECUTION" => Some(ErrorCode::SqliteExecution),
            "DETECT_CHANGES" => Some(ErrorCode::DetectChanges),
            "REWRITE_VALIDATION" => Some(ErrorCode::RewriteValidation),
            "UNSUPPORTED_SQLITE_FEATURE" => Some(ErrorCode::UnsupportedSqliteFeature),
            "PROTOCOL_MISMATCH" => Some(ErrorCode::ProtocolMismatch),
            "TIMEOUT" => Some(ErrorCode::Timeout),
            "UNKNOWN" => Some(ErrorCode::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

impl EngineError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn sqlite_execution(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SqliteExecution, message)
    }

    pub fn detect_changes(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DetectChanges, message)
    }

    pub fn rewrite_validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RewriteValidation, message)
    }

    pub fn unsupported_feature(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnsupportedSqliteFeature, message)
    }

    pub fn protocol_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProtocolMismatch, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message)
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for EngineError {}
