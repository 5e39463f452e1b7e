//! SQLite-backed embedding of the stateline engine.
//!
//! [`Stateline`] pairs the portable rewrite engine with a [`SqliteHost`]
//! owning a rusqlite connection, so applications can issue SQL against the
//! public state surfaces without speaking the boundary protocol themselves.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value as JsonValue;
use stateline_engine::execute_with_host;

mod host;

pub use host::{DetectChangesFn, SqliteHost};
pub use stateline_engine::{
    EngineError, ErrorCode, ExecuteRequest, ExecuteResult, HostCallbacks, PluginChangeRequest,
    StatementKind,
};

pub struct Stateline {
    host: SqliteHost,
    next_request_id: AtomicU64,
}

impl Stateline {
    pub fn in_memory() -> Result<Self, EngineError> {
        Ok(Self::with_host(SqliteHost::in_memory()?))
    }

    pub fn with_host(host: SqliteHost) -> Self {
        Self {
            host,
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn host(&self) -> &SqliteHost {
        &self.host
    }

    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResult, EngineError> {
        execute_with_host(&self.host, request).await
    }

    /// Convenience wrapper that assigns a request id and carries no plugin
    /// change requests.
    pub async fn execute_sql(
        &self,
        sql: &str,
        params: Vec<JsonValue>,
    ) -> Result<ExecuteResult, EngineError> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.execute(ExecuteRequest {
            request_id: format!("req-{id}"),
            sql: sql.to_string(),
            params,
            plugin_change_requests: Vec::new(),
        })
        .await
    }
}
