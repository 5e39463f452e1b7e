use async_trait::async_trait;

use crate::boundary::wire::{
    HostDetectChangesRequest, HostDetectChangesResponse, HostExecuteRequest, HostExecuteResponse,
};
use crate::EngineError;

/// Execution seam between the portable rewrite engine and the embedding
/// runtime that owns the live database connection and the plugin registry.
///
/// Both calls may suspend; the engine awaits them and never assumes
/// synchronous completion. The host runs `execute` inside the caller's open
/// transaction and must not begin, commit, or roll one back itself. Failures
/// should be returned as `EngineError`s; errors without a meaningful code are
/// re-coded by the engine before they reach the caller.
#[async_trait(?Send)]
pub trait HostCallbacks {
    async fn execute(&self, request: HostExecuteRequest)
        -> Result<HostExecuteResponse, EngineError>;

    async fn detect_changes(
        &self,
        request: HostDetectChangesRequest,
    ) -> Result<HostDetectChangesResponse, EngineError>;
}
