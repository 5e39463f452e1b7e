pub mod codec;
mod host;
mod wire;

pub use host::HostCallbacks;
pub use wire::{
    ExecuteRequest, ExecuteResult, HostDetectChangesRequest, HostDetectChangesResponse,
    HostExecuteRequest, HostExecuteResponse, PluginChangeRequest,
};
