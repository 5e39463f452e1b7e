//! Statement rewrite engine for the stateline runtime.
//!
//! The engine owns the portable half of SQL execution: it parses incoming
//! scripts, classifies each one against the public state surfaces, rewrites
//! reads into the segment union and writes into staging upserts, validates
//! mutation rows against stored schemas, and hands the resulting physical
//! SQL to a [`HostCallbacks`] implementation that owns the live SQLite
//! connection. The engine itself never opens a connection or a transaction.

mod boundary;
mod context;
mod error;
mod error_classification;
mod execute;
pub mod sql;

pub use boundary::codec::{
    decode_byte_array, decode_execute_request, decode_execute_request_value, param_as_bytes,
};
pub use boundary::{
    ExecuteRequest, ExecuteResult, HostCallbacks, HostDetectChangesRequest,
    HostDetectChangesResponse, HostExecuteRequest, HostExecuteResponse, PluginChangeRequest,
};
pub use context::{EngineContext, SchemaAddress};
pub use error::{EngineError, ErrorCode};
pub use error_classification::{classify_error_message, normalize_boundary_error};
pub use execute::{execute_serialized, execute_with_host, plan_execute};
pub use sql::{
    classify_script, classify_statement, parse_script, split_sql_statements, ExecutePlan,
    PreprocessMode, RowsAffectedMode, ScriptStatement, SqlParseError, StatementKind,
};
