mod classify;
pub(crate) mod mutation;
pub mod parser;
pub(crate) mod placeholders;
pub(crate) mod read_rewrite;
pub mod surface;
pub(crate) mod validate;
pub(crate) mod write_rewrite;

pub use classify::{
    classify_script, classify_statement, ExecutePlan, PreprocessMode, RowsAffectedMode,
    StatementKind,
};
pub(crate) use classify::delete_target;
pub use parser::{parse_script, split_sql_statements, ScriptStatement, SqlParseError};
