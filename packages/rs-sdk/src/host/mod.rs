mod sqlite;

pub use sqlite::{DetectChangesFn, SqliteHost};
