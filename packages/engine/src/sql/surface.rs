use sqlparser::ast::ObjectName;

/// Public version-implicit state view. Writes resolve the ambient active
/// version; reads are filtered to it.
pub const STATE_VIEW: &str = "state";
/// Version-implicit validation alias of `state`.
pub const STATE_ALL_VIEW: &str = "state_all";
/// Public version-explicit state surface. Doubles as the committed snapshot
/// relation: UPDATE/DELETE materializations and declined-insert fallbacks
/// land here, and reads include it as the lowest-priority segment.
pub const STATE_BY_VERSION: &str = "state_by_version";
/// Internal virtual-table alias over the physical state segments.
pub const INTERNAL_STATE_VTABLE: &str = "stateline_internal_state_vtable";
/// Public file descriptor view.
pub const FILE_VIEW: &str = "file";

/// Staging table for not-yet-committed mutation rows.
pub const TRANSACTION_STATE_TABLE: &str = "stateline_internal_transaction_state";
/// Resolved-state cache segment.
pub const STATE_CACHE_TABLE: &str = "stateline_internal_state_cache";

pub const ACTIVE_VERSION_TABLE: &str = "active_version";
pub const VERSION_TABLE: &str = "version";
pub const STORED_SCHEMA_TABLE: &str = "stored_schema";

pub(crate) const MUTATION_ROW_CTE: &str = "__stateline_mutation_rows";
pub(crate) const STATE_MUTATION_KEY_COLUMNS: [&str; 4] =
    ["entity_id", "schema_key", "file_id", "version_id"];

/// Schema key of file descriptor entities. Mutations carrying it stay on the
/// legacy write path until the file path cache is ported, so the rewriter
/// must decline them.
pub const FILE_DESCRIPTOR_SCHEMA_KEY: &str = "stateline_file";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteTarget {
    State,
    StateAll,
    StateByVersion,
    StateVtable,
    File,
    Other,
}

impl WriteTarget {
    /// True for the version-implicit surfaces that must resolve an ambient
    /// active version.
    pub(crate) fn is_version_implicit(self) -> bool {
        matches!(self, WriteTarget::State | WriteTarget::StateAll)
    }

    /// True for targets whose mutations are validated against the schema
    /// registry before any physical SQL is emitted.
    pub(crate) fn is_state_surface(self) -> bool {
        matches!(
            self,
            WriteTarget::State
                | WriteTarget::StateAll
                | WriteTarget::StateByVersion
                | WriteTarget::StateVtable
        )
    }

    pub(crate) fn is_validation_surface(self) -> bool {
        matches!(self, WriteTarget::State | WriteTarget::StateAll)
    }
}

/// Matches the last identifier component, case-insensitively, ignoring any
/// schema qualifier: `main."STATE"` classifies the same as `state`.
pub(crate) fn classify_write_target(name: &ObjectName) -> WriteTarget {
    let Some(last) = name.0.last() else {
        return WriteTarget::Other;
    };
    let value = last.value.as_str();
    if value.eq_ignore_ascii_case(STATE_VIEW) {
        return WriteTarget::State;
    }
    if value.eq_ignore_ascii_case(STATE_ALL_VIEW) {
        return WriteTarget::StateAll;
    }
    if value.eq_ignore_ascii_case(STATE_BY_VERSION) {
        return WriteTarget::StateByVersion;
    }
    if value.eq_ignore_ascii_case(INTERNAL_STATE_VTABLE) {
        return WriteTarget::StateVtable;
    }
    if value.eq_ignore_ascii_case(FILE_VIEW) {
        return WriteTarget::File;
    }
    WriteTarget::Other
}

/// Table names whose SELECT references route the statement to the read
/// rewriter.
pub(crate) fn is_read_surface_name(name: &ObjectName) -> bool {
    classify_write_target(name).is_state_surface()
}

pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub(crate) fn escape_sql_string(input: &str) -> String {
    input.replace('\'', "''")
}
