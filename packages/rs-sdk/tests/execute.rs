use serde_json::{json, Value as JsonValue};
use stateline_rs_sdk::{
    ErrorCode, ExecuteRequest, PluginChangeRequest, Stateline, StatementKind,
};

const STATE_COLUMNS_DDL: &str = "entity_id TEXT NOT NULL, \
    schema_key TEXT NOT NULL, \
    file_id TEXT NOT NULL, \
    plugin_key TEXT NOT NULL, \
    schema_version TEXT NOT NULL, \
    version_id TEXT NOT NULL, \
    snapshot_content TEXT, \
    metadata TEXT, \
    untracked INTEGER NOT NULL DEFAULT 0";

fn open_with_schema() -> Stateline {
    let stateline = Stateline::in_memory().expect("in-memory sqlite should open");
    let ddl = format!(
        "CREATE TABLE stateline_internal_transaction_state ({STATE_COLUMNS_DDL}, \
            PRIMARY KEY (entity_id, file_id, schema_key, version_id)); \
         CREATE TABLE stateline_internal_state_cache ({STATE_COLUMNS_DDL}); \
         CREATE TABLE state_by_version ({STATE_COLUMNS_DDL}); \
         CREATE TABLE version (id TEXT PRIMARY KEY); \
         CREATE TABLE active_version (version_id TEXT NOT NULL); \
         CREATE TABLE stored_schema (value TEXT NOT NULL); \
         INSERT INTO version (id) VALUES ('v1'); \
         INSERT INTO active_version (version_id) VALUES ('v1');"
    );
    stateline
        .host()
        .execute_batch(&ddl)
        .expect("schema setup should succeed");
    stateline
        .host()
        .execute_batch(
            "INSERT INTO stored_schema (value) VALUES ('{\
                \"x-key\": \"paragraph\", \
                \"x-version\": \"1.0\", \
                \"type\": \"object\", \
                \"properties\": {\"text\": {\"type\": \"string\"}}, \
                \"required\": [\"text\"]\
            }')",
        )
        .expect("schema registration should succeed");
    stateline
}

const PARAGRAPH_INSERT: &str = "INSERT INTO state \
    (entity_id, schema_key, file_id, plugin_key, schema_version, snapshot_content) \
    VALUES ('e1', 'paragraph', 'f1', 'p1', '1.0', '{\"text\":\"hello\"}')";

#[tokio::test]
async fn state_inserts_land_in_the_staging_table() {
    let stateline = open_with_schema();

    let result = stateline
        .execute_sql(PARAGRAPH_INSERT, Vec::new())
        .await
        .expect("insert should succeed");
    assert_eq!(result.statement_kind, StatementKind::Validation);
    assert_eq!(result.rows_affected, 1);

    let staged = stateline
        .execute_sql(
            "SELECT entity_id, version_id, snapshot_content \
             FROM stateline_internal_transaction_state",
            Vec::new(),
        )
        .await
        .expect("staging read should succeed");
    assert_eq!(staged.rows.len(), 1);
    assert_eq!(staged.rows[0]["entity_id"], json!("e1"));
    assert_eq!(staged.rows[0]["version_id"], json!("v1"));
    assert_eq!(staged.rows[0]["snapshot_content"], json!("{\"text\":\"hello\"}"));

    // The staged row is already visible through the surface, sourced from
    // the staging segment rather than committed state.
    let surface = stateline
        .execute_sql(
            "SELECT untracked FROM state_by_version WHERE entity_id = 'e1'",
            Vec::new(),
        )
        .await
        .expect("surface read should succeed");
    assert_eq!(surface.rows.len(), 1);
}

#[tokio::test]
async fn version_explicit_inserts_stage_and_read_back() {
    let stateline = open_with_schema();
    stateline
        .host()
        .execute_batch(
            "INSERT INTO stored_schema (value) VALUES ('{\
                \"x-key\": \"k1\", \
                \"x-version\": \"1.0\", \
                \"type\": \"object\", \
                \"properties\": {\"a\": {\"type\": \"integer\"}}\
            }')",
        )
        .expect("schema registration should succeed");

    let result = stateline
        .execute_sql(
            "INSERT INTO state_by_version \
             (entity_id, schema_key, file_id, version_id, plugin_key, snapshot_content, \
              schema_version, untracked) \
             VALUES ('e1', 'k1', 'f1', 'v1', 'p1', '{\"a\":1}', '1.0', 0)",
            Vec::new(),
        )
        .await
        .expect("insert should succeed");
    assert_eq!(result.statement_kind, StatementKind::WriteRewrite);
    assert_eq!(result.rows_affected, 1);

    let staged = stateline
        .execute_sql(
            "SELECT snapshot_content FROM state_by_version WHERE entity_id = 'e1'",
            Vec::new(),
        )
        .await
        .expect("read should succeed");
    assert_eq!(staged.rows.len(), 1);
    assert_eq!(staged.rows[0]["snapshot_content"], json!("{\"a\":1}"));
}

#[tokio::test]
async fn reads_prefer_staged_rows_over_committed_state() {
    let stateline = open_with_schema();
    stateline
        .host()
        .execute_batch(
            "INSERT INTO state_by_version \
             (entity_id, schema_key, file_id, plugin_key, schema_version, version_id, snapshot_content) \
             VALUES ('e1', 'paragraph', 'f1', 'p1', '1.0', 'v1', '{\"text\":\"old\"}')",
        )
        .expect("seed should succeed");

    stateline
        .execute_sql(PARAGRAPH_INSERT, Vec::new())
        .await
        .expect("insert should succeed");

    let read = stateline
        .execute_sql("SELECT snapshot_content FROM state", Vec::new())
        .await
        .expect("read should succeed");
    assert_eq!(read.statement_kind, StatementKind::ReadRewrite);
    assert_eq!(read.rows.len(), 1, "one row per state key after dedup");
    assert_eq!(read.rows[0]["snapshot_content"], json!("{\"text\":\"hello\"}"));
}

#[tokio::test]
async fn state_reads_are_scoped_to_the_active_version() {
    let stateline = open_with_schema();
    stateline
        .host()
        .execute_batch(
            "INSERT INTO version (id) VALUES ('v2'); \
             INSERT INTO state_by_version \
             (entity_id, schema_key, file_id, plugin_key, schema_version, version_id, snapshot_content) \
             VALUES ('e1', 'paragraph', 'f1', 'p1', '1.0', 'v2', '{\"text\":\"other\"}')",
        )
        .expect("seed should succeed");

    let scoped = stateline
        .execute_sql("SELECT entity_id FROM state", Vec::new())
        .await
        .expect("read should succeed");
    assert!(scoped.rows.is_empty(), "v2 rows are invisible through state");

    let all = stateline
        .execute_sql("SELECT entity_id FROM state_by_version", Vec::new())
        .await
        .expect("read should succeed");
    assert_eq!(all.rows.len(), 1);
}

#[tokio::test]
async fn missing_version_aborts_and_leaves_staging_empty() {
    let stateline = open_with_schema();
    stateline
        .host()
        .execute_batch("DELETE FROM version; DELETE FROM active_version; \
            INSERT INTO active_version (version_id) VALUES ('ghost')")
        .expect("seed should succeed");

    let error = stateline
        .execute_sql(PARAGRAPH_INSERT, Vec::new())
        .await
        .expect_err("unknown version must abort");
    assert_eq!(error.code, ErrorCode::RewriteValidation);

    let staged = stateline
        .execute_sql(
            "SELECT COUNT(*) AS n FROM stateline_internal_transaction_state",
            Vec::new(),
        )
        .await
        .expect("staging read should succeed");
    assert_eq!(staged.rows[0]["n"], json!(0));
}

#[tokio::test]
async fn unsupported_insert_shapes_run_unchanged() {
    let stateline = open_with_schema();

    // No column list: the rewriter declines and the original SQL hits the
    // physical table directly.
    let result = stateline
        .execute_sql(
            "INSERT INTO state_by_version VALUES \
             ('e9', 'paragraph', 'f1', 'p1', '1.0', 'v1', NULL, NULL, 0)",
            Vec::new(),
        )
        .await
        .expect("fallback should execute");
    assert_eq!(result.rows_affected, 1);

    let physical = stateline
        .execute_sql("SELECT COUNT(*) AS n FROM state_by_version", Vec::new())
        .await
        .expect("physical read should succeed");
    assert_eq!(physical.rows[0]["n"], json!(1));
}

#[tokio::test]
async fn updates_rewrite_through_the_mutation_key_snapshot() {
    let stateline = open_with_schema();
    stateline
        .host()
        .execute_batch(
            "INSERT INTO state_by_version \
             (entity_id, schema_key, file_id, plugin_key, schema_version, version_id, snapshot_content) \
             VALUES ('e1', 'paragraph', 'f1', 'p1', '1.0', 'v1', '{\"text\":\"old\"}')",
        )
        .expect("seed should succeed");

    let result = stateline
        .execute_sql(
            "UPDATE state_by_version SET snapshot_content = '{\"text\":\"new\"}' \
             WHERE entity_id = 'e1'",
            Vec::new(),
        )
        .await
        .expect("update should succeed");
    assert_eq!(result.rows_affected, 1);

    let read = stateline
        .execute_sql(
            "SELECT snapshot_content FROM state_by_version WHERE entity_id = 'e1'",
            Vec::new(),
        )
        .await
        .expect("read should succeed");
    assert_eq!(read.rows[0]["snapshot_content"], json!("{\"text\":\"new\"}"));
}

#[tokio::test]
async fn plugin_change_detection_round_trips() {
    let stateline = open_with_schema();
    stateline.host().register_plugin(
        "markdown",
        Box::new(|before, after| {
            assert!(before.is_none());
            Ok(vec![json!({"entity_id": "doc", "bytes": after.len()})])
        }),
    );

    let result = stateline
        .execute(ExecuteRequest {
            request_id: "req-plugin".to_string(),
            sql: PARAGRAPH_INSERT.to_string(),
            params: Vec::new(),
            plugin_change_requests: vec![PluginChangeRequest {
                plugin_key: "markdown".to_string(),
                before: Vec::new(),
                after: vec![35, 32, 104, 105],
            }],
        })
        .await
        .expect("write with detection should succeed");

    assert_eq!(result.plugin_changes, vec![json!({"entity_id": "doc", "bytes": 4})]);
}

#[tokio::test]
async fn unregistered_plugins_fail_with_a_detect_changes_error() {
    let stateline = open_with_schema();

    let error = stateline
        .execute(ExecuteRequest {
            request_id: "req-missing-plugin".to_string(),
            sql: PARAGRAPH_INSERT.to_string(),
            params: Vec::new(),
            plugin_change_requests: vec![PluginChangeRequest {
                plugin_key: "nope".to_string(),
                before: Vec::new(),
                after: vec![1],
            }],
        })
        .await
        .expect_err("missing plugin must fail");
    assert_eq!(error.code, ErrorCode::DetectChanges);
}

#[tokio::test]
async fn byte_array_params_bind_as_blobs() {
    let stateline = Stateline::in_memory().expect("in-memory sqlite should open");
    stateline
        .host()
        .execute_batch("CREATE TABLE blobs (data BLOB)")
        .expect("setup should succeed");

    stateline
        .execute_sql(
            "INSERT INTO blobs (data) VALUES (?1)",
            vec![json!([1, 2, 255])],
        )
        .await
        .expect("insert should succeed");

    let read = stateline
        .execute_sql("SELECT data, length(data) AS len FROM blobs", Vec::new())
        .await
        .expect("read should succeed");
    assert_eq!(read.rows[0]["len"], json!(3));
    assert_eq!(read.rows[0]["data"], json!([1, 2, 255]));
}

#[tokio::test]
async fn parameterized_state_inserts_bind_through_the_rewrite() {
    let stateline = open_with_schema();

    let result = stateline
        .execute_sql(
            "INSERT INTO state \
             (entity_id, schema_key, file_id, plugin_key, schema_version, snapshot_content) \
             VALUES (?, 'paragraph', 'f1', 'p1', '1.0', ?)",
            vec![json!("e-param"), json!("{\"text\":\"bound\"}")],
        )
        .await
        .expect("parameterized insert should succeed");
    assert_eq!(result.rows_affected, 1);

    let staged = stateline
        .execute_sql(
            "SELECT entity_id FROM stateline_internal_transaction_state",
            Vec::new(),
        )
        .await
        .expect("staging read should succeed");
    assert_eq!(staged.rows[0]["entity_id"], json!("e-param"));
}

#[tokio::test]
async fn multi_statement_scripts_bind_parameters_in_order() {
    let stateline = Stateline::in_memory().expect("in-memory sqlite should open");

    let result = stateline
        .execute_sql("SELECT ? AS a; SELECT ? AS b", vec![json!(1), json!(2)])
        .await
        .expect("script should execute");
    assert_eq!(result.statement_kind, StatementKind::Passthrough);
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0]["a"], json!(1));
    assert_eq!(result.rows[1]["b"], json!(2));
}

#[tokio::test]
async fn multi_statement_state_reads_number_parameters_globally() {
    let stateline = open_with_schema();
    stateline
        .execute_sql(PARAGRAPH_INSERT, Vec::new())
        .await
        .expect("insert should succeed");

    // The second statement's filter must bind the second parameter; binding
    // that restarted per statement would match 'paragraph' twice.
    let read = stateline
        .execute_sql(
            "SELECT entity_id FROM state WHERE schema_key = ?; \
             SELECT entity_id FROM state_by_version WHERE schema_key = ?",
            vec![json!("paragraph"), json!("no-such-key")],
        )
        .await
        .expect("script should execute");
    assert_eq!(read.statement_kind, StatementKind::ReadRewrite);
    assert_eq!(read.rows.len(), 1);
    assert_eq!(read.rows[0]["entity_id"], json!("e1"));
}

#[tokio::test]
async fn last_insert_row_id_only_reports_inserts() {
    let stateline = Stateline::in_memory().expect("in-memory sqlite should open");
    stateline
        .host()
        .execute_batch("CREATE TABLE notes (body TEXT)")
        .expect("setup should succeed");

    let inserted = stateline
        .execute_sql("INSERT INTO notes (body) VALUES ('x')", Vec::new())
        .await
        .expect("insert should succeed");
    assert_eq!(inserted.last_insert_row_id, Some(1));

    let read = stateline
        .execute_sql("SELECT body FROM notes", Vec::new())
        .await
        .expect("read should succeed");
    assert_eq!(read.last_insert_row_id, None);

    let updated = stateline
        .execute_sql("UPDATE notes SET body = 'y'", Vec::new())
        .await
        .expect("update should succeed");
    assert_eq!(updated.last_insert_row_id, None);
}

#[tokio::test]
async fn results_round_trip_as_json_values(){
    let stateline = Stateline::in_memory().expect("in-memory sqlite should open");
    let result = stateline
        .execute_sql("SELECT 1 + 1 AS n, 'x' AS s, NULL AS missing", Vec::new())
        .await
        .expect("select should succeed");

    assert_eq!(result.statement_kind, StatementKind::Passthrough);
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0]["n"], json!(2));
    assert_eq!(result.rows[0]["s"], json!("x"));
    assert_eq!(result.rows[0]["missing"], JsonValue::Null);
}
