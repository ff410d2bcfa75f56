//! SurrealDB schema migrations and initialization
//!
//! Every Scoreguard table is defined by one [`TableSchema`]. Applying them
//! is idempotent, so connections run it unconditionally.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StateError;
use crate::Result;

struct TableSchema {
    table: &'static str,
    statements: &'static str,
}

/// `validation_records`
///
/// ```text
/// TABLE validation_records {
///   session_id:              STRING (unique with rubric_id)
///   rubric_id:               STRING
///   primary_evaluator_id:    STRING (indexed)
///   evaluator_ids:           ARRAY<STRING>
///   validation_status:       STRING (indexed with resolved)
///   resolved:                BOOL
///   inter_rater_reliability: FLOAT?
///   version:                 INT (optimistic concurrency)
///   created_at:              DATETIME
///   updated_at:              DATETIME
///   document:                OBJECT (full record, lossless)
/// }
/// ```
///
/// `(session_id, rubric_id)` is unique and rows are never deleted. Writes
/// are conditional on `version` in `SurrealStore`.
const VALIDATION_RECORDS: TableSchema = TableSchema {
    table: "validation_records",
    statements: r#"
        DEFINE TABLE IF NOT EXISTS validation_records
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_record_identity ON TABLE validation_records COLUMNS session_id, rubric_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_record_session ON TABLE validation_records COLUMNS session_id;
        DEFINE INDEX IF NOT EXISTS idx_record_primary ON TABLE validation_records COLUMNS primary_evaluator_id;
        DEFINE INDEX IF NOT EXISTS idx_record_review ON TABLE validation_records COLUMNS validation_status, resolved;
    "#,
};

/// `evaluators`
///
/// ```text
/// TABLE evaluators {
///   evaluator_id:         STRING (unique)
///   display_name:         STRING
///   kind:                 STRING (automated | human)
///   registered_at:        DATETIME
///   total_evaluations:    INT   (atomic += only)
///   reliable_evaluations: INT   (atomic += only)
///   agreement_sum:        FLOAT (atomic += only)
///   last_evaluated_at:    DATETIME?
/// }
/// ```
const EVALUATORS: TableSchema = TableSchema {
    table: "evaluators",
    statements: r#"
        DEFINE TABLE IF NOT EXISTS evaluators
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_evaluator_id ON TABLE evaluators COLUMNS evaluator_id UNIQUE;
    "#,
};

/// `sessions`: reference scores supplied by the host, replaceable.
const SESSIONS: TableSchema = TableSchema {
    table: "sessions",
    statements: r#"
        DEFINE TABLE IF NOT EXISTS sessions
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete FULL;

        DEFINE INDEX IF NOT EXISTS idx_session_id ON TABLE sessions COLUMNS session_id UNIQUE;
    "#,
};

const TABLES: [TableSchema; 3] = [VALIDATION_RECORDS, EVALUATORS, SESSIONS];

/// Define every Scoreguard table and index.
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    for schema in &TABLES {
        debug!(table = schema.table, "defining table");
        db.query(schema.statements)
            .await?
            .check()
            .map_err(|e| StateError::SchemaSetup(format!("{}: {}", schema.table, e)))?;
    }
    info!(tables = TABLES.len(), "schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_applies_and_reapplies() {
        let db = surrealdb::engine::any::connect("mem://").await.unwrap();
        db.use_ns("test").use_db("test").await.unwrap();

        init_schema(&db).await.unwrap();
        init_schema(&db).await.unwrap();

        let mut info = db.query("INFO FOR TABLE validation_records").await.unwrap();
        let info: Option<serde_json::Value> = info.take(0).unwrap();
        let indexes = info.unwrap()["indexes"].to_string();
        assert!(indexes.contains("idx_record_identity"));
    }
}
