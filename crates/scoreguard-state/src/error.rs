//! Error types for scoreguard-state

use thiserror::Error;

/// Errors raised while connecting to or preparing the database
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

/// Errors returned by the storage traits
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("validation record not found: {key}")]
    RecordNotFound { key: String },

    #[error("validation record already exists: {key}")]
    RecordExists { key: String },

    /// Optimistic version check failed; the caller re-reads and retries.
    #[error("version conflict on {key}: expected {expected}, found {actual}")]
    VersionConflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    /// The backend kept aborting the write on concurrent access.
    #[error("write to {key} still contended after {attempts} attempts")]
    Contended { key: String, attempts: u32 },

    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("evaluator not found: {evaluator_id}")]
    EvaluatorNotFound { evaluator_id: String },

    #[error("evaluator already registered: {evaluator_id}")]
    EvaluatorExists { evaluator_id: String },

    #[error("backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}
