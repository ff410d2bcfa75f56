//! Scoreguard-State: persistence for the scoring reliability engine
//!
//! This crate owns the persisted shape of validation records, evaluator
//! reliability profiles and session reference scores, and the storage
//! traits the engine consumes.
//!
//! ## Key Components
//!
//! - `ValidationRecordStore`: one record per (session, rubric), guarded by
//!   optimistic versioning
//! - `EvaluatorProfileStore`: evaluators and their atomically updated counters
//! - `SessionScoreProvider`: reference scores for sessions
//! - `fakes`: in-memory implementations of all three
//! - `SurrealStore`: SurrealDB-backed implementation of all three

mod error;
pub mod fakes;
mod handle;
mod migrations;
pub mod model;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use handle::{RemoteCredentials, StoreTarget};
pub use model::{
    AuditAction, AuditEntry, ConfidenceInterval, CriterionScore, EvaluationOutcome, Evaluator,
    EvaluatorKind, Flag, RecordKey, ReliabilityProfile, ReliabilitySnapshot, SecondaryScore,
    StatisticalMeasures, ValidationNote, ValidationRecord, ValidationStatus,
};
pub use schema::{EvaluatorRow, SessionRow, ValidationRecordRow};
pub use storage_traits::{
    EvaluatorProfileStore, SessionScoreProvider, StorageResult, ValidationRecordStore,
};
pub use surreal_store::SurrealStore;

/// Result type for connection and schema operations
pub type Result<T> = std::result::Result<T, StateError>;
