//! Storage trait definitions for Scoreguard
//!
//! These traits define the collaborators the engine consumes:
//! - `ValidationRecordStore`: validation records with optimistic versioning
//! - `EvaluatorProfileStore`: evaluator lookup and atomic profile updates
//! - `SessionScoreProvider`: session reference scores
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::model::{
    EvaluationOutcome, Evaluator, RecordKey, ReliabilityProfile, ValidationRecord,
};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ValidationRecordStore
// ---------------------------------------------------------------------------

/// Validation record persistence.
///
/// Guarantees:
/// - At most one record exists per `RecordKey`.
/// - Every successful write bumps `version` by one.
/// - `compare_and_swap` never overwrites a record whose stored version differs
///   from `expected_version`; it fails with `StorageError::VersionConflict`.
/// - Records are never deleted through this trait.
#[async_trait]
pub trait ValidationRecordStore: Send + Sync {
    /// Fetch a record, or `None` if absent.
    async fn get(&self, key: &RecordKey) -> StorageResult<Option<ValidationRecord>>;

    /// Insert a new record at version 1. Fails with `RecordExists` if present.
    async fn insert(&self, record: ValidationRecord) -> StorageResult<ValidationRecord>;

    /// Replace a record if its stored version equals `expected_version`.
    /// Returns the stored record with its bumped version.
    async fn compare_and_swap(
        &self,
        record: ValidationRecord,
        expected_version: u64,
    ) -> StorageResult<ValidationRecord>;

    /// All records for a session, oldest first.
    async fn list_by_session(&self, session_id: &str) -> StorageResult<Vec<ValidationRecord>>;

    /// All unresolved records in `needs_review`, in no particular order.
    async fn list_needing_review(&self) -> StorageResult<Vec<ValidationRecord>>;

    /// All records where the evaluator is primary or secondary.
    async fn list_by_evaluator(&self, evaluator_id: &str) -> StorageResult<Vec<ValidationRecord>>;
}

// ---------------------------------------------------------------------------
// EvaluatorProfileStore
// ---------------------------------------------------------------------------

/// Evaluator registry holding reliability profiles.
///
/// Guarantees:
/// - `record_evaluation` is atomic per evaluator: concurrent calls never lose
///   increments, and the returned profile reflects the post-increment counters.
/// - A profile appears on the first recorded evaluation and is never removed.
#[async_trait]
pub trait EvaluatorProfileStore: Send + Sync {
    /// Register a new evaluator. Fails with `EvaluatorExists` if present.
    async fn register(&self, evaluator: Evaluator) -> StorageResult<Evaluator>;

    /// Fetch an evaluator. Fails with `EvaluatorNotFound` if absent.
    async fn get(&self, evaluator_id: &str) -> StorageResult<Evaluator>;

    /// Atomically apply one evaluation outcome to the evaluator's counters.
    async fn record_evaluation(
        &self,
        evaluator_id: &str,
        outcome: &EvaluationOutcome,
    ) -> StorageResult<ReliabilityProfile>;
}

// ---------------------------------------------------------------------------
// SessionScoreProvider
// ---------------------------------------------------------------------------

/// Source of the reference (overall) score for a session.
#[async_trait]
pub trait SessionScoreProvider: Send + Sync {
    /// Reference score in 0–100. Fails with `SessionNotFound` if absent.
    async fn reference_score(&self, session_id: &str) -> StorageResult<f64>;
}
