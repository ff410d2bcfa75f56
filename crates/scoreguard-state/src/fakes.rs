//! In-memory fakes for storage traits
//!
//! Provides `MemoryValidationStore`, `MemoryEvaluatorStore` and
//! `MemorySessionProvider` that satisfy the trait contracts without any
//! external dependencies. Each store guards its map with a single mutex, so
//! every trait call is atomic with respect to the others.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::model::{EvaluationOutcome, Evaluator, RecordKey, ReliabilityProfile, ValidationRecord};
use crate::storage_traits::*;

fn lock<T>(mutex: &Mutex<T>) -> StorageResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| StorageError::Backend("in-memory store lock poisoned".to_string()))
}

// ---------------------------------------------------------------------------
// MemoryValidationStore
// ---------------------------------------------------------------------------

/// In-memory record store backed by a `HashMap<RecordKey, ValidationRecord>`.
#[derive(Debug, Default)]
pub struct MemoryValidationStore {
    records: Mutex<HashMap<RecordKey, ValidationRecord>>,
}

impl MemoryValidationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ValidationRecordStore for MemoryValidationStore {
    async fn get(&self, key: &RecordKey) -> StorageResult<Option<ValidationRecord>> {
        let records = lock(&self.records)?;
        Ok(records.get(key).cloned())
    }

    async fn insert(&self, mut record: ValidationRecord) -> StorageResult<ValidationRecord> {
        let key = record.key();
        let mut records = lock(&self.records)?;
        if records.contains_key(&key) {
            return Err(StorageError::RecordExists {
                key: key.to_string(),
            });
        }
        record.version = 1;
        records.insert(key, record.clone());
        Ok(record)
    }

    async fn compare_and_swap(
        &self,
        mut record: ValidationRecord,
        expected_version: u64,
    ) -> StorageResult<ValidationRecord> {
        let key = record.key();
        let mut records = lock(&self.records)?;
        let stored = records
            .get_mut(&key)
            .ok_or_else(|| StorageError::RecordNotFound {
                key: key.to_string(),
            })?;
        if stored.version != expected_version {
            return Err(StorageError::VersionConflict {
                key: key.to_string(),
                expected: expected_version,
                actual: stored.version,
            });
        }
        record.version = expected_version + 1;
        *stored = record.clone();
        Ok(record)
    }

    async fn list_by_session(&self, session_id: &str) -> StorageResult<Vec<ValidationRecord>> {
        let records = lock(&self.records)?;
        let mut out: Vec<ValidationRecord> = records
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.rubric_id.cmp(&b.rubric_id))
        });
        Ok(out)
    }

    async fn list_needing_review(&self) -> StorageResult<Vec<ValidationRecord>> {
        let records = lock(&self.records)?;
        Ok(records
            .values()
            .filter(|r| {
                r.validation_status == crate::model::ValidationStatus::NeedsReview && !r.resolved
            })
            .cloned()
            .collect())
    }

    async fn list_by_evaluator(&self, evaluator_id: &str) -> StorageResult<Vec<ValidationRecord>> {
        let records = lock(&self.records)?;
        Ok(records
            .values()
            .filter(|r| r.involves_evaluator(evaluator_id))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryEvaluatorStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct EvaluatorState {
    evaluator: Evaluator,
    total_evaluations: u64,
    reliable_evaluations: u64,
    agreement_sum: f64,
    last_evaluated_at: Option<DateTime<Utc>>,
}

impl EvaluatorState {
    fn profile(&self) -> Option<ReliabilityProfile> {
        ReliabilityProfile::from_counters(
            self.total_evaluations,
            self.reliable_evaluations,
            self.agreement_sum,
            self.last_evaluated_at,
        )
    }

    fn snapshot(&self) -> Evaluator {
        Evaluator {
            reliability_profile: self.profile(),
            ..self.evaluator.clone()
        }
    }
}

/// In-memory evaluator registry backed by a `HashMap<evaluator_id, EvaluatorState>`.
#[derive(Debug, Default)]
pub struct MemoryEvaluatorStore {
    evaluators: Mutex<HashMap<String, EvaluatorState>>,
}

impl MemoryEvaluatorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EvaluatorProfileStore for MemoryEvaluatorStore {
    async fn register(&self, evaluator: Evaluator) -> StorageResult<Evaluator> {
        let mut evaluators = lock(&self.evaluators)?;
        if evaluators.contains_key(&evaluator.evaluator_id) {
            return Err(StorageError::EvaluatorExists {
                evaluator_id: evaluator.evaluator_id,
            });
        }
        let state = EvaluatorState {
            evaluator: Evaluator {
                reliability_profile: None,
                ..evaluator
            },
            total_evaluations: 0,
            reliable_evaluations: 0,
            agreement_sum: 0.0,
            last_evaluated_at: None,
        };
        let snapshot = state.snapshot();
        evaluators.insert(snapshot.evaluator_id.clone(), state);
        Ok(snapshot)
    }

    async fn get(&self, evaluator_id: &str) -> StorageResult<Evaluator> {
        let evaluators = lock(&self.evaluators)?;
        evaluators
            .get(evaluator_id)
            .map(EvaluatorState::snapshot)
            .ok_or_else(|| StorageError::EvaluatorNotFound {
                evaluator_id: evaluator_id.to_string(),
            })
    }

    async fn record_evaluation(
        &self,
        evaluator_id: &str,
        outcome: &EvaluationOutcome,
    ) -> StorageResult<ReliabilityProfile> {
        let mut evaluators = lock(&self.evaluators)?;
        let state = evaluators
            .get_mut(evaluator_id)
            .ok_or_else(|| StorageError::EvaluatorNotFound {
                evaluator_id: evaluator_id.to_string(),
            })?;
        state.total_evaluations += 1;
        if outcome.is_reliable {
            state.reliable_evaluations += 1;
        }
        state.agreement_sum += outcome.agreement();
        state.last_evaluated_at = Some(outcome.evaluated_at);
        state.profile().ok_or_else(|| {
            StorageError::Backend(format!("profile missing after update for {evaluator_id}"))
        })
    }
}

// ---------------------------------------------------------------------------
// MemorySessionProvider
// ---------------------------------------------------------------------------

/// In-memory session provider backed by a `HashMap<session_id, reference_score>`.
#[derive(Debug, Default)]
pub struct MemorySessionProvider {
    sessions: Mutex<HashMap<String, f64>>,
}

impl MemorySessionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or replace) the reference score for a session.
    pub fn put_session(&self, session_id: impl Into<String>, reference_score: f64) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(session_id.into(), reference_score);
        }
    }
}

#[async_trait]
impl SessionScoreProvider for MemorySessionProvider {
    async fn reference_score(&self, session_id: &str) -> StorageResult<f64> {
        let sessions = lock(&self.sessions)?;
        sessions
            .get(session_id)
            .copied()
            .ok_or_else(|| StorageError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }
}
