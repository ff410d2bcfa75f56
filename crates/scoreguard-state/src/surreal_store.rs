//! SurrealDB-backed storage
//!
//! `SurrealStore` implements all three storage traits over one connection,
//! converting to and from the `schema` row types at the boundary.
//!
//! Concurrency: record writes are a single conditional
//! `UPDATE … WHERE version = $expected`; evaluator counters change only
//! through a single `UPDATE … SET x += …` statement. SurrealDB aborts a
//! statement whose transaction collides with a concurrent commit. Aborted
//! record writes surface as `VersionConflict`/`RecordExists` so the caller
//! re-reads; aborted counter updates are re-run here, since `+=` reads
//! nothing the caller could have gone stale on.

use std::time::Duration;

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::Surreal;
use tracing::{debug, instrument};

use crate::error::StorageError;
use crate::handle::StoreTarget;
use crate::model::{EvaluationOutcome, Evaluator, RecordKey, ReliabilityProfile, ValidationRecord};
use crate::schema::{EvaluatorRow, SessionRow, ValidationRecordRow};
use crate::storage_traits::{
    EvaluatorProfileStore, SessionScoreProvider, StorageResult, ValidationRecordStore,
};

/// Attempts for one evaluator counter update before giving up.
const COUNTER_ATTEMPTS: u32 = 128;

/// Why a SurrealDB write was rejected.
#[derive(Debug)]
enum WriteFailure {
    /// Transaction aborted by a concurrent commit; safe to retry.
    Contended,
    /// A unique index already holds the value.
    Duplicate,
    Other(surrealdb::Error),
}

impl From<surrealdb::Error> for WriteFailure {
    fn from(err: surrealdb::Error) -> Self {
        // Embedded and remote engines report these through different error
        // types but with the same messages.
        let message = err.to_string();
        if message.contains("can be retried") || message.contains("read or write conflict") {
            WriteFailure::Contended
        } else if message.contains("already contains") {
            WriteFailure::Duplicate
        } else {
            WriteFailure::Other(err)
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(u64::from(attempt.min(10)))
}

/// SurrealDB implementation of the record, evaluator and session stores.
#[derive(Clone)]
pub struct SurrealStore {
    db: Surreal<Any>,
}

impl SurrealStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::connect(&StoreTarget::Memory).await
    }

    /// Connect to an explicit target.
    pub async fn connect(target: &StoreTarget) -> crate::Result<Self> {
        let db = target.connect().await?;
        Ok(Self { db })
    }

    /// Connect to the target named by `SURREALDB_*` variables (remote,
    /// `SURREALDB_URL`, or local files).
    pub async fn from_env() -> crate::Result<Self> {
        Self::connect(&StoreTarget::from_env()).await
    }

    /// Set (or replace) the reference score for a session.
    #[instrument(skip(self))]
    pub async fn put_session(&self, session_id: &str, reference_score: f64) -> StorageResult<()> {
        let row = SessionRow::new(session_id, reference_score);
        let _ = self
            .db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE sessions WHERE session_id = $sid; \
                 CREATE sessions CONTENT $row; \
                 COMMIT TRANSACTION;",
            )
            .bind(("sid", session_id.to_string()))
            .bind(("row", row))
            .await?
            .check()?;
        Ok(())
    }

    // -- private helpers -----------------------------------------------------

    async fn fetch_record_row(
        &self,
        key: &RecordKey,
    ) -> StorageResult<Option<ValidationRecordRow>> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM validation_records \
                 WHERE session_id = $sid AND rubric_id = $rid",
            )
            .bind(("sid", key.session_id.clone()))
            .bind(("rid", key.rubric_id.clone()))
            .await?;
        let rows: Vec<ValidationRecordRow> = res.take(0)?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_evaluator_row(&self, evaluator_id: &str) -> StorageResult<Option<EvaluatorRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM evaluators WHERE evaluator_id = $eid")
            .bind(("eid", evaluator_id.to_string()))
            .await?;
        let rows: Vec<EvaluatorRow> = res.take(0)?;
        Ok(rows.into_iter().next())
    }

    async fn increment_counters(
        &self,
        evaluator_id: &str,
        outcome: &EvaluationOutcome,
    ) -> Result<Vec<EvaluatorRow>, WriteFailure> {
        let mut res = self
            .db
            .query(
                "UPDATE evaluators SET \
                     total_evaluations += 1, \
                     reliable_evaluations += $reliable, \
                     agreement_sum += $agreement, \
                     last_evaluated_at = $at \
                 WHERE evaluator_id = $eid RETURN AFTER",
            )
            .bind(("reliable", i64::from(outcome.is_reliable)))
            .bind(("agreement", outcome.agreement()))
            .bind(("at", SurrealDatetime::from(outcome.evaluated_at)))
            .bind(("eid", evaluator_id.to_string()))
            .await?;
        Ok(res.take(0)?)
    }

    fn rows_to_records(rows: Vec<ValidationRecordRow>) -> StorageResult<Vec<ValidationRecord>> {
        rows.into_iter().map(ValidationRecordRow::into_record).collect()
    }
}

#[async_trait]
impl ValidationRecordStore for SurrealStore {
    async fn get(&self, key: &RecordKey) -> StorageResult<Option<ValidationRecord>> {
        self.fetch_record_row(key)
            .await?
            .map(ValidationRecordRow::into_record)
            .transpose()
    }

    async fn insert(&self, mut record: ValidationRecord) -> StorageResult<ValidationRecord> {
        let key = record.key();
        if self.fetch_record_row(&key).await?.is_some() {
            return Err(StorageError::RecordExists {
                key: key.to_string(),
            });
        }
        record.version = 1;
        let row = ValidationRecordRow::from_record(&record)?;

        debug!(record = %key, "creating validation record");
        let created: Result<Option<ValidationRecordRow>, surrealdb::Error> =
            self.db.create("validation_records").content(row).await;
        match created.map_err(WriteFailure::from) {
            Ok(Some(row)) => row.into_record(),
            Ok(None) => Err(StorageError::Backend(format!(
                "failed to create record {key}"
            ))),
            // a concurrent creator won; the caller re-reads and revises
            Err(WriteFailure::Contended | WriteFailure::Duplicate) => {
                Err(StorageError::RecordExists {
                    key: key.to_string(),
                })
            }
            Err(WriteFailure::Other(e)) => Err(e.into()),
        }
    }

    async fn compare_and_swap(
        &self,
        mut record: ValidationRecord,
        expected_version: u64,
    ) -> StorageResult<ValidationRecord> {
        let key = record.key();
        record.version = expected_version + 1;
        let row = ValidationRecordRow::from_record(&record)?;

        let updated: Result<Vec<ValidationRecordRow>, surrealdb::Error> = async {
            self.db
                .query(
                    "UPDATE validation_records CONTENT $row \
                     WHERE session_id = $sid AND rubric_id = $rid AND version = $expected \
                     RETURN AFTER",
                )
                .bind(("row", row))
                .bind(("sid", key.session_id.clone()))
                .bind(("rid", key.rubric_id.clone()))
                .bind(("expected", expected_version))
                .await?
                .take(0)
        }
        .await;

        match updated.map_err(WriteFailure::from) {
            Ok(rows) => {
                if let Some(row) = rows.into_iter().next() {
                    return row.into_record();
                }
            }
            Err(WriteFailure::Contended) => {
                debug!(
                    record = %key,
                    expected_version,
                    "record update aborted by concurrent commit"
                );
            }
            Err(WriteFailure::Duplicate) => {
                return Err(StorageError::Backend(format!(
                    "record identity changed during update of {key}"
                )))
            }
            Err(WriteFailure::Other(e)) => return Err(e.into()),
        }

        match self.fetch_record_row(&key).await? {
            Some(current) => Err(StorageError::VersionConflict {
                key: key.to_string(),
                expected: expected_version,
                actual: current.version,
            }),
            None => Err(StorageError::RecordNotFound {
                key: key.to_string(),
            }),
        }
    }

    async fn list_by_session(&self, session_id: &str) -> StorageResult<Vec<ValidationRecord>> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM validation_records WHERE session_id = $sid \
                 ORDER BY created_at ASC, rubric_id ASC",
            )
            .bind(("sid", session_id.to_string()))
            .await?;
        let rows: Vec<ValidationRecordRow> = res.take(0)?;
        Self::rows_to_records(rows)
    }

    async fn list_needing_review(&self) -> StorageResult<Vec<ValidationRecord>> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM validation_records \
                 WHERE validation_status = 'needs_review' AND resolved = false",
            )
            .await?;
        let rows: Vec<ValidationRecordRow> = res.take(0)?;
        Self::rows_to_records(rows)
    }

    async fn list_by_evaluator(&self, evaluator_id: &str) -> StorageResult<Vec<ValidationRecord>> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM validation_records \
                 WHERE primary_evaluator_id = $eid OR evaluator_ids CONTAINS $eid",
            )
            .bind(("eid", evaluator_id.to_string()))
            .await?;
        let rows: Vec<ValidationRecordRow> = res.take(0)?;
        Self::rows_to_records(rows)
    }
}

#[async_trait]
impl EvaluatorProfileStore for SurrealStore {
    async fn register(&self, evaluator: Evaluator) -> StorageResult<Evaluator> {
        if self
            .fetch_evaluator_row(&evaluator.evaluator_id)
            .await?
            .is_some()
        {
            return Err(StorageError::EvaluatorExists {
                evaluator_id: evaluator.evaluator_id,
            });
        }
        let row = EvaluatorRow::new(&evaluator);
        let created: Result<Option<EvaluatorRow>, surrealdb::Error> =
            self.db.create("evaluators").content(row).await;
        match created.map_err(WriteFailure::from) {
            Ok(Some(row)) => row.into_evaluator(),
            Ok(None) => Err(StorageError::Backend(format!(
                "failed to register evaluator {}",
                evaluator.evaluator_id
            ))),
            Err(WriteFailure::Duplicate) => Err(StorageError::EvaluatorExists {
                evaluator_id: evaluator.evaluator_id,
            }),
            Err(WriteFailure::Contended) => Err(StorageError::Contended {
                key: evaluator.evaluator_id,
                attempts: 1,
            }),
            Err(WriteFailure::Other(e)) => Err(e.into()),
        }
    }

    async fn get(&self, evaluator_id: &str) -> StorageResult<Evaluator> {
        self.fetch_evaluator_row(evaluator_id)
            .await?
            .ok_or_else(|| StorageError::EvaluatorNotFound {
                evaluator_id: evaluator_id.to_string(),
            })?
            .into_evaluator()
    }

    async fn record_evaluation(
        &self,
        evaluator_id: &str,
        outcome: &EvaluationOutcome,
    ) -> StorageResult<ReliabilityProfile> {
        for attempt in 1..=COUNTER_ATTEMPTS {
            match self.increment_counters(evaluator_id, outcome).await {
                Ok(rows) => {
                    let row = rows.into_iter().next().ok_or_else(|| {
                        StorageError::EvaluatorNotFound {
                            evaluator_id: evaluator_id.to_string(),
                        }
                    })?;
                    return row.profile().ok_or_else(|| {
                        StorageError::Backend(format!(
                            "profile missing after update for {evaluator_id}"
                        ))
                    });
                }
                Err(WriteFailure::Contended) => {
                    debug!(evaluator_id, attempt, "counter update aborted, retrying");
                    tokio::time::sleep(backoff(attempt)).await;
                }
                Err(WriteFailure::Duplicate) => {
                    return Err(StorageError::Backend(format!(
                        "unexpected index violation updating {evaluator_id}"
                    )))
                }
                Err(WriteFailure::Other(e)) => return Err(e.into()),
            }
        }
        Err(StorageError::Contended {
            key: evaluator_id.to_string(),
            attempts: COUNTER_ATTEMPTS,
        })
    }
}

#[async_trait]
impl SessionScoreProvider for SurrealStore {
    async fn reference_score(&self, session_id: &str) -> StorageResult<f64> {
        let mut res = self
            .db
            .query("SELECT * FROM sessions WHERE session_id = $sid")
            .bind(("sid", session_id.to_string()))
            .await?;
        let rows: Vec<SessionRow> = res.take(0)?;
        rows.into_iter()
            .next()
            .map(|row| row.reference_score)
            .ok_or_else(|| StorageError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }
}
