//! The validation engine: the operations a host application calls.
//!
//! Record mutations follow one loop: read the record, apply a
//! [`workflow`] mutation in memory, then write it back with
//! compare-and-swap on the version that was read. A lost race re-reads and
//! re-applies, up to `store.max_conflict_retries` attempts, so concurrent
//! submissions to one record are serialized rather than dropped.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, instrument};

use scoreguard_state::{
    CriterionScore, EvaluationOutcome, Evaluator, EvaluatorKind, EvaluatorProfileStore, RecordKey,
    ReliabilityProfile, ReliabilitySnapshot, SessionScoreProvider, StorageError, ValidationRecord,
    ValidationRecordStore, ValidationStatus,
};

use crate::config::EngineConfig;
use crate::domain::error::{check_score, check_unit, Result, ScoringError};
use crate::flagging::{FlaggingEngine, PatternRule};
use crate::metrics::METRICS;
use crate::obs;
use crate::reliability::InterRaterReliability;
use crate::report::{EvaluatorReliabilityReport, ReportGenerator, ValidationReport};
use crate::review::ReviewQueueService;
use crate::tracker::{self, EvaluatorPerformanceTracker, ReliabilityCheck};
use crate::workflow::{self, AuditVerification, Recalculation, Submission};

/// Facade over the record store, evaluator profiles and session scores.
#[derive(Clone)]
pub struct ValidationEngine {
    records: Arc<dyn ValidationRecordStore>,
    evaluators: Arc<dyn EvaluatorProfileStore>,
    tracker: EvaluatorPerformanceTracker,
    review: ReviewQueueService,
    reports: ReportGenerator,
    flagging: FlaggingEngine,
    config: EngineConfig,
}

impl ValidationEngine {
    pub fn new(
        records: Arc<dyn ValidationRecordStore>,
        evaluators: Arc<dyn EvaluatorProfileStore>,
        sessions: Arc<dyn SessionScoreProvider>,
        config: EngineConfig,
    ) -> Self {
        let tracker = EvaluatorPerformanceTracker::new(
            sessions,
            Arc::clone(&evaluators),
            Arc::clone(&records),
        );
        Self {
            review: ReviewQueueService::new(Arc::clone(&records)),
            reports: ReportGenerator::new(Arc::clone(&records)),
            flagging: FlaggingEngine::new(config.flagging),
            records,
            evaluators,
            tracker,
            config,
        }
    }

    /// Install a `suspicious_pattern` rule.
    pub fn with_pattern_rule(mut self, rule: Arc<dyn PatternRule>) -> Self {
        self.flagging = self.flagging.with_pattern_rule(rule);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tracker(&self) -> &EvaluatorPerformanceTracker {
        &self.tracker
    }

    // -- evaluators ----------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn register_evaluator(
        &self,
        evaluator_id: &str,
        display_name: &str,
        kind: EvaluatorKind,
    ) -> Result<Evaluator> {
        let evaluator = Evaluator::new(evaluator_id, display_name, kind, Utc::now());
        Ok(self.evaluators.register(evaluator).await?)
    }

    pub async fn get_evaluator(&self, evaluator_id: &str) -> Result<Evaluator> {
        Ok(self.evaluators.get(evaluator_id).await?)
    }

    // -- record mutations ----------------------------------------------------

    /// Create the record for `(session_id, rubric_id)` from its primary
    /// score, or revise the primary score of an existing open record.
    #[instrument(skip(self, criteria_scores))]
    pub async fn record_primary_score(
        &self,
        session_id: &str,
        rubric_id: &str,
        evaluator_id: &str,
        score: f64,
        criteria_scores: Vec<CriterionScore>,
    ) -> Result<ValidationRecord> {
        check_score("score", score)?;
        check_criteria(&criteria_scores)?;
        self.evaluators.get(evaluator_id).await?;

        let key = RecordKey::new(session_id, rubric_id);
        let max = self.config.store.max_conflict_retries;
        for attempt in 1..=max {
            let (stored, recalculation, revised) = match self.records.get(&key).await? {
                None => {
                    let now = Utc::now();
                    let fresh = ValidationRecord::new(
                        key.clone(),
                        evaluator_id,
                        score,
                        criteria_scores.clone(),
                        now,
                    );
                    let (record, recalculation) =
                        workflow::create_record(fresh, &self.flagging, now);
                    match self.records.insert(record).await {
                        Ok(stored) => (stored, recalculation, false),
                        Err(StorageError::RecordExists { .. }) => {
                            self.note_conflict(&key, attempt).await;
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Some(mut record) => {
                    let expected = record.version;
                    let recalculation = workflow::revise_primary(
                        &mut record,
                        evaluator_id,
                        score,
                        criteria_scores.clone(),
                        &self.flagging,
                        Utc::now(),
                    )?;
                    match self.records.compare_and_swap(record, expected).await {
                        Ok(stored) => (stored, recalculation, true),
                        Err(StorageError::VersionConflict { .. }) => {
                            self.note_conflict(&key, attempt).await;
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            };

            METRICS.inc_scores_submitted();
            obs::emit_score_submitted(&key, evaluator_id, score, revised);
            report_flags(&key, &recalculation);
            return Ok(stored);
        }
        Err(ScoringError::ConcurrencyConflict {
            key: key.to_string(),
            attempts: max,
        })
    }

    /// Attach a secondary score to an existing record and update the
    /// evaluator's profile against the primary score.
    #[instrument(skip(self, criteria_scores))]
    pub async fn submit_secondary_score(
        &self,
        session_id: &str,
        rubric_id: &str,
        evaluator_id: &str,
        score: f64,
        criteria_scores: Vec<CriterionScore>,
    ) -> Result<ValidationRecord> {
        check_score("score", score)?;
        check_criteria(&criteria_scores)?;
        self.evaluators.get(evaluator_id).await?;

        let key = RecordKey::new(session_id, rubric_id);
        let flagging = &self.flagging;
        let (stored, (submission, recalculation)) = self
            .mutate_record(&key, |record| {
                workflow::submit_secondary(
                    record,
                    evaluator_id,
                    score,
                    criteria_scores.clone(),
                    flagging,
                    Utc::now(),
                )
            })
            .await?;

        METRICS.inc_scores_submitted();
        obs::emit_score_submitted(&key, evaluator_id, score, submission == Submission::Revised);
        report_flags(&key, &recalculation);

        let (discrepancy, _, is_reliable) = tracker::compare_to_reference(
            stored.primary_score,
            score,
            self.config.tracking.default_confidence_threshold,
        );
        let outcome = EvaluationOutcome {
            is_reliable,
            discrepancy,
            evaluated_at: Utc::now(),
        };
        let attempts = self.config.store.max_conflict_retries;
        if self.config.tracking.background {
            let tracker = self.tracker.clone();
            let evaluator_id = evaluator_id.to_string();
            tokio::spawn(async move {
                if let Err(e) = track_until_stored(&tracker, &evaluator_id, &outcome, attempts).await
                {
                    obs::emit_tracking_error(&evaluator_id, &e);
                }
            });
        } else {
            track_until_stored(&self.tracker, evaluator_id, &outcome, attempts).await?;
        }

        Ok(stored)
    }

    /// Attach an auxiliary reliability snapshot (0.0–1.0) to a record.
    #[instrument(skip(self, criteria))]
    pub async fn add_reliability_snapshot(
        &self,
        session_id: &str,
        rubric_id: &str,
        evaluator_id: &str,
        score: f64,
        criteria: Vec<String>,
    ) -> Result<ValidationRecord> {
        check_unit("reliability score", score)?;
        let key = RecordKey::new(session_id, rubric_id);
        let (stored, ()) = self
            .mutate_record(&key, |record| {
                let now = Utc::now();
                workflow::add_snapshot(
                    record,
                    ReliabilitySnapshot {
                        evaluator_id: evaluator_id.to_string(),
                        score,
                        evaluated_at: now,
                        criteria: criteria.clone(),
                    },
                    now,
                )
            })
            .await?;
        Ok(stored)
    }

    /// Apply a validator's decision to a record.
    #[instrument(skip(self, notes))]
    pub async fn resolve_record(
        &self,
        session_id: &str,
        rubric_id: &str,
        validator_id: &str,
        notes: &str,
        status: ValidationStatus,
        override_resolved: bool,
    ) -> Result<ValidationRecord> {
        let key = RecordKey::new(session_id, rubric_id);
        let (stored, overridden) = self
            .mutate_record(&key, |record| {
                let overriding = record.resolved;
                workflow::resolve(
                    record,
                    validator_id,
                    notes,
                    status,
                    override_resolved,
                    Utc::now(),
                )
                .map(|()| overriding)
            })
            .await?;

        METRICS.inc_records_resolved();
        obs::emit_record_resolved(&key, validator_id, status, overridden);
        Ok(stored)
    }

    // -- evaluator reliability -----------------------------------------------

    pub async fn validate_scoring_reliability(
        &self,
        session_id: &str,
        evaluator_id: &str,
        human_score: f64,
        confidence_threshold: f64,
    ) -> Result<ReliabilityCheck> {
        self.tracker
            .validate_scoring_reliability(
                session_id,
                evaluator_id,
                human_score,
                confidence_threshold,
            )
            .await
    }

    pub fn calculate_inter_rater_reliability(&self, scores: &[f64]) -> Result<InterRaterReliability> {
        tracker::calculate_inter_rater_reliability(scores)
    }

    // -- queries -------------------------------------------------------------

    pub async fn find_needing_review(&self, limit: usize) -> Result<Vec<ValidationRecord>> {
        self.review.find_needing_review(limit).await
    }

    pub async fn get_evaluator_reliability(
        &self,
        evaluator_id: &str,
        timeframe: Duration,
    ) -> Result<EvaluatorReliabilityReport> {
        self.reports
            .get_evaluator_reliability(evaluator_id, timeframe)
            .await
    }

    pub async fn generate_validation_report(&self, session_id: &str) -> Result<ValidationReport> {
        self.reports.generate_validation_report(session_id).await
    }

    pub async fn get_record(&self, session_id: &str, rubric_id: &str) -> Result<ValidationRecord> {
        let key = RecordKey::new(session_id, rubric_id);
        self.records
            .get(&key)
            .await?
            .ok_or_else(|| ScoringError::not_found("record", key.to_string()))
    }

    /// Recompute the record's audit chain digests.
    pub async fn verify_audit_trail(
        &self,
        session_id: &str,
        rubric_id: &str,
    ) -> Result<AuditVerification> {
        let record = self.get_record(session_id, rubric_id).await?;
        Ok(workflow::verify_audit_chain(&record.audit_trail))
    }

    // -- private helpers -----------------------------------------------------

    /// Read, mutate and compare-and-swap an existing record, retrying lost
    /// races. `apply` may run once per attempt.
    async fn mutate_record<T, F>(&self, key: &RecordKey, mut apply: F) -> Result<(ValidationRecord, T)>
    where
        F: FnMut(&mut ValidationRecord) -> Result<T>,
    {
        let max = self.config.store.max_conflict_retries;
        for attempt in 1..=max {
            let mut record = self
                .records
                .get(key)
                .await?
                .ok_or_else(|| ScoringError::not_found("record", key.to_string()))?;
            let expected = record.version;
            let out = apply(&mut record)?;

            match self.records.compare_and_swap(record, expected).await {
                Ok(stored) => return Ok((stored, out)),
                Err(StorageError::VersionConflict { .. }) => {
                    self.note_conflict(key, attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ScoringError::ConcurrencyConflict {
            key: key.to_string(),
            attempts: max,
        })
    }

    async fn note_conflict(&self, key: &RecordKey, attempt: u32) {
        METRICS.inc_conflict_retries();
        obs::emit_conflict_retry(key, attempt);
        tokio::task::yield_now().await;
    }
}

/// Record `outcome` against the evaluator, re-running the update while the
/// store reports contention.
async fn track_until_stored(
    tracker: &EvaluatorPerformanceTracker,
    evaluator_id: &str,
    outcome: &EvaluationOutcome,
    attempts: u32,
) -> Result<ReliabilityProfile> {
    let mut attempt = 1;
    loop {
        match tracker
            .track_evaluator_performance(evaluator_id, outcome)
            .await
        {
            Err(ScoringError::ConcurrencyConflict { .. }) if attempt < attempts => {
                METRICS.inc_conflict_retries();
                debug!(evaluator_id, attempt, "profile update contended, retrying");
                attempt += 1;
                tokio::task::yield_now().await;
            }
            result => return result,
        }
    }
}

fn check_criteria(criteria: &[CriterionScore]) -> Result<()> {
    for c in criteria {
        check_score("criterion score", c.score)?;
    }
    Ok(())
}

fn report_flags(key: &RecordKey, recalculation: &Recalculation) {
    if recalculation.flags.is_empty() {
        debug!(record = %key, "no flags raised");
        return;
    }
    METRICS.inc_records_flagged();
    obs::emit_record_flagged(key, &recalculation.flags, recalculation.escalated);
}
