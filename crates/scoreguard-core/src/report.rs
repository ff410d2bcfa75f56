//! Session and evaluator reliability reports.
//!
//! Reports are computed from whatever records the store returns; an empty
//! result set produces zeroed aggregates rather than an error.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use scoreguard_state::{AuditAction, ValidationRecord, ValidationRecordStore};

use crate::domain::error::Result;

/// Aggregate reliability for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub session_id: String,
    pub record_count: usize,
    /// Mean of the known per-record inter-rater reliabilities.
    pub reliability_score: f64,
    /// Mean `|secondary - primary|` over every secondary score.
    pub average_discrepancy: f64,
    /// Distinct evaluators across all records.
    pub evaluator_count: usize,
    pub status_counts: BTreeMap<String, usize>,
    pub flagged_records: usize,
    pub records: Vec<ValidationRecord>,
    pub generated_at: DateTime<Utc>,
}

/// Aggregate over the records an evaluator scored inside a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorReliabilityReport {
    pub evaluator_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub record_count: usize,
    /// Mean inter-rater reliability of those records (known values only).
    pub average_reliability: f64,
    pub score_count: usize,
    pub average_score: f64,
    pub primary_evaluations: usize,
}

fn mean_or_zero(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// When the evaluator last set the record's primary score.
fn primary_scored_at(record: &ValidationRecord) -> DateTime<Utc> {
    record
        .audit_trail
        .iter()
        .rev()
        .find(|e| {
            matches!(
                e.action,
                AuditAction::RecordCreated | AuditAction::PrimaryScoreRevised
            )
        })
        .map(|e| e.performed_at)
        .unwrap_or(record.created_at)
}

#[derive(Clone)]
pub struct ReportGenerator {
    records: Arc<dyn ValidationRecordStore>,
}

impl ReportGenerator {
    pub fn new(records: Arc<dyn ValidationRecordStore>) -> Self {
        Self { records }
    }

    #[instrument(skip(self))]
    pub async fn generate_validation_report(&self, session_id: &str) -> Result<ValidationReport> {
        let records = self.records.list_by_session(session_id).await?;

        let reliabilities: Vec<f64> = records
            .iter()
            .filter_map(|r| r.inter_rater_reliability)
            .collect();
        let discrepancies: Vec<f64> = records
            .iter()
            .flat_map(|r| {
                r.secondary_scores
                    .iter()
                    .map(move |s| (s.score - r.primary_score).abs())
            })
            .collect();
        let evaluators: BTreeSet<String> =
            records.iter().flat_map(|r| r.evaluator_ids()).collect();

        let mut status_counts = BTreeMap::new();
        for r in &records {
            *status_counts
                .entry(r.validation_status.as_str().to_string())
                .or_insert(0) += 1;
        }

        Ok(ValidationReport {
            session_id: session_id.to_string(),
            record_count: records.len(),
            reliability_score: mean_or_zero(&reliabilities),
            average_discrepancy: mean_or_zero(&discrepancies),
            evaluator_count: evaluators.len(),
            status_counts,
            flagged_records: records.iter().filter(|r| !r.flags.is_empty()).count(),
            records,
            generated_at: Utc::now(),
        })
    }

    /// Aggregate the scores `evaluator_id` gave within `timeframe` of now.
    #[instrument(skip(self))]
    pub async fn get_evaluator_reliability(
        &self,
        evaluator_id: &str,
        timeframe: Duration,
    ) -> Result<EvaluatorReliabilityReport> {
        let window_end = Utc::now();
        let window_start = window_end - timeframe;
        let in_window = |at: DateTime<Utc>| at >= window_start;

        let mut record_count = 0;
        let mut reliabilities = Vec::new();
        let mut scores = Vec::new();
        let mut primary_evaluations = 0;

        for record in self.records.list_by_evaluator(evaluator_id).await? {
            let mut scored_here = false;
            if record.primary_evaluator_id == evaluator_id && in_window(primary_scored_at(&record))
            {
                scores.push(record.primary_score);
                primary_evaluations += 1;
                scored_here = true;
            }
            for s in &record.secondary_scores {
                if s.evaluator_id == evaluator_id && in_window(s.evaluated_at) {
                    scores.push(s.score);
                    scored_here = true;
                }
            }
            if scored_here {
                record_count += 1;
                if let Some(irr) = record.inter_rater_reliability {
                    reliabilities.push(irr);
                }
            }
        }

        Ok(EvaluatorReliabilityReport {
            evaluator_id: evaluator_id.to_string(),
            window_start,
            window_end,
            record_count,
            average_reliability: mean_or_zero(&reliabilities),
            score_count: scores.len(),
            average_score: mean_or_zero(&scores),
            primary_evaluations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scoreguard_state::fakes::MemoryValidationStore;

    #[tokio::test]
    async fn empty_session_report_is_zeroed() {
        let generator = ReportGenerator::new(Arc::new(MemoryValidationStore::new()));
        let report = generator.generate_validation_report("nobody").await.unwrap();
        assert_eq!(report.record_count, 0);
        assert_eq!(report.reliability_score, 0.0);
        assert_eq!(report.average_discrepancy, 0.0);
        assert_eq!(report.evaluator_count, 0);
        assert_eq!(report.flagged_records, 0);
        assert!(report.status_counts.is_empty());
        assert!(report.records.is_empty());
    }

    #[tokio::test]
    async fn evaluator_without_records_is_zeroed() {
        let generator = ReportGenerator::new(Arc::new(MemoryValidationStore::new()));
        let report = generator
            .get_evaluator_reliability("ghost", Duration::days(7))
            .await
            .unwrap();
        assert_eq!(report.record_count, 0);
        assert_eq!(report.score_count, 0);
        assert_eq!(report.average_score, 0.0);
        assert_eq!(report.window_end - report.window_start, Duration::days(7));
    }

    #[test]
    fn mean_of_nothing_is_zero() {
        assert_eq!(mean_or_zero(&[]), 0.0);
        assert_eq!(mean_or_zero(&[1.0, 3.0]), 2.0);
    }
}
