//! Evaluator performance tracking.
//!
//! Compares an evaluator's score with a reference, classifies the outcome
//! and folds it into the evaluator's rolling profile. Profile counters are
//! only ever changed through [`EvaluatorProfileStore::record_evaluation`],
//! which the store applies atomically; rates are derived from the
//! post-increment counters.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use scoreguard_state::{
    EvaluationOutcome, EvaluatorProfileStore, Flag, ReliabilityProfile, SessionScoreProvider,
    ValidationRecordStore,
};

use crate::domain::error::{check_score, check_unit, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::reliability::{self, InterRaterReliability};

/// Slack for the tolerance comparison, so `(1 - 0.8) * 100` admits 20.
const TOLERANCE_EPSILON: f64 = 1e-9;

/// How an evaluator's score relates to the reference and the session's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementStatus {
    /// Within tolerance and the session's records carry no flags.
    Agreement,
    /// Within tolerance, but at least one of the session's records is flagged.
    AgreementWithFlags,
    /// Outside tolerance.
    Disagreement,
}

impl AgreementStatus {
    pub fn classify(is_reliable: bool, flags: &BTreeSet<Flag>) -> Self {
        match (is_reliable, flags.is_empty()) {
            (false, _) => Self::Disagreement,
            (true, true) => Self::Agreement,
            (true, false) => Self::AgreementWithFlags,
        }
    }
}

/// Result of checking one score against a reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityCheck {
    pub is_reliable: bool,
    pub discrepancy_score: f64,
    pub tolerated_discrepancy: f64,
    pub agreement_status: AgreementStatus,
    /// The evaluator's profile after this check was tracked.
    pub profile: ReliabilityProfile,
}

/// Compare `score` with `reference` at `confidence_threshold`.
///
/// Returns `(discrepancy, tolerance, is_reliable)`.
pub fn compare_to_reference(
    reference: f64,
    score: f64,
    confidence_threshold: f64,
) -> (f64, f64, bool) {
    let discrepancy = (reference - score).abs();
    let tolerance = (1.0 - confidence_threshold) * reliability::MAX_SCORE;
    (
        discrepancy,
        tolerance,
        discrepancy <= tolerance + TOLERANCE_EPSILON,
    )
}

/// Rolling per-evaluator reliability profiles.
#[derive(Clone)]
pub struct EvaluatorPerformanceTracker {
    sessions: Arc<dyn SessionScoreProvider>,
    evaluators: Arc<dyn EvaluatorProfileStore>,
    records: Arc<dyn ValidationRecordStore>,
}

impl EvaluatorPerformanceTracker {
    pub fn new(
        sessions: Arc<dyn SessionScoreProvider>,
        evaluators: Arc<dyn EvaluatorProfileStore>,
        records: Arc<dyn ValidationRecordStore>,
    ) -> Self {
        Self {
            sessions,
            evaluators,
            records,
        }
    }

    /// Check a human score against the session's reference score and track
    /// the outcome on the evaluator's profile.
    #[instrument(skip(self))]
    pub async fn validate_scoring_reliability(
        &self,
        session_id: &str,
        evaluator_id: &str,
        human_score: f64,
        confidence_threshold: f64,
    ) -> Result<ReliabilityCheck> {
        check_score("human_score", human_score)?;
        check_unit("confidence_threshold", confidence_threshold)?;

        let reference = self.sessions.reference_score(session_id).await?;
        self.evaluators.get(evaluator_id).await?;

        let (discrepancy, tolerance, is_reliable) =
            compare_to_reference(reference, human_score, confidence_threshold);

        let flags: BTreeSet<Flag> = self
            .records
            .list_by_session(session_id)
            .await?
            .into_iter()
            .flat_map(|r| r.flags)
            .collect();
        let agreement_status = AgreementStatus::classify(is_reliable, &flags);

        let profile = self
            .track_evaluator_performance(
                evaluator_id,
                &EvaluationOutcome {
                    is_reliable,
                    discrepancy,
                    evaluated_at: Utc::now(),
                },
            )
            .await?;

        Ok(ReliabilityCheck {
            is_reliable,
            discrepancy_score: discrepancy,
            tolerated_discrepancy: tolerance,
            agreement_status,
            profile,
        })
    }

    /// Fold one outcome into the evaluator's profile.
    #[instrument(skip(self, outcome), fields(reliable = outcome.is_reliable))]
    pub async fn track_evaluator_performance(
        &self,
        evaluator_id: &str,
        outcome: &EvaluationOutcome,
    ) -> Result<ReliabilityProfile> {
        let profile = self
            .evaluators
            .record_evaluation(evaluator_id, outcome)
            .await?;
        METRICS.inc_evaluations_tracked();
        obs::emit_evaluator_tracked(evaluator_id, outcome.is_reliable, profile.total_evaluations);
        Ok(profile)
    }

    /// Standalone agreement check over an arbitrary score list.
    pub fn calculate_inter_rater_reliability(&self, scores: &[f64]) -> Result<InterRaterReliability> {
        calculate_inter_rater_reliability(scores)
    }
}

/// Validate `scores` and run the standalone agreement check.
pub fn calculate_inter_rater_reliability(scores: &[f64]) -> Result<InterRaterReliability> {
    for score in scores {
        check_score("scores", *score)?;
    }
    Ok(reliability::calculate_inter_rater_reliability(scores))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerance_boundary_is_inclusive() {
        let (d, t, ok) = compare_to_reference(85.0, 82.0, 0.8);
        assert_eq!(d, 3.0);
        assert!((t - 20.0).abs() < 1e-9);
        assert!(ok);

        let (_, _, ok) = compare_to_reference(85.0, 65.0, 0.8);
        assert!(ok, "a discrepancy of exactly 20 is within tolerance");

        let (d, _, ok) = compare_to_reference(85.0, 50.0, 0.8);
        assert_eq!(d, 35.0);
        assert!(!ok);
    }

    #[test]
    fn agreement_status_labels() {
        let none = BTreeSet::new();
        let some = BTreeSet::from([Flag::Outlier]);
        assert_eq!(AgreementStatus::classify(true, &none), AgreementStatus::Agreement);
        assert_eq!(
            AgreementStatus::classify(true, &some),
            AgreementStatus::AgreementWithFlags
        );
        assert_eq!(AgreementStatus::classify(false, &none), AgreementStatus::Disagreement);
        assert_eq!(AgreementStatus::classify(false, &some), AgreementStatus::Disagreement);
    }

    #[test]
    fn standalone_irr_rejects_bad_scores() {
        assert!(calculate_inter_rater_reliability(&[50.0, 101.0]).is_err());
        assert!(calculate_inter_rater_reliability(&[50.0, f64::NAN]).is_err());
        let irr = calculate_inter_rater_reliability(&[85.0, 85.0, 85.0]).unwrap();
        assert_eq!(irr.agreement_score, 1.0);
    }
}
