//! Anomaly flagging rules.
//!
//! Evaluates a freshly recalculated [`ValidationRecord`] and produces the
//! complete flag set for its current scores. Rules are independent; any
//! subset may fire. `suspicious_pattern` is raised only by installed
//! [`PatternRule`]s, and none are installed by default.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use scoreguard_state::{Flag, ValidationRecord};

/// Thresholds referenced by the built-in rules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagThresholds {
    /// `high_variance` fires when the standard deviation exceeds this.
    pub high_variance_sd: f64,
    /// `outlier` fires when a score is more than this many standard
    /// deviations from the record mean.
    pub outlier_sigma: f64,
    /// `inconsistent` fires when inter-rater reliability is below this.
    pub min_reliability: f64,
}

impl Default for FlagThresholds {
    fn default() -> Self {
        Self {
            high_variance_sd: 15.0,
            outlier_sigma: 2.0,
            min_reliability: 0.7,
        }
    }
}

/// Pluggable detector for `suspicious_pattern`.
pub trait PatternRule: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether the record's current scores match the pattern.
    fn matches(&self, record: &ValidationRecord) -> bool;
}

/// Rule engine run after every recalculation.
#[derive(Clone, Default)]
pub struct FlaggingEngine {
    thresholds: FlagThresholds,
    pattern_rules: Vec<Arc<dyn PatternRule>>,
}

impl fmt::Debug for FlaggingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.pattern_rules.iter().map(|r| r.name()).collect();
        f.debug_struct("FlaggingEngine")
            .field("thresholds", &self.thresholds)
            .field("pattern_rules", &names)
            .finish()
    }
}

impl FlaggingEngine {
    pub fn new(thresholds: FlagThresholds) -> Self {
        Self {
            thresholds,
            pattern_rules: Vec::new(),
        }
    }

    /// Install a `suspicious_pattern` rule.
    pub fn with_pattern_rule(mut self, rule: Arc<dyn PatternRule>) -> Self {
        self.pattern_rules.push(rule);
        self
    }

    pub fn thresholds(&self) -> &FlagThresholds {
        &self.thresholds
    }

    /// Compute the flag set for the record's current statistics.
    ///
    /// Reads `statistical_measures` and `inter_rater_reliability`, so call
    /// this only after they have been recomputed.
    pub fn evaluate(&self, record: &ValidationRecord) -> BTreeSet<Flag> {
        let mut flags = BTreeSet::new();
        let stats = &record.statistical_measures;

        if stats.standard_deviation > self.thresholds.high_variance_sd {
            flags.insert(Flag::HighVariance);
        }

        let band = self.thresholds.outlier_sigma * stats.standard_deviation;
        if record
            .all_scores()
            .iter()
            .any(|s| (s - stats.mean_score).abs() > band)
        {
            flags.insert(Flag::Outlier);
        }

        if let Some(irr) = record.inter_rater_reliability {
            if irr < self.thresholds.min_reliability {
                flags.insert(Flag::Inconsistent);
            }
        }

        for rule in &self.pattern_rules {
            if rule.matches(record) {
                tracing::debug!(rule = rule.name(), record = %record.key(), "pattern rule matched");
                flags.insert(Flag::SuspiciousPattern);
            }
        }

        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliability;
    use chrono::Utc;
    use scoreguard_state::{RecordKey, SecondaryScore};

    fn record_with(scores: &[f64]) -> ValidationRecord {
        let now = Utc::now();
        let mut record =
            ValidationRecord::new(RecordKey::new("s", "r"), "e0", scores[0], vec![], now);
        for (i, score) in scores[1..].iter().enumerate() {
            record.secondary_scores.push(SecondaryScore {
                evaluator_id: format!("e{}", i + 1),
                score: *score,
                criteria_scores: vec![],
                evaluated_at: now,
            });
        }
        let all = record.all_scores();
        record.statistical_measures = reliability::compute_statistics(&all).unwrap();
        record.inter_rater_reliability = if scores.len() > 1 {
            reliability::inter_rater_reliability(&all)
        } else {
            None
        };
        record
    }

    struct AllSame;

    impl PatternRule for AllSame {
        fn name(&self) -> &str {
            "all_same"
        }

        fn matches(&self, record: &ValidationRecord) -> bool {
            record.statistical_measures.standard_deviation == 0.0
        }
    }

    #[test]
    fn identical_scores_raise_nothing() {
        let engine = FlaggingEngine::default();
        assert!(engine.evaluate(&record_with(&[85.0, 85.0, 85.0])).is_empty());
    }

    #[test]
    fn wide_spread_is_high_variance_and_inconsistent() {
        let flags = FlaggingEngine::default().evaluate(&record_with(&[30.0, 85.0, 95.0]));
        assert!(flags.contains(&Flag::HighVariance));
        assert!(flags.contains(&Flag::Inconsistent));
    }

    #[test]
    fn high_variance_boundary_is_exclusive() {
        // sd == 15 exactly, irr ~0.73
        let flags = FlaggingEngine::default().evaluate(&record_with(&[70.0, 100.0]));
        assert!(flags.is_empty(), "{flags:?}");
    }

    #[test]
    fn single_far_score_is_an_outlier() {
        let mut scores = vec![50.0; 9];
        scores.push(100.0);
        let flags = FlaggingEngine::default().evaluate(&record_with(&scores));
        assert_eq!(flags, BTreeSet::from([Flag::Outlier]));
    }

    #[test]
    fn unknown_reliability_is_never_inconsistent() {
        let flags = FlaggingEngine::default().evaluate(&record_with(&[10.0]));
        assert!(flags.is_empty());
    }

    #[test]
    fn custom_thresholds_apply() {
        let engine = FlaggingEngine::new(FlagThresholds {
            high_variance_sd: 1.0,
            ..FlagThresholds::default()
        });
        let flags = engine.evaluate(&record_with(&[80.0, 84.0]));
        assert_eq!(flags, BTreeSet::from([Flag::HighVariance]));
    }

    #[test]
    fn pattern_rules_raise_suspicious_pattern() {
        let engine = FlaggingEngine::default().with_pattern_rule(Arc::new(AllSame));
        let flags = engine.evaluate(&record_with(&[85.0, 85.0]));
        assert_eq!(flags, BTreeSet::from([Flag::SuspiciousPattern]));
    }
}
