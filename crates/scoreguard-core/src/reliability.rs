//! Reliability statistics over a record's score set.
//!
//! Everything here is pure and total: an empty slice yields `None` or zeroed
//! output, a single score yields a degenerate interval.
//!
//! The inter-rater reliability coefficient is `1 - variance / (100² / 12)`,
//! the variance of a uniform distribution over the full score range. It is a
//! bounded approximation of an intraclass correlation, not an ICC. The flag
//! thresholds are tuned against this formula, so it must not be swapped for a
//! different statistic without re-deriving them. The same applies to the fixed
//! confidence-interval critical value, which is not a t-distribution lookup.

use serde::{Deserialize, Serialize};

use scoreguard_state::{ConfidenceInterval, StatisticalMeasures};

/// Upper bound of the rubric score range.
pub const MAX_SCORE: f64 = 100.0;

/// Critical value used for the 95% confidence interval.
pub const CRITICAL_VALUE: f64 = 2.0;

/// Variance of a uniform distribution over `[0, MAX_SCORE]`.
pub const MAX_VARIANCE: f64 = MAX_SCORE * MAX_SCORE / 12.0;

/// Output of a standalone inter-rater check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InterRaterReliability {
    /// Variance-ratio coefficient in 0.0–1.0.
    pub agreement_score: f64,
    /// `1 - (max - min) / 100`, in 0.0–1.0.
    pub consistency_metric: f64,
    /// Scores more than two standard deviations from the mean of the rest.
    pub outlier_count: usize,
}

pub fn mean(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().sum::<f64>() / scores.len() as f64)
}

/// Population variance.
pub fn variance(scores: &[f64]) -> Option<f64> {
    let m = mean(scores)?;
    Some(scores.iter().map(|s| (s - m).powi(2)).sum::<f64>() / scores.len() as f64)
}

pub fn standard_deviation(scores: &[f64]) -> Option<f64> {
    variance(scores).map(f64::sqrt)
}

pub fn median(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    let mut sorted = scores.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// 95% interval around the mean, clamped into the score range.
pub fn confidence_interval(scores: &[f64]) -> Option<ConfidenceInterval> {
    let m = mean(scores)?;
    if scores.len() < 2 {
        return Some(ConfidenceInterval { lower: m, upper: m });
    }
    let sd = standard_deviation(scores)?;
    let margin = CRITICAL_VALUE * sd / (scores.len() as f64).sqrt();
    Some(ConfidenceInterval {
        lower: (m - margin).clamp(0.0, MAX_SCORE),
        upper: (m + margin).clamp(0.0, MAX_SCORE),
    })
}

/// Variance-ratio reliability coefficient in 0.0–1.0.
pub fn inter_rater_reliability(scores: &[f64]) -> Option<f64> {
    variance(scores).map(|v| (1.0 - v / MAX_VARIANCE).clamp(0.0, 1.0))
}

/// Descriptive statistics for a record's current score set.
pub fn compute_statistics(scores: &[f64]) -> Option<StatisticalMeasures> {
    Some(StatisticalMeasures {
        mean_score: mean(scores)?,
        median_score: median(scores)?,
        standard_deviation: standard_deviation(scores)?,
        confidence_interval: confidence_interval(scores)?,
    })
}

/// Count scores lying more than `sigma` standard deviations away from the
/// mean of the remaining scores. Fewer than three scores never count.
pub fn leave_one_out_outliers(scores: &[f64], sigma: f64) -> usize {
    if scores.len() < 3 {
        return 0;
    }
    (0..scores.len())
        .filter(|&i| {
            let rest: Vec<f64> = scores
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, s)| *s)
                .collect();
            match (mean(&rest), standard_deviation(&rest)) {
                (Some(m), Some(sd)) => (scores[i] - m).abs() > sigma * sd,
                _ => false,
            }
        })
        .count()
}

/// Standalone inter-rater check over an arbitrary score list.
pub fn calculate_inter_rater_reliability(scores: &[f64]) -> InterRaterReliability {
    let Some(agreement_score) = inter_rater_reliability(scores) else {
        return InterRaterReliability {
            agreement_score: 0.0,
            consistency_metric: 0.0,
            outlier_count: 0,
        };
    };
    let max = scores.iter().copied().fold(f64::MIN, f64::max);
    let min = scores.iter().copied().fold(f64::MAX, f64::min);
    InterRaterReliability {
        agreement_score,
        consistency_metric: (1.0 - (max - min) / MAX_SCORE).clamp(0.0, 1.0),
        outlier_count: leave_one_out_outliers(scores, 2.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_none() {
        assert!(compute_statistics(&[]).is_none());
        assert!(inter_rater_reliability(&[]).is_none());
        assert_eq!(calculate_inter_rater_reliability(&[]).outlier_count, 0);
    }

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), Some(2.5));
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
    }

    #[test]
    fn identical_scores_are_perfectly_reliable() {
        let scores = [85.0, 85.0, 85.0];
        assert_eq!(inter_rater_reliability(&scores), Some(1.0));
        let irr = calculate_inter_rater_reliability(&scores);
        assert_eq!(irr.agreement_score, 1.0);
        assert_eq!(irr.consistency_metric, 1.0);
        assert_eq!(irr.outlier_count, 0);
    }

    #[test]
    fn spread_scores_are_unreliable_with_an_outlier() {
        let irr = calculate_inter_rater_reliability(&[30.0, 85.0, 95.0]);
        assert!(irr.agreement_score < 0.5);
        assert!((irr.consistency_metric - 0.35).abs() < 1e-9);
        assert_eq!(irr.outlier_count, 1);
    }

    #[test]
    fn single_score_interval_collapses() {
        let ci = confidence_interval(&[72.0]).unwrap();
        assert_eq!(ci.lower, 72.0);
        assert_eq!(ci.upper, 72.0);
    }

    #[test]
    fn interval_is_clamped_and_ordered() {
        for scores in [
            vec![0.0, 100.0],
            vec![98.0, 100.0, 60.0],
            vec![1.0, 2.0, 50.0, 0.0],
            vec![85.0, 82.0],
        ] {
            let stats = compute_statistics(&scores).unwrap();
            let ci = stats.confidence_interval;
            assert!(0.0 <= ci.lower, "{scores:?}");
            assert!(ci.lower <= stats.mean_score, "{scores:?}");
            assert!(stats.mean_score <= ci.upper, "{scores:?}");
            assert!(ci.upper <= 100.0, "{scores:?}");
        }
    }

    #[test]
    fn population_standard_deviation() {
        let sd = standard_deviation(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((sd - 2.0).abs() < 1e-12);
    }

    #[test]
    fn reliability_clamps_at_zero() {
        // variance 2500 exceeds MAX_VARIANCE
        assert_eq!(inter_rater_reliability(&[0.0, 100.0]), Some(0.0));
    }
}
