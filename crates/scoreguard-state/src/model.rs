//! Persisted data model
//!
//! These types are the canonical layout of a validation record and an
//! evaluator profile. Every backend must round-trip them without loss; the
//! audit trail order and the flag set in particular are part of the contract.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a validation record: one per (session, rubric).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub session_id: String,
    pub rubric_id: String,
}

impl RecordKey {
    pub fn new(session_id: impl Into<String>, rubric_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            rubric_id: rubric_id.into(),
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.session_id, self.rubric_id)
    }
}

/// Score awarded against a single rubric criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub criterion_id: String,
    pub score: f64,
}

/// A score submitted by an evaluator other than the primary one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryScore {
    pub evaluator_id: String,
    /// Score in 0–100.
    pub score: f64,
    #[serde(default)]
    pub criteria_scores: Vec<CriterionScore>,
    pub evaluated_at: DateTime<Utc>,
}

/// Auxiliary per-evaluator reliability snapshot attached to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilitySnapshot {
    pub evaluator_id: String,
    /// Reliability in 0.0–1.0.
    pub score: f64,
    pub evaluated_at: DateTime<Utc>,
    #[serde(default)]
    pub criteria: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Descriptive statistics over the current score set of a record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatisticalMeasures {
    pub mean_score: f64,
    pub median_score: f64,
    pub standard_deviation: f64,
    pub confidence_interval: ConfidenceInterval,
}

impl StatisticalMeasures {
    /// Degenerate measures for a single observation.
    pub fn single(score: f64) -> Self {
        Self {
            mean_score: score,
            median_score: score,
            standard_deviation: 0.0,
            confidence_interval: ConfidenceInterval {
                lower: score,
                upper: score,
            },
        }
    }
}

/// Anomaly conditions raised against a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    HighVariance,
    Outlier,
    Inconsistent,
    SuspiciousPattern,
}

impl Flag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HighVariance => "high_variance",
            Self::Outlier => "outlier",
            Self::Inconsistent => "inconsistent",
            Self::SuspiciousPattern => "suspicious_pattern",
        }
    }
}

/// Workflow status of a validation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Validated,
    NeedsReview,
    Disputed,
    Invalid,
}

impl ValidationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::NeedsReview => "needs_review",
            Self::Disputed => "disputed",
            Self::Invalid => "invalid",
        }
    }

    /// Whether an explicit transition into this status closes the record.
    pub fn is_resolving(self) -> bool {
        matches!(self, Self::Validated | Self::Invalid)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "validated" => Some(Self::Validated),
            "needs_review" => Some(Self::NeedsReview),
            "disputed" => Some(Self::Disputed),
            "invalid" => Some(Self::Invalid),
            _ => None,
        }
    }
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationNote {
    pub validator_id: String,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

/// Kind of mutation recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    RecordCreated,
    PrimaryScoreRevised,
    SecondaryScoreAdded,
    ScoreRevised,
    ReliabilitySnapshotAdded,
    StatusEscalated,
    ValidationPerformed,
    ValidationOverridden,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RecordCreated => "record_created",
            Self::PrimaryScoreRevised => "primary_score_revised",
            Self::SecondaryScoreAdded => "secondary_score_added",
            Self::ScoreRevised => "score_revised",
            Self::ReliabilitySnapshotAdded => "reliability_snapshot_added",
            Self::StatusEscalated => "status_escalated",
            Self::ValidationPerformed => "validation_performed",
            Self::ValidationOverridden => "validation_overridden",
        }
    }
}

/// One append-only audit trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub performed_by: String,
    pub performed_at: DateTime<Utc>,
    pub details: serde_json::Value,
    #[serde(default)]
    pub previous_state: Option<ValidationStatus>,
    #[serde(default)]
    pub new_state: Option<ValidationStatus>,
    /// Chain digest over the previous entry's digest and this entry.
    #[serde(default)]
    pub digest: String,
}

/// The per-(session, rubric) aggregate.
///
/// `statistical_measures`, `inter_rater_reliability` and `flags` are derived
/// from the current score set and are only written by the recalculation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub session_id: String,
    pub rubric_id: String,
    /// Score in 0–100.
    pub primary_score: f64,
    pub primary_evaluator_id: String,
    #[serde(default)]
    pub primary_criteria_scores: Vec<CriterionScore>,
    #[serde(default)]
    pub secondary_scores: Vec<SecondaryScore>,
    #[serde(default)]
    pub reliability_scores: Vec<ReliabilitySnapshot>,
    pub inter_rater_reliability: Option<f64>,
    pub statistical_measures: StatisticalMeasures,
    #[serde(default)]
    pub flags: BTreeSet<Flag>,
    pub validation_status: ValidationStatus,
    #[serde(default)]
    pub validation_notes: Vec<ValidationNote>,
    #[serde(default)]
    pub audit_trail: Vec<AuditEntry>,
    pub resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    /// Optimistic concurrency version; bumped by the store on every write.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ValidationRecord {
    /// Create a fresh pending record from its first (primary) score.
    pub fn new(
        key: RecordKey,
        primary_evaluator_id: impl Into<String>,
        primary_score: f64,
        primary_criteria_scores: Vec<CriterionScore>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: key.session_id,
            rubric_id: key.rubric_id,
            primary_score,
            primary_evaluator_id: primary_evaluator_id.into(),
            primary_criteria_scores,
            secondary_scores: Vec::new(),
            reliability_scores: Vec::new(),
            inter_rater_reliability: None,
            statistical_measures: StatisticalMeasures::single(primary_score),
            flags: BTreeSet::new(),
            validation_status: ValidationStatus::Pending,
            validation_notes: Vec::new(),
            audit_trail: Vec::new(),
            resolved: false,
            resolved_by: None,
            resolved_at: None,
            resolution_notes: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.session_id.clone(), self.rubric_id.clone())
    }

    /// Primary score followed by every secondary score, in submission order.
    pub fn all_scores(&self) -> Vec<f64> {
        std::iter::once(self.primary_score)
            .chain(self.secondary_scores.iter().map(|s| s.score))
            .collect()
    }

    /// Distinct evaluators that scored this record, primary first.
    pub fn evaluator_ids(&self) -> Vec<String> {
        let mut ids = vec![self.primary_evaluator_id.clone()];
        for s in &self.secondary_scores {
            if !ids.contains(&s.evaluator_id) {
                ids.push(s.evaluator_id.clone());
            }
        }
        ids
    }

    pub fn involves_evaluator(&self, evaluator_id: &str) -> bool {
        self.primary_evaluator_id == evaluator_id
            || self
                .secondary_scores
                .iter()
                .any(|s| s.evaluator_id == evaluator_id)
    }
}

/// Who produced a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorKind {
    Automated,
    Human,
}

impl EvaluatorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Automated => "automated",
            Self::Human => "human",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "automated" => Some(Self::Automated),
            "human" => Some(Self::Human),
            _ => None,
        }
    }
}

/// Rolling reliability statistics for an evaluator.
///
/// Rates are derived from the stored counters on every read, never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityProfile {
    pub total_evaluations: u64,
    pub reliable_evaluations: u64,
    /// `reliable_evaluations / total_evaluations`, in 0.0–1.0.
    pub agreement_rate: f64,
    /// Mean per-evaluation agreement, in 0.0–1.0.
    pub reliability_score: f64,
    pub last_evaluated_at: Option<DateTime<Utc>>,
}

impl ReliabilityProfile {
    /// Derive a profile from raw counters. Returns `None` before the first
    /// tracked evaluation.
    pub fn from_counters(
        total_evaluations: u64,
        reliable_evaluations: u64,
        agreement_sum: f64,
        last_evaluated_at: Option<DateTime<Utc>>,
    ) -> Option<Self> {
        if total_evaluations == 0 {
            return None;
        }
        let total = total_evaluations as f64;
        Some(Self {
            total_evaluations,
            reliable_evaluations,
            agreement_rate: reliable_evaluations as f64 / total,
            reliability_score: (agreement_sum / total).clamp(0.0, 1.0),
            last_evaluated_at,
        })
    }
}

/// An evaluator as held by the profile store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluator {
    pub evaluator_id: String,
    pub display_name: String,
    pub kind: EvaluatorKind,
    pub registered_at: DateTime<Utc>,
    pub reliability_profile: Option<ReliabilityProfile>,
}

impl Evaluator {
    pub fn new(
        evaluator_id: impl Into<String>,
        display_name: impl Into<String>,
        kind: EvaluatorKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            evaluator_id: evaluator_id.into(),
            display_name: display_name.into(),
            kind,
            registered_at: now,
            reliability_profile: None,
        }
    }
}

/// Result of one tracked evaluation, applied atomically to a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub is_reliable: bool,
    /// Absolute score discrepancy against the reference, 0–100.
    pub discrepancy: f64,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationOutcome {
    /// Agreement contribution of this evaluation, in 0.0–1.0.
    pub fn agreement(&self) -> f64 {
        (1.0 - self.discrepancy / 100.0).clamp(0.0, 1.0)
    }
}
