//! Domain-level error taxonomy for Scoreguard.

use scoreguard_state::StorageError;

/// Scoreguard domain errors.
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid score for {field}: {value} (expected {min}..={max})")]
    InvalidScore {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("concurrency conflict on record {key} after {attempts} attempts")]
    ConcurrencyConflict { key: String, attempts: u32 },

    #[error("evaluator {evaluator_id} is already the primary evaluator of {key}")]
    DuplicateEvaluator { evaluator_id: String, key: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl ScoringError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl From<StorageError> for ScoringError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::RecordNotFound { key } => Self::not_found("record", key),
            StorageError::SessionNotFound { session_id } => Self::not_found("session", session_id),
            StorageError::EvaluatorNotFound { evaluator_id } => {
                Self::not_found("evaluator", evaluator_id)
            }
            StorageError::VersionConflict { key, .. } => {
                Self::ConcurrencyConflict { key, attempts: 1 }
            }
            StorageError::Contended { key, attempts } => {
                Self::ConcurrencyConflict { key, attempts }
            }
            other => Self::Storage(other),
        }
    }
}

/// Result type for Scoreguard domain operations.
pub type Result<T> = std::result::Result<T, ScoringError>;

/// Reject non-finite values and values outside `[min, max]`.
pub(crate) fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<()> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ScoringError::InvalidScore {
            field,
            value,
            min,
            max,
        })
    }
}

/// A 0–100 rubric score.
pub(crate) fn check_score(field: &'static str, value: f64) -> Result<()> {
    check_range(field, value, 0.0, 100.0)
}

/// A 0.0–1.0 reliability or confidence value.
pub(crate) fn check_unit(field: &'static str, value: f64) -> Result<()> {
    check_range(field, value, 0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_not_found_maps_to_not_found() {
        let err: ScoringError = StorageError::SessionNotFound {
            session_id: "s1".into(),
        }
        .into();
        assert!(matches!(err, ScoringError::NotFound { entity: "session", .. }));
        assert!(err.to_string().contains("session not found: s1"));
    }

    #[test]
    fn version_conflict_maps_to_concurrency_conflict() {
        let err: ScoringError = StorageError::VersionConflict {
            key: "s::r".into(),
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(matches!(err, ScoringError::ConcurrencyConflict { .. }));
    }

    #[test]
    fn backend_errors_pass_through() {
        let err: ScoringError = StorageError::Backend("disk full".into()).into();
        assert!(matches!(err, ScoringError::Storage(_)));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn score_ranges() {
        assert!(check_score("score", 0.0).is_ok());
        assert!(check_score("score", 100.0).is_ok());
        assert!(check_score("score", 100.5).is_err());
        assert!(check_score("score", f64::NAN).is_err());
        assert!(check_unit("threshold", 0.8).is_ok());
        assert!(check_unit("threshold", 1.2).is_err());
        assert!(check_unit("threshold", f64::INFINITY).is_err());
    }
}
