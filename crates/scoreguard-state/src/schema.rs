//! Row shapes for the Scoreguard SurrealDB tables
//!
//! Tables:
//! - validation_records: denormalized query columns plus the full record document
//! - evaluators: evaluator identity plus raw profile counters
//! - sessions: reference scores supplied by the host application

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::model::{Evaluator, EvaluatorKind, ReliabilityProfile, ValidationRecord};

/// `serde(with)` adapters storing chrono timestamps as native SurrealDB
/// datetimes, so range queries compare instants rather than strings.
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        SurrealDatetime::from(*at).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        SurrealDatetime::deserialize(d).map(DateTime::from)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            at: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            at.map(SurrealDatetime::from).serialize(s)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            Option::<SurrealDatetime>::deserialize(d).map(|at| at.map(DateTime::from))
        }
    }
}

/// Validation record row stored in SurrealDB.
///
/// The queryable columns are copies of fields inside `document`; the
/// document is the source of truth when converting back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRecordRow {
    pub session_id: String,
    pub rubric_id: String,
    pub primary_evaluator_id: String,
    pub evaluator_ids: Vec<String>,
    pub validation_status: String,
    pub resolved: bool,
    pub inter_rater_reliability: Option<f64>,
    pub version: u64,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
    pub document: serde_json::Value,
}

impl ValidationRecordRow {
    pub fn from_record(record: &ValidationRecord) -> Result<Self, StorageError> {
        Ok(Self {
            session_id: record.session_id.clone(),
            rubric_id: record.rubric_id.clone(),
            primary_evaluator_id: record.primary_evaluator_id.clone(),
            evaluator_ids: record.evaluator_ids(),
            validation_status: record.validation_status.as_str().to_string(),
            resolved: record.resolved,
            inter_rater_reliability: record.inter_rater_reliability,
            version: record.version,
            created_at: record.created_at,
            updated_at: record.updated_at,
            document: serde_json::to_value(record)?,
        })
    }

    pub fn into_record(self) -> Result<ValidationRecord, StorageError> {
        let mut record: ValidationRecord = serde_json::from_value(self.document)?;
        // The column is authoritative for the version: it is the one the
        // conditional update checks.
        record.version = self.version;
        Ok(record)
    }
}

/// Evaluator row stored in SurrealDB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorRow {
    pub evaluator_id: String,
    pub display_name: String,
    pub kind: String,
    #[serde(with = "surreal_datetime")]
    pub registered_at: DateTime<Utc>,
    pub total_evaluations: u64,
    pub reliable_evaluations: u64,
    pub agreement_sum: f64,
    #[serde(default, with = "surreal_datetime::option")]
    pub last_evaluated_at: Option<DateTime<Utc>>,
}

impl EvaluatorRow {
    /// A freshly registered evaluator with zeroed counters.
    pub fn new(evaluator: &Evaluator) -> Self {
        Self {
            evaluator_id: evaluator.evaluator_id.clone(),
            display_name: evaluator.display_name.clone(),
            kind: evaluator.kind.as_str().to_string(),
            registered_at: evaluator.registered_at,
            total_evaluations: 0,
            reliable_evaluations: 0,
            agreement_sum: 0.0,
            last_evaluated_at: None,
        }
    }

    pub fn profile(&self) -> Option<ReliabilityProfile> {
        ReliabilityProfile::from_counters(
            self.total_evaluations,
            self.reliable_evaluations,
            self.agreement_sum,
            self.last_evaluated_at,
        )
    }

    pub fn into_evaluator(self) -> Result<Evaluator, StorageError> {
        let kind = EvaluatorKind::parse(&self.kind)
            .ok_or_else(|| StorageError::Backend(format!("unknown evaluator kind: {}", self.kind)))?;
        let reliability_profile = self.profile();
        Ok(Evaluator {
            evaluator_id: self.evaluator_id,
            display_name: self.display_name,
            kind,
            registered_at: self.registered_at,
            reliability_profile,
        })
    }
}

/// Session reference score row stored in SurrealDB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub session_id: String,
    pub reference_score: f64,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl SessionRow {
    pub fn new(session_id: impl Into<String>, reference_score: f64) -> Self {
        Self {
            session_id: session_id.into(),
            reference_score,
            updated_at: Utc::now(),
        }
    }
}
