//! Scoreguard Core Library
//!
//! Scoring reliability statistics, anomaly flagging, the validation
//! workflow and evaluator performance tracking over the storage traits of
//! `scoreguard-state`.

pub mod config;
pub mod domain;
pub mod engine;
pub mod flagging;
pub mod metrics;
pub mod obs;
pub mod reliability;
pub mod report;
pub mod review;
pub mod telemetry;
pub mod tracker;
pub mod workflow;

pub use config::{EngineConfig, StoreConfig, TrackingConfig};
pub use domain::{Result, ScoringError};
pub use engine::ValidationEngine;
pub use flagging::{FlagThresholds, FlaggingEngine, PatternRule};
pub use reliability::{compute_statistics, InterRaterReliability};
pub use report::{EvaluatorReliabilityReport, ReportGenerator, ValidationReport};
pub use review::ReviewQueueService;
pub use tracker::{AgreementStatus, EvaluatorPerformanceTracker, ReliabilityCheck};
pub use workflow::AuditVerification;

pub use scoreguard_state::{
    AuditAction, AuditEntry, CriterionScore, Evaluator, EvaluatorKind, Flag, RecordKey,
    ReliabilityProfile, ValidationRecord, ValidationStatus,
};

pub use metrics::{MetricsSnapshot, METRICS};
pub use obs::{
    emit_conflict_retry, emit_evaluator_tracked, emit_record_flagged, emit_record_resolved,
    emit_score_submitted, record_span,
};
pub use telemetry::init_tracing;

/// Scoreguard version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
