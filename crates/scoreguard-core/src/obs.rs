//! Structured lifecycle events for validation records and evaluators.
//!
//! Events are emitted at `info!` level with an `event` field naming them, so
//! they can be filtered with `RUST_LOG` and shipped as JSON when the
//! subscriber is initialised with `json = true`.

use tracing::{info, info_span, warn, Span};

use scoreguard_state::{Flag, RecordKey, ValidationStatus};

/// Span scoping one record operation.
///
/// Attach it to the operation's future so it stays correct across `.await`:
///
/// ```ignore
/// engine.get_record(s, r).instrument(record_span(&key)).await
/// ```
pub fn record_span(key: &RecordKey) -> Span {
    info_span!("scoreguard.record", record = %key)
}

/// Emit event: a primary or secondary score was stored.
pub fn emit_score_submitted(key: &RecordKey, evaluator_id: &str, score: f64, revised: bool) {
    info!(
        event = "score.submitted",
        record = %key,
        evaluator_id = %evaluator_id,
        score = score,
        revised = revised,
    );
}

/// Emit event: recalculation left the record with a non-empty flag set.
pub fn emit_record_flagged(key: &RecordKey, flags: &[Flag], escalated: bool) {
    let names: Vec<&str> = flags.iter().map(|f| f.as_str()).collect();
    info!(
        event = "record.flagged",
        record = %key,
        flags = ?names,
        escalated = escalated,
    );
}

/// Emit event: a validator decision was applied.
pub fn emit_record_resolved(
    key: &RecordKey,
    validator_id: &str,
    status: ValidationStatus,
    overridden: bool,
) {
    info!(
        event = "record.resolved",
        record = %key,
        validator_id = %validator_id,
        status = %status,
        overridden = overridden,
    );
}

/// Emit event: a record write lost a version race and will be retried.
pub fn emit_conflict_retry(key: &RecordKey, attempt: u32) {
    warn!(event = "record.conflict_retry", record = %key, attempt = attempt);
}

/// Emit event: an evaluator profile was updated.
pub fn emit_evaluator_tracked(evaluator_id: &str, reliable: bool, total_evaluations: u64) {
    info!(
        event = "evaluator.tracked",
        evaluator_id = %evaluator_id,
        reliable = reliable,
        total_evaluations = total_evaluations,
    );
}

/// Emit event: a background profile update failed (warning level).
pub fn emit_tracking_error(evaluator_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "evaluator.tracking_error", evaluator_id = %evaluator_id, error = %error);
}
