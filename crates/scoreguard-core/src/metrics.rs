//! Process-wide counters for scores, flags, resolutions and write retries.
//!
//! The engine bumps them as it goes; nothing is logged until
//! [`Metrics::flush`], which the CLI calls once per command.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    scores_submitted: AtomicU64,
    records_flagged: AtomicU64,
    records_resolved: AtomicU64,
    conflict_retries: AtomicU64,
    evaluations_tracked: AtomicU64,
}

/// Counter values read at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub scores_submitted: u64,
    pub records_flagged: u64,
    pub records_resolved: u64,
    /// Record writes and profile updates that lost a race and ran again
    pub conflict_retries: u64,
    pub evaluations_tracked: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(counter: &AtomicU64, name: &'static str) {
    let value = counter.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::trace!(metric = name, value, "counter incremented");
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            scores_submitted: AtomicU64::new(0),
            records_flagged: AtomicU64::new(0),
            records_resolved: AtomicU64::new(0),
            conflict_retries: AtomicU64::new(0),
            evaluations_tracked: AtomicU64::new(0),
        }
    }

    /// A primary or secondary score was stored.
    pub fn inc_scores_submitted(&self) {
        bump(&self.scores_submitted, "scores_submitted");
    }

    pub fn inc_records_flagged(&self) {
        bump(&self.records_flagged, "records_flagged");
    }

    pub fn inc_records_resolved(&self) {
        bump(&self.records_resolved, "records_resolved");
    }

    pub fn inc_conflict_retries(&self) {
        bump(&self.conflict_retries, "conflict_retries");
    }

    /// An evaluator profile absorbed one evaluation outcome.
    pub fn inc_evaluations_tracked(&self) {
        bump(&self.evaluations_tracked, "evaluations_tracked");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            scores_submitted: self.scores_submitted.load(Ordering::Relaxed),
            records_flagged: self.records_flagged.load(Ordering::Relaxed),
            records_resolved: self.records_resolved.load(Ordering::Relaxed),
            conflict_retries: self.conflict_retries.load(Ordering::Relaxed),
            evaluations_tracked: self.evaluations_tracked.load(Ordering::Relaxed),
        }
    }

    /// Log the current values as one `scoreguard.metrics` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            event = "scoreguard.metrics",
            scores_submitted = s.scores_submitted,
            records_flagged = s.records_flagged,
            records_resolved = s.records_resolved,
            conflict_retries = s.conflict_retries,
            evaluations_tracked = s.evaluations_tracked,
        );
    }

    pub fn reset(&self) {
        for counter in [
            &self.scores_submitted,
            &self.records_flagged,
            &self.records_resolved,
            &self.conflict_retries,
            &self.evaluations_tracked,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
