//! Review queue: open records awaiting a validator, worst first.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::instrument;

use scoreguard_state::{ValidationRecord, ValidationRecordStore, ValidationStatus};

use crate::domain::error::Result;

/// Triage order: ascending reliability, unknown reliability last, then oldest
/// first.
pub fn triage_order(a: &ValidationRecord, b: &ValidationRecord) -> Ordering {
    let by_reliability = match (a.inter_rater_reliability, b.inter_rater_reliability) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_reliability.then_with(|| a.created_at.cmp(&b.created_at))
}

#[derive(Clone)]
pub struct ReviewQueueService {
    records: Arc<dyn ValidationRecordStore>,
}

impl ReviewQueueService {
    pub fn new(records: Arc<dyn ValidationRecordStore>) -> Self {
        Self { records }
    }

    /// Up to `limit` unresolved `needs_review` records, least reliable first.
    #[instrument(skip(self))]
    pub async fn find_needing_review(&self, limit: usize) -> Result<Vec<ValidationRecord>> {
        let mut queue: Vec<ValidationRecord> = self
            .records
            .list_needing_review()
            .await?
            .into_iter()
            .filter(|r| !r.resolved && r.validation_status == ValidationStatus::NeedsReview)
            .collect();
        queue.sort_by(triage_order);
        queue.truncate(limit);
        Ok(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use scoreguard_state::fakes::MemoryValidationStore;
    use scoreguard_state::RecordKey;

    fn queued(session: &str, irr: Option<f64>, age_secs: i64) -> ValidationRecord {
        let created = Utc::now() - Duration::seconds(age_secs);
        let mut r = ValidationRecord::new(RecordKey::new(session, "r"), "a", 50.0, vec![], created);
        r.inter_rater_reliability = irr;
        r.validation_status = ValidationStatus::NeedsReview;
        r
    }

    #[tokio::test]
    async fn queue_is_sorted_with_unknown_last_and_limited() {
        let store = Arc::new(MemoryValidationStore::new());
        store.insert(queued("s1", Some(0.6), 0)).await.unwrap();
        store.insert(queued("s2", None, 0)).await.unwrap();
        store.insert(queued("s3", Some(0.1), 0)).await.unwrap();
        store.insert(queued("s4", Some(0.6), 100)).await.unwrap();

        let service = ReviewQueueService::new(store);
        let queue = service.find_needing_review(10).await.unwrap();
        let order: Vec<&str> = queue.iter().map(|r| r.session_id.as_str()).collect();
        assert_eq!(order, vec!["s3", "s4", "s1", "s2"]);

        let top = service.find_needing_review(2).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].session_id, "s3");
    }

    #[tokio::test]
    async fn zero_limit_is_empty() {
        let store = Arc::new(MemoryValidationStore::new());
        store.insert(queued("s1", Some(0.2), 0)).await.unwrap();
        let queue = ReviewQueueService::new(store).find_needing_review(0).await.unwrap();
        assert!(queue.is_empty());
    }
}
