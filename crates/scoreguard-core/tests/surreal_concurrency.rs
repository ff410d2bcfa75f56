//! Concurrent submission against the SurrealDB backend (`mem://`).
//!
//! Aborted transactions must come back as conflicts the engine retries,
//! never as backend errors or lost writes.

use std::sync::Arc;

use chrono::Utc;
use scoreguard_core::{EngineConfig, EvaluatorKind, ValidationEngine};
use scoreguard_state::{EvaluationOutcome, EvaluatorProfileStore, SurrealStore};

async fn engine(evaluators: usize) -> (ValidationEngine, SurrealStore) {
    let store = SurrealStore::in_memory().await.unwrap();
    let mut config = EngineConfig::default();
    config.tracking.background = false;
    config.store.max_conflict_retries = 256;
    let engine = ValidationEngine::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        config,
    );
    engine
        .register_evaluator("primary", "Primary", EvaluatorKind::Automated)
        .await
        .unwrap();
    for i in 0..evaluators {
        engine
            .register_evaluator(&format!("e{i}"), "Human", EvaluatorKind::Human)
            .await
            .unwrap();
    }
    (engine, store)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn surreal_concurrent_secondary_scores_are_all_kept() {
    const N: usize = 12;
    let (engine, _) = engine(N).await;
    engine
        .record_primary_score("s1", "r1", "primary", 70.0, vec![])
        .await
        .unwrap();

    let tasks = (0..N).map(|i| {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .submit_secondary_score("s1", "r1", &format!("e{i}"), 70.0, vec![])
                .await
        })
    });
    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }

    let record = engine.get_record("s1", "r1").await.unwrap();
    assert_eq!(record.secondary_scores.len(), N);
    assert_eq!(record.version, 1 + N as u64);
    assert!(engine.verify_audit_trail("s1", "r1").await.unwrap().valid);

    for i in 0..N {
        let evaluator = engine.get_evaluator(&format!("e{i}")).await.unwrap();
        assert_eq!(evaluator.reliability_profile.unwrap().total_evaluations, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn surreal_concurrent_primary_creation_yields_one_record() {
    let (engine, _) = engine(4).await;

    let tasks = (0..4).map(|i| {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .record_primary_score("s1", "r1", &format!("e{i}"), 50.0 + i as f64, vec![])
                .await
        })
    });
    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }

    let record = engine.get_record("s1", "r1").await.unwrap();
    assert_eq!(record.version, 4);
    assert!(record.secondary_scores.is_empty());
    let report = engine.generate_validation_report("s1").await.unwrap();
    assert_eq!(report.record_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn surreal_concurrent_tracking_loses_no_increments() {
    const N: u64 = 50;
    let (engine, store) = engine(1).await;

    let tasks = (0..N).map(|i| {
        let tracker = engine.tracker().clone();
        tokio::spawn(async move {
            tracker
                .track_evaluator_performance(
                    "e0",
                    &EvaluationOutcome {
                        is_reliable: i % 5 != 0,
                        discrepancy: 8.0,
                        evaluated_at: Utc::now(),
                    },
                )
                .await
        })
    });
    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }

    let profile = EvaluatorProfileStore::get(&store, "e0")
        .await
        .unwrap()
        .reliability_profile
        .unwrap();
    assert_eq!(profile.total_evaluations, N);
    assert_eq!(profile.reliable_evaluations, 40);
}
