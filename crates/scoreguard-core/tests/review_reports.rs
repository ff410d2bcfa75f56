//! Review queue and report generation tests.

use std::sync::Arc;

use chrono::Duration;
use scoreguard_core::{EngineConfig, EvaluatorKind, ValidationEngine, ValidationStatus};
use scoreguard_state::fakes::{MemoryEvaluatorStore, MemorySessionProvider, MemoryValidationStore};

async fn engine() -> ValidationEngine {
    let mut config = EngineConfig::default();
    config.tracking.background = false;
    let engine = ValidationEngine::new(
        Arc::new(MemoryValidationStore::new()),
        Arc::new(MemoryEvaluatorStore::new()),
        Arc::new(MemorySessionProvider::new()),
        config,
    );
    for id in ["auto", "alice", "bob"] {
        engine
            .register_evaluator(id, id, EvaluatorKind::Human)
            .await
            .unwrap();
    }
    engine
}

async fn scored(engine: &ValidationEngine, session: &str, rubric: &str, scores: &[f64]) {
    engine
        .record_primary_score(session, rubric, "auto", scores[0], vec![])
        .await
        .unwrap();
    for (evaluator, score) in ["alice", "bob"].iter().zip(&scores[1..]) {
        engine
            .submit_secondary_score(session, rubric, evaluator, *score, vec![])
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn review_queue_is_worst_first_and_excludes_resolved() {
    let engine = engine().await;
    scored(&engine, "s1", "r1", &[30.0, 85.0, 95.0]).await; // irr ~0.02
    scored(&engine, "s2", "r1", &[55.0, 90.0]).await; // irr ~0.63
    scored(&engine, "s3", "r1", &[10.0, 90.0]).await; // irr 0.0
    scored(&engine, "s4", "r1", &[80.0, 81.0]).await; // clean, stays pending
    scored(&engine, "s5", "r1", &[0.0, 100.0]).await; // will be resolved

    engine
        .resolve_record("s5", "r1", "val", "checked", ValidationStatus::Invalid, false)
        .await
        .unwrap();

    let queue = engine.find_needing_review(10).await.unwrap();
    let sessions: Vec<&str> = queue.iter().map(|r| r.session_id.as_str()).collect();
    assert_eq!(sessions, vec!["s3", "s1", "s2"]);
    assert!(queue.iter().all(|r| !r.resolved));

    let reliabilities: Vec<f64> = queue
        .iter()
        .map(|r| r.inter_rater_reliability.unwrap())
        .collect();
    assert!(reliabilities.windows(2).all(|w| w[0] <= w[1]));

    assert_eq!(engine.find_needing_review(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn disputed_records_leave_the_queue_but_stay_open() {
    let engine = engine().await;
    scored(&engine, "s1", "r1", &[10.0, 90.0]).await;
    let record = engine
        .resolve_record("s1", "r1", "val", "escalating", ValidationStatus::Disputed, false)
        .await
        .unwrap();
    assert!(!record.resolved);
    assert!(engine.find_needing_review(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn validation_report_aggregates_session() {
    let engine = engine().await;
    scored(&engine, "s1", "r1", &[80.0, 90.0]).await; // discrepancy 10
    scored(&engine, "s1", "r2", &[50.0, 70.0, 40.0]).await; // discrepancies 20, 10
    scored(&engine, "s2", "r1", &[10.0, 90.0]).await; // other session

    let report = engine.generate_validation_report("s1").await.unwrap();
    assert_eq!(report.record_count, 2);
    assert_eq!(report.records.len(), 2);
    assert_eq!(report.evaluator_count, 3);
    assert!((report.average_discrepancy - 40.0 / 3.0).abs() < 1e-9);

    let expected_reliability = report
        .records
        .iter()
        .map(|r| r.inter_rater_reliability.unwrap())
        .sum::<f64>()
        / 2.0;
    assert!((report.reliability_score - expected_reliability).abs() < 1e-12);

    let counted: usize = report.status_counts.values().sum();
    assert_eq!(counted, 2);
    assert_eq!(
        report.flagged_records,
        report.records.iter().filter(|r| !r.flags.is_empty()).count()
    );
}

#[tokio::test]
async fn validation_report_for_empty_session_is_zeroed() {
    let engine = engine().await;
    let report = engine.generate_validation_report("empty").await.unwrap();
    assert_eq!(report.record_count, 0);
    assert_eq!(report.reliability_score, 0.0);
    assert_eq!(report.average_discrepancy, 0.0);
    assert_eq!(report.evaluator_count, 0);
}

#[tokio::test]
async fn evaluator_report_counts_primary_and_secondary_scores() {
    let engine = engine().await;
    scored(&engine, "s1", "r1", &[80.0, 90.0]).await;
    scored(&engine, "s2", "r1", &[60.0, 70.0, 40.0]).await;

    let auto = engine
        .get_evaluator_reliability("auto", Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(auto.record_count, 2);
    assert_eq!(auto.primary_evaluations, 2);
    assert_eq!(auto.score_count, 2);
    assert_eq!(auto.average_score, 70.0);

    let alice = engine
        .get_evaluator_reliability("alice", Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(alice.primary_evaluations, 0);
    assert_eq!(alice.score_count, 2);
    assert_eq!(alice.average_score, 80.0);
    assert!(alice.average_reliability > 0.0);

    let bob = engine
        .get_evaluator_reliability("bob", Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(bob.record_count, 1);
    assert_eq!(bob.average_score, 40.0);
}

#[tokio::test]
async fn evaluator_report_respects_timeframe() {
    let engine = engine().await;
    scored(&engine, "s1", "r1", &[80.0, 90.0]).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let report = engine
        .get_evaluator_reliability("alice", Duration::milliseconds(5))
        .await
        .unwrap();
    assert_eq!(report.score_count, 0);
    assert_eq!(report.record_count, 0);
    assert_eq!(report.average_reliability, 0.0);
}
