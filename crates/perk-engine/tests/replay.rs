//! Retroactive corrections: replaying a superseded ruleset must leave the
//! books exactly as if the correction had been in force from the start.

use chrono::NaiveDate;
use perk_core::{EvaluationStatus, RulesetDocument, Transaction};
use perk_db::{Database, DbConfig};
use perk_engine::{Breakdown, Engine, EngineError};

const ORIGINAL: &str = r#"{
    "card_id": "card-2",
    "version": "v1",
    "base_rate": 1,
    "multipliers": [ { "category": "electronics", "include_mccs": [5732], "rate": 5 } ],
    "caps": [ { "period": "calendar_month", "metric": "points", "max": 1000 } ],
    "effective_from": "2024-01-01"
}"#;

async fn engine() -> Engine {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    Engine::new(db, 4)
}

fn statement() -> Vec<Transaction> {
    let tx = |id: &str, day: u32, amount_cents: i64, mcc: u16| Transaction {
        id: id.to_string(),
        card_id: "card-2".to_string(),
        posted_on: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
        amount_cents,
        mcc,
        description: None,
    };
    vec![
        tx("tx-a", 1, 10_000, 5732),
        tx("tx-b", 2, 10_000, 5732),
        tx("tx-c", 3, 10_000, 5732),
        tx("tx-d", 4, 5_000, 5411),
    ]
}

fn ids() -> Vec<String> {
    statement().into_iter().map(|tx| tx.id).collect()
}

/// The corrected document: electronics at `rate`, monthly cap of `cap`.
fn correction(rate: u32, cap: u32, effective_from: &str) -> RulesetDocument {
    let mut doc = RulesetDocument::from_json(ORIGINAL).unwrap();
    doc.version = "v2".to_string();
    doc.multipliers[0].rate = rate.to_string().parse().unwrap();
    doc.caps[0].max = cap.into();
    doc.effective_from = effective_from.parse().unwrap();
    doc
}

/// Evaluates the statement under v1, then publishes `fix` as a correction
/// and replays v1. Returns the engine, v1 id and v2 id.
async fn corrected(mut fix: RulesetDocument) -> (Engine, String, String) {
    let engine = engine().await;
    let v1 = engine.activate_ruleset(ORIGINAL).await.unwrap();
    engine.ingest_transactions(&statement()).await.unwrap();

    for id in ids() {
        engine.evaluate_transaction(&id).await.unwrap();
    }
    // 500 + 500 fill the cap; the rest are truncated to nothing.
    assert_eq!(engine.balance("card-2", &v1.id, "2024-03").await.unwrap().points, 1_000);

    fix.supersedes = Some(v1.id.clone());
    let v2 = engine.activate_document(&fix).await.unwrap();
    (engine, v1.id, v2.id)
}

/// Points per transaction when only `doc` was ever published.
async fn applied_alone(doc: RulesetDocument) -> (Vec<i64>, i64) {
    let engine = engine().await;
    let ruleset = engine.activate_document(&doc).await.unwrap();
    engine.ingest_transactions(&statement()).await.unwrap();

    let mut points = Vec::new();
    for id in ids() {
        let report = engine.evaluate_transaction(&id).await.unwrap();
        points.push(report.outcome.map(|o| o.points).unwrap_or(0));
    }
    let balance = engine
        .balance("card-2", &ruleset.id, "2024-03")
        .await
        .unwrap()
        .points;
    (points, balance)
}

async fn active_points(engine: &Engine) -> Vec<i64> {
    let mut points = Vec::new();
    for id in ids() {
        let stored = engine
            .database()
            .rewards()
            .active_for_transaction(&id)
            .await
            .unwrap()
            .unwrap();
        points.push(stored.outcome.points);
    }
    points
}

#[tokio::test]
async fn test_replay_matches_correction_applied_from_start() {
    let fix = correction(3, 1_000, "2024-01-01");
    let (engine, v1, v2) = corrected(fix.clone()).await;

    let report = engine.replay_ruleset(&v1).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.replaced, ids());

    let (expected_points, expected_balance) = applied_alone(fix).await;
    assert_eq!(expected_points, vec![300, 300, 300, 50]);
    assert_eq!(active_points(&engine).await, expected_points);

    assert_eq!(
        engine.balance("card-2", &v2, "2024-03").await.unwrap().points,
        expected_balance
    );
    assert_eq!(engine.balance("card-2", &v1, "2024-03").await.unwrap().points, 0);
}

#[tokio::test]
async fn test_replay_with_tighter_cap() {
    let fix = correction(5, 600, "2024-01-01");
    let (engine, v1, v2) = corrected(fix.clone()).await;

    engine.replay_ruleset(&v1).await.unwrap();

    let (expected_points, expected_balance) = applied_alone(fix).await;
    assert_eq!(expected_points, vec![500, 100, 0, 0]);
    assert_eq!(active_points(&engine).await, expected_points);
    assert_eq!(
        engine.balance("card-2", &v2, "2024-03").await.unwrap().points,
        expected_balance
    );
}

#[tokio::test]
async fn test_replay_twice_is_a_no_op() {
    let (engine, v1, v2) = corrected(correction(3, 1_000, "2024-01-01")).await;

    engine.replay_ruleset(&v1).await.unwrap();
    let again = engine.replay_ruleset(&v1).await.unwrap();
    assert_eq!(again.total(), 0);

    // Everything now lives under v2 and replays onto itself.
    let current = engine.replay_ruleset(&v2).await.unwrap();
    assert_eq!(current.unchanged, ids());
    assert_eq!(engine.balance("card-2", &v2, "2024-03").await.unwrap().points, 950);

    for id in ids() {
        let history = engine.database().rewards().history(&id).await.unwrap();
        assert_eq!(history.len(), 2, "{id}");
        assert!(!history[0].is_active());
        assert_eq!(history[0].superseded_by_ruleset.as_deref(), Some(v2.as_str()));
        assert!(history[1].is_active());
    }
}

#[tokio::test]
async fn test_replay_keeps_outcomes_no_longer_covered() {
    // The correction only starts on March 3rd.
    let (engine, v1, _v2) = corrected(correction(3, 1_000, "2024-03-03")).await;

    let report = engine.replay_ruleset(&v1).await.unwrap();

    assert_eq!(report.unmatched, vec!["tx-a", "tx-b"]);
    assert_eq!(report.replaced, vec!["tx-c", "tx-d"]);
    assert!(report.is_clean());

    // tx-a and tx-b keep their v1 grants until a ruleset covers them again.
    assert_eq!(active_points(&engine).await, vec![500, 500, 300, 50]);
    assert_eq!(engine.balance("card-2", &v1, "2024-03").await.unwrap().points, 1_000);

    // The cardholder still sees the grant, flagged as awaiting coverage.
    match engine.breakdown("tx-a").await.unwrap() {
        Breakdown::Rewarded { outcome, status, .. } => {
            assert_eq!(outcome.ruleset_id, v1);
            assert_eq!(status, Some(EvaluationStatus::UnmatchedRuleset));
        }
        other => panic!("expected Rewarded, got {other:?}"),
    }
    match engine.breakdown("tx-c").await.unwrap() {
        Breakdown::Rewarded { status, .. } => {
            assert_eq!(status, Some(EvaluationStatus::Rewarded))
        }
        other => panic!("expected Rewarded, got {other:?}"),
    }
}

#[tokio::test]
async fn test_evaluating_after_correction_settles_onto_new_ruleset() {
    let (engine, v1, v2) = corrected(correction(3, 1_000, "2024-01-01")).await;

    // The scheduler may re-trigger a transaction before the replay runs.
    let report = engine.evaluate_transaction("tx-c").await.unwrap();
    assert_eq!(report.ruleset_id.as_deref(), Some(v2.as_str()));
    assert_eq!(report.outcome.unwrap().points, 300);

    let replay = engine.replay_ruleset(&v1).await.unwrap();
    assert_eq!(replay.replaced, vec!["tx-a", "tx-b", "tx-d"]);
    assert_eq!(engine.balance("card-2", &v2, "2024-03").await.unwrap().points, 950);
}

#[tokio::test]
async fn test_superseding_twice_is_rejected() {
    let (engine, v1, _v2) = corrected(correction(3, 1_000, "2024-01-01")).await;

    let mut again = correction(4, 1_000, "2024-01-01");
    again.version = "v3".to_string();
    again.supersedes = Some(v1);

    let err = engine.activate_document(&again).await.unwrap_err();
    assert!(!err.is_retryable());
    assert!(matches!(err, EngineError::Core(_)), "unexpected error: {err}");
}
