//! # Reward Recorder
//!
//! Persists [`RewardOutcome`]s together with their cap reservations.
//!
//! ## One Logical Unit
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN                                                                 │
//! │    lock cap balance (card, ruleset, period)                            │
//! │    active outcome for the transaction?                                 │
//! │      ├── same ruleset      → AlreadyRecorded (nothing written)         │
//! │      └── other ruleset     → release its grants, mark it superseded    │
//! │    reserve granted amounts                                             │
//! │    INSERT reward_outcomes                                              │
//! │  COMMIT   ← a failure anywhere above rolls back the reservation too    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rows are never deleted. A replaced outcome keeps its row with
//! `superseded_at` / `superseded_by_ruleset` set, so [`RewardRecorder::history`]
//! is the audit trail for a transaction.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::cap::{adjust, lock_balance, AdjustmentReason};
use crate::repository::ruleset::{fetch_record, RulesetRecord};
use perk_core::{
    cap, CapBalance, CapKey, CoreError, JustificationTrace, PeriodKey, RewardComputer,
    RewardMetric, RewardOutcome, Ruleset, TraceStep, Transaction, ValidationError,
};

// =============================================================================
// Acknowledgements
// =============================================================================

/// What a recording call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// A new outcome was written and its grants reserved.
    Recorded(RewardOutcome),

    /// The transaction already had an active outcome under this ruleset.
    /// Nothing was written; the stored outcome is returned.
    AlreadyRecorded(RewardOutcome),

    /// The active outcome under another ruleset was reversed and superseded.
    Replaced {
        previous: RewardOutcome,
        current: RewardOutcome,
    },
}

impl Ack {
    /// The outcome that is active after the call.
    pub fn outcome(&self) -> &RewardOutcome {
        match self {
            Ack::Recorded(outcome) | Ack::AlreadyRecorded(outcome) => outcome,
            Ack::Replaced { current, .. } => current,
        }
    }

    pub fn into_outcome(self) -> RewardOutcome {
        match self {
            Ack::Recorded(outcome) | Ack::AlreadyRecorded(outcome) => outcome,
            Ack::Replaced { current, .. } => current,
        }
    }

    /// True if the call changed stored state.
    pub fn wrote(&self) -> bool {
        !matches!(self, Ack::AlreadyRecorded(_))
    }
}

// =============================================================================
// Stored Outcomes
// =============================================================================

/// A `reward_outcomes` row, active or superseded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredOutcome {
    pub id: i64,
    pub outcome: RewardOutcome,
    pub recorded_at: DateTime<Utc>,
    pub superseded_at: Option<DateTime<Utc>>,
    pub superseded_by_ruleset: Option<String>,
}

impl StoredOutcome {
    pub fn is_active(&self) -> bool {
        self.superseded_at.is_none()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OutcomeRow {
    id: i64,
    transaction_id: String,
    ruleset_id: String,
    ruleset_version: String,
    card_id: String,
    period_key: String,
    points: i64,
    cashback_cents: i64,
    trace: String,
    computed_at: DateTime<Utc>,
    recorded_at: DateTime<Utc>,
    superseded_at: Option<DateTime<Utc>>,
    superseded_by_ruleset: Option<String>,
}

impl TryFrom<OutcomeRow> for StoredOutcome {
    type Error = DbError;

    fn try_from(row: OutcomeRow) -> DbResult<Self> {
        let period: PeriodKey = row
            .period_key
            .parse()
            .map_err(|e| DbError::corrupt("RewardOutcome", row.id.to_string(), e))?;
        let trace: JustificationTrace = serde_json::from_str(&row.trace)
            .map_err(|e| DbError::corrupt("RewardOutcome", row.id.to_string(), e))?;

        Ok(StoredOutcome {
            id: row.id,
            outcome: RewardOutcome {
                transaction_id: row.transaction_id,
                ruleset_id: row.ruleset_id,
                ruleset_version: row.ruleset_version,
                card_id: row.card_id,
                period,
                points: row.points,
                cashback_cents: row.cashback_cents,
                trace,
                computed_at: row.computed_at,
            },
            recorded_at: row.recorded_at,
            superseded_at: row.superseded_at,
            superseded_by_ruleset: row.superseded_by_ruleset,
        })
    }
}

const SELECT_OUTCOME: &str = r#"
    SELECT
        id, transaction_id, ruleset_id, ruleset_version, card_id, period_key,
        points, cashback_cents, trace, computed_at, recorded_at,
        superseded_at, superseded_by_ruleset
    FROM reward_outcomes
"#;

// =============================================================================
// Connection-Level Steps
// =============================================================================

async fn active_outcome(
    conn: &mut SqliteConnection,
    transaction_id: &str,
) -> DbResult<Option<StoredOutcome>> {
    let row: Option<OutcomeRow> = sqlx::query_as(&format!(
        "{SELECT_OUTCOME} WHERE transaction_id = ?1 AND superseded_at IS NULL"
    ))
    .bind(transaction_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(StoredOutcome::try_from).transpose()
}

async fn require_active_ruleset(
    conn: &mut SqliteConnection,
    ruleset_id: &str,
) -> DbResult<RulesetRecord> {
    let record = fetch_record(conn, ruleset_id)
        .await?
        .ok_or_else(|| DbError::not_found("Ruleset", ruleset_id))?;

    if !record.is_active() {
        return Err(DbError::RulesetSuperseded {
            ruleset_id: ruleset_id.to_string(),
        });
    }
    Ok(record)
}

/// Returns `prior`'s grants to its cap scope and marks it superseded.
async fn reverse(
    conn: &mut SqliteConnection,
    prior: &StoredOutcome,
    by_ruleset: &str,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let outcome = &prior.outcome;
    let key = outcome.cap_key();
    let balance = lock_balance(conn, &key, now).await?;

    for metric in RewardMetric::ALL {
        let released = outcome.granted(metric).min(balance.get(metric));
        adjust(
            conn,
            &key,
            metric,
            -released,
            AdjustmentReason::Release,
            Some(&outcome.transaction_id),
            now,
        )
        .await?;
    }

    // Must precede the new insert: one active row per transaction.
    sqlx::query(
        r#"
        UPDATE reward_outcomes
        SET superseded_at = ?2, superseded_by_ruleset = ?3
        WHERE id = ?1
        "#,
    )
    .bind(prior.id)
    .bind(now)
    .bind(by_ruleset)
    .execute(&mut *conn)
    .await?;

    debug!(
        transaction_id = %outcome.transaction_id,
        ruleset_id = %outcome.ruleset_id,
        superseded_by = by_ruleset,
        "Outcome reversed"
    );
    Ok(())
}

/// Reserves `outcome`'s grants and inserts it as the active row.
///
/// The outcome's cap balance must already be locked.
async fn write(
    conn: &mut SqliteConnection,
    outcome: &RewardOutcome,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let key = outcome.cap_key();
    for metric in RewardMetric::ALL {
        adjust(
            conn,
            &key,
            metric,
            outcome.granted(metric),
            AdjustmentReason::Reserve,
            Some(&outcome.transaction_id),
            now,
        )
        .await?;
    }

    let trace =
        serde_json::to_string(&outcome.trace).map_err(|e| DbError::Internal(e.to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO reward_outcomes (
            transaction_id, ruleset_id, ruleset_version, card_id, period_key,
            points, cashback_cents, trace, computed_at, recorded_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&outcome.transaction_id)
    .bind(&outcome.ruleset_id)
    .bind(&outcome.ruleset_version)
    .bind(&outcome.card_id)
    .bind(outcome.period.as_str())
    .bind(outcome.points)
    .bind(outcome.cashback_cents)
    .bind(&trace)
    .bind(outcome.computed_at)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| match DbError::from(e) {
        DbError::ForeignKeyViolation { .. } => {
            DbError::not_found("Transaction", &outcome.transaction_id)
        }
        DbError::UniqueViolation { .. } => DbError::duplicate(
            "outcome",
            format!("{}/{}", outcome.transaction_id, outcome.ruleset_id),
        ),
        other => other,
    })?;

    Ok(())
}

/// The prior balance a precomputed outcome's trace assumed for `metric`.
fn assumed_prior(trace: &JustificationTrace, metric: RewardMetric) -> Option<i64> {
    trace.steps().iter().find_map(|step| match step {
        TraceStep::CapChecked {
            metric: m, prior, ..
        } if *m == metric => Some(*prior),
        _ => None,
    })
}

/// Rejects an outcome whose grants no longer fit the live balance, or whose
/// trace explains a balance that has since moved.
fn check_reservation(
    ruleset: &Ruleset,
    outcome: &RewardOutcome,
    live: &CapBalance,
) -> DbResult<()> {
    for metric in RewardMetric::ALL {
        let claimed = outcome.granted(metric);
        let actual = live.get(metric);
        let limit = ruleset.cap(metric).map(|c| c.max);
        let assumed = assumed_prior(&outcome.trace, metric);

        let fits = cap::grant(limit, actual, claimed).granted == claimed;
        let explained = assumed.map_or(true, |prior| prior == actual);

        if !fits || !explained {
            return Err(DbError::StaleReservation {
                transaction_id: outcome.transaction_id.clone(),
                metric,
                assumed: assumed.unwrap_or(0),
                actual,
            });
        }
    }
    Ok(())
}

// =============================================================================
// Reward Recorder
// =============================================================================

/// Records reward outcomes and keeps cap balances in step with them.
#[derive(Debug, Clone)]
pub struct RewardRecorder {
    pool: SqlitePool,
}

impl RewardRecorder {
    /// Creates a new RewardRecorder.
    pub fn new(pool: SqlitePool) -> Self {
        RewardRecorder { pool }
    }

    /// Records a precomputed outcome.
    ///
    /// Idempotent on (transaction_id, ruleset_id): repeating the call
    /// returns [`Ack::AlreadyRecorded`] with the stored outcome.
    ///
    /// ## Errors
    /// - [`DbError::StaleReservation`] if the cap balance moved since the
    ///   outcome was computed (nothing written, recompute and retry)
    /// - [`DbError::OutcomeConflict`] if the transaction is already rewarded
    ///   under another ruleset
    /// - [`DbError::RulesetSuperseded`] if the ruleset is no longer active
    /// - [`DbError::NotFound`] if the transaction was never ingested
    pub async fn record(&self, outcome: &RewardOutcome) -> DbResult<Ack> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let live = lock_balance(&mut tx, &outcome.cap_key(), now).await?;

        if let Some(prior) = active_outcome(&mut tx, &outcome.transaction_id).await? {
            tx.rollback().await?;
            if prior.outcome.ruleset_id == outcome.ruleset_id {
                debug!(
                    transaction_id = %outcome.transaction_id,
                    ruleset_id = %outcome.ruleset_id,
                    "Outcome already recorded"
                );
                return Ok(Ack::AlreadyRecorded(prior.outcome));
            }
            return Err(DbError::OutcomeConflict {
                transaction_id: outcome.transaction_id.clone(),
                active_ruleset: prior.outcome.ruleset_id,
            });
        }

        let ruleset = require_active_ruleset(&mut tx, &outcome.ruleset_id)
            .await?
            .decode()?;
        check_reservation(&ruleset, outcome, &live)?;
        write(&mut tx, outcome, now).await?;

        tx.commit().await?;

        info!(
            transaction_id = %outcome.transaction_id,
            ruleset_id = %outcome.ruleset_id,
            period = %outcome.period,
            points = outcome.points,
            cashback_cents = outcome.cashback_cents,
            "Outcome recorded"
        );
        Ok(Ack::Recorded(outcome.clone()))
    }

    /// Evaluates `transaction` under `ruleset` against the live cap balance
    /// and records the result, all inside one locked SQLite transaction.
    ///
    /// If the transaction is already rewarded under a different ruleset,
    /// that outcome is reversed and superseded first ([`Ack::Replaced`]).
    /// This is how a replay moves a transaction onto a corrected ruleset.
    pub async fn settle(
        &self,
        computer: &RewardComputer,
        transaction: &Transaction,
        ruleset: &Ruleset,
        computed_at: DateTime<Utc>,
    ) -> DbResult<Ack> {
        let now = Utc::now();
        let key = CapKey::new(
            &*transaction.card_id,
            &*ruleset.id,
            computer.period_for(ruleset, transaction),
        );
        let mut tx = self.pool.begin().await?;

        let live = lock_balance(&mut tx, &key, now).await?;

        let prior = active_outcome(&mut tx, &transaction.id).await?;
        if let Some(stored) = &prior {
            if stored.outcome.ruleset_id == ruleset.id {
                tx.rollback().await?;
                debug!(
                    transaction_id = %transaction.id,
                    ruleset_id = %ruleset.id,
                    "Outcome already recorded"
                );
                return Ok(Ack::AlreadyRecorded(stored.outcome.clone()));
            }
        }

        require_active_ruleset(&mut tx, &ruleset.id).await?;

        if let Some(stored) = &prior {
            reverse(&mut tx, stored, &ruleset.id, now).await?;
        }

        let outcome = computer.evaluate(transaction, ruleset, &live, computed_at)?;
        write(&mut tx, &outcome, now).await?;

        tx.commit().await?;

        match prior {
            Some(previous) => {
                info!(
                    transaction_id = %transaction.id,
                    from_ruleset = %previous.outcome.ruleset_id,
                    to_ruleset = %ruleset.id,
                    points = outcome.points,
                    cashback_cents = outcome.cashback_cents,
                    "Outcome replaced"
                );
                Ok(Ack::Replaced {
                    previous: previous.outcome,
                    current: outcome,
                })
            }
            None => {
                debug!(
                    transaction_id = %transaction.id,
                    ruleset_id = %ruleset.id,
                    period = %outcome.period,
                    points = outcome.points,
                    cashback_cents = outcome.cashback_cents,
                    "Outcome settled"
                );
                Ok(Ack::Recorded(outcome))
            }
        }
    }

    /// Replaces the transaction's active outcome with a precomputed one.
    ///
    /// Reverses the prior grants before reserving the new ones, so a
    /// corrected transaction never counts twice against a cap. Replacing
    /// with an outcome under the same ruleset is a no-op
    /// ([`Ack::AlreadyRecorded`]): rulesets are immutable, so the stored
    /// outcome stands.
    ///
    /// ## Errors
    /// - [`DbError::NotFound`] if the transaction has no active outcome
    /// - [`DbError::StaleReservation`] as for [`RewardRecorder::record`]
    pub async fn replace(&self, transaction_id: &str, new_outcome: &RewardOutcome) -> DbResult<Ack> {
        if new_outcome.transaction_id != transaction_id {
            return Err(DbError::Domain(CoreError::Validation(
                ValidationError::InvalidFormat {
                    field: "transaction_id".to_string(),
                    reason: format!(
                        "outcome is for {}, not {}",
                        new_outcome.transaction_id, transaction_id
                    ),
                },
            )));
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let live = lock_balance(&mut tx, &new_outcome.cap_key(), now).await?;

        let prior = active_outcome(&mut tx, transaction_id)
            .await?
            .ok_or_else(|| DbError::not_found("RewardOutcome", transaction_id))?;

        if prior.outcome.ruleset_id == new_outcome.ruleset_id {
            tx.rollback().await?;
            debug!(transaction_id, ruleset_id = %new_outcome.ruleset_id, "Outcome already recorded");
            return Ok(Ack::AlreadyRecorded(prior.outcome));
        }

        let ruleset = require_active_ruleset(&mut tx, &new_outcome.ruleset_id)
            .await?
            .decode()?;
        reverse(&mut tx, &prior, &new_outcome.ruleset_id, now).await?;
        check_reservation(&ruleset, new_outcome, &live)?;
        write(&mut tx, new_outcome, now).await?;

        tx.commit().await?;

        info!(
            transaction_id,
            from_ruleset = %prior.outcome.ruleset_id,
            to_ruleset = %new_outcome.ruleset_id,
            "Outcome replaced"
        );
        Ok(Ack::Replaced {
            previous: prior.outcome,
            current: new_outcome.clone(),
        })
    }

    /// The transaction's active outcome, if any.
    pub async fn active_for_transaction(&self, transaction_id: &str) -> DbResult<Option<StoredOutcome>> {
        let mut conn = self.pool.acquire().await?;
        active_outcome(&mut conn, transaction_id).await
    }

    /// Every outcome ever recorded for the transaction, oldest first.
    pub async fn history(&self, transaction_id: &str) -> DbResult<Vec<StoredOutcome>> {
        let rows: Vec<OutcomeRow> =
            sqlx::query_as(&format!("{SELECT_OUTCOME} WHERE transaction_id = ?1 ORDER BY id"))
                .bind(transaction_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(StoredOutcome::try_from).collect()
    }

    /// Ids of transactions whose active outcome is under `ruleset_id`,
    /// ordered by posting date then id.
    pub async fn active_transaction_ids(&self, ruleset_id: &str) -> DbResult<Vec<String>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT o.transaction_id
            FROM reward_outcomes o
            JOIN transactions t ON t.id = o.transaction_id
            WHERE o.ruleset_id = ?1 AND o.superseded_at IS NULL
            ORDER BY t.posted_on, t.id
            "#,
        )
        .bind(ruleset_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::{NaiveDate, TimeZone};
    use perk_core::RulesetDocument;

    fn doc(version: &str, rate: u32, supersedes: Option<&str>) -> RulesetDocument {
        let supersedes = supersedes
            .map(|s| format!("\"{s}\""))
            .unwrap_or_else(|| "null".to_string());
        RulesetDocument::from_json(&format!(
            r#"{{
                "card_id": "card-1",
                "version": "{version}",
                "base_rate": 1,
                "multipliers": [
                    {{ "category": "electronics", "include_mccs": [5732], "rate": {rate} }}
                ],
                "caps": [ {{ "period": "calendar_month", "metric": "points", "max": 10000 }} ],
                "effective_from": "2024-01-01",
                "supersedes": {supersedes}
            }}"#
        ))
        .unwrap()
    }

    fn tx(id: &str, day: u32, amount_cents: i64) -> Transaction {
        Transaction {
            id: id.to_string(),
            card_id: "card-1".to_string(),
            posted_on: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            amount_cents,
            mcc: 5732,
            description: None,
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap()
    }

    async fn setup(txs: &[Transaction]) -> (Database, Ruleset) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let ruleset = db.rulesets().activate(&doc("v1", 5, None)).await.unwrap();
        for t in txs {
            db.transactions().insert(t).await.unwrap();
        }
        (db, ruleset)
    }

    fn key(ruleset: &Ruleset) -> CapKey {
        CapKey::new("card-1", &*ruleset.id, "2024-03".parse().unwrap())
    }

    #[tokio::test]
    async fn test_settle_records_and_reserves() {
        let t = tx("tx-1", 5, 10_000);
        let (db, ruleset) = setup(&[t.clone()]).await;

        let ack = db
            .rewards()
            .settle(&RewardComputer::new(), &t, &ruleset, at())
            .await
            .unwrap();

        assert!(matches!(ack, Ack::Recorded(_)));
        assert_eq!(ack.outcome().points, 500);
        assert_eq!(db.cap_ledger().balance(&key(&ruleset)).await.unwrap().points, 500);

        let stored = db.rewards().active_for_transaction("tx-1").await.unwrap().unwrap();
        assert_eq!(&stored.outcome, ack.outcome());
        assert!(stored.is_active());
    }

    #[tokio::test]
    async fn test_settle_twice_is_a_no_op() {
        let t = tx("tx-1", 5, 10_000);
        let (db, ruleset) = setup(&[t.clone()]).await;
        let computer = RewardComputer::new();

        let first = db.rewards().settle(&computer, &t, &ruleset, at()).await.unwrap();
        let second = db.rewards().settle(&computer, &t, &ruleset, at()).await.unwrap();

        assert!(!second.wrote());
        assert_eq!(second.outcome(), first.outcome());
        assert_eq!(db.cap_ledger().balance(&key(&ruleset)).await.unwrap().points, 500);
        assert_eq!(db.rewards().history("tx-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_is_idempotent() {
        let t = tx("tx-1", 5, 10_000);
        let (db, ruleset) = setup(&[t.clone()]).await;
        let outcome = RewardComputer::new()
            .evaluate(&t, &ruleset, &CapBalance::empty(), at())
            .unwrap();

        let first = db.rewards().record(&outcome).await.unwrap();
        let second = db.rewards().record(&outcome).await.unwrap();

        assert_eq!(first, Ack::Recorded(outcome.clone()));
        assert_eq!(second, Ack::AlreadyRecorded(outcome));
        assert_eq!(db.cap_ledger().balance(&key(&ruleset)).await.unwrap().points, 500);
    }

    #[tokio::test]
    async fn test_record_rejects_stale_balance() {
        let a = tx("tx-a", 5, 10_000);
        let b = tx("tx-b", 6, 10_000);
        let (db, ruleset) = setup(&[a.clone(), b.clone()]).await;
        let computer = RewardComputer::new();

        // Both computed against an empty balance.
        let oa = computer.evaluate(&a, &ruleset, &CapBalance::empty(), at()).unwrap();
        let ob = computer.evaluate(&b, &ruleset, &CapBalance::empty(), at()).unwrap();

        db.rewards().record(&oa).await.unwrap();
        let err = db.rewards().record(&ob).await.unwrap_err();

        assert!(matches!(
            err,
            DbError::StaleReservation {
                assumed: 0,
                actual: 500,
                ..
            }
        ));
        assert!(err.is_retryable());
        assert!(db.rewards().active_for_transaction("tx-b").await.unwrap().is_none());
        assert_eq!(db.cap_ledger().balance(&key(&ruleset)).await.unwrap().points, 500);
    }

    #[tokio::test]
    async fn test_settle_truncates_at_cap() {
        // $1 980.00 at 5x = 9 900 points, then $100.00 at 5x = 500 requested.
        let big = tx("tx-big", 1, 198_000);
        let small = tx("tx-small", 2, 10_000);
        let (db, ruleset) = setup(&[big.clone(), small.clone()]).await;
        let computer = RewardComputer::new();

        db.rewards().settle(&computer, &big, &ruleset, at()).await.unwrap();
        let ack = db.rewards().settle(&computer, &small, &ruleset, at()).await.unwrap();

        assert_eq!(ack.outcome().points, 100);
        assert_eq!(ack.outcome().trace.truncated(RewardMetric::Points), 400);
        assert_eq!(
            db.cap_ledger().balance(&key(&ruleset)).await.unwrap().points,
            10_000
        );
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back_reservation() {
        let (db, ruleset) = setup(&[]).await;
        let never_ingested = tx("tx-ghost", 5, 10_000);

        let err = db
            .rewards()
            .settle(&RewardComputer::new(), &never_ingested, &ruleset, at())
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::NotFound { .. }));
        assert_eq!(
            db.cap_ledger().balance(&key(&ruleset)).await.unwrap(),
            CapBalance::empty()
        );
    }

    #[tokio::test]
    async fn test_settle_under_correction_replaces_and_reverses() {
        let t = tx("tx-1", 5, 10_000);
        let (db, v1) = setup(&[t.clone()]).await;
        let computer = RewardComputer::new();
        db.rewards().settle(&computer, &t, &v1, at()).await.unwrap();

        let v2 = db
            .rulesets()
            .activate(&doc("v2", 10, Some(&v1.id)))
            .await
            .unwrap();
        let ack = db.rewards().settle(&computer, &t, &v2, at()).await.unwrap();

        match &ack {
            Ack::Replaced { previous, current } => {
                assert_eq!(previous.points, 500);
                assert_eq!(current.points, 1_000);
            }
            other => panic!("expected Replaced, got {other:?}"),
        }
        assert_eq!(db.cap_ledger().balance(&key(&v1)).await.unwrap().points, 0);
        assert_eq!(db.cap_ledger().balance(&key(&v2)).await.unwrap().points, 1_000);

        let history = db.rewards().history("tx-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].is_active());
        assert_eq!(history[0].superseded_by_ruleset.as_deref(), Some(v2.id.as_str()));
        assert!(history[1].is_active());
    }

    #[tokio::test]
    async fn test_settle_under_superseded_ruleset_is_rejected() {
        let t = tx("tx-1", 5, 10_000);
        let (db, v1) = setup(&[t.clone()]).await;
        db.rulesets()
            .activate(&doc("v2", 10, Some(&v1.id)))
            .await
            .unwrap();

        let err = db
            .rewards()
            .settle(&RewardComputer::new(), &t, &v1, at())
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::RulesetSuperseded { .. }));
        assert!(db.rewards().active_for_transaction("tx-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_precomputed_outcome() {
        let t = tx("tx-1", 5, 10_000);
        let (db, v1) = setup(&[t.clone()]).await;
        let computer = RewardComputer::new();
        db.rewards().settle(&computer, &t, &v1, at()).await.unwrap();

        let v2 = db
            .rulesets()
            .activate(&doc("v2", 10, Some(&v1.id)))
            .await
            .unwrap();
        let corrected = computer.evaluate(&t, &v2, &CapBalance::empty(), at()).unwrap();

        let ack = db.rewards().replace("tx-1", &corrected).await.unwrap();
        assert!(matches!(ack, Ack::Replaced { .. }));
        assert_eq!(db.cap_ledger().balance(&key(&v1)).await.unwrap().points, 0);
        assert_eq!(db.cap_ledger().balance(&key(&v2)).await.unwrap().points, 1_000);

        // Replacing again with the same outcome changes nothing.
        let again = db.rewards().replace("tx-1", &corrected).await.unwrap();
        assert!(!again.wrote());
        assert_eq!(db.cap_ledger().balance(&key(&v2)).await.unwrap().points, 1_000);
    }

    #[tokio::test]
    async fn test_record_conflicts_with_other_active_ruleset() {
        let t = tx("tx-1", 5, 10_000);
        let (db, v1) = setup(&[t.clone()]).await;
        let computer = RewardComputer::new();
        let original = computer.evaluate(&t, &v1, &CapBalance::empty(), at()).unwrap();
        db.rewards().record(&original).await.unwrap();

        let v2 = db
            .rulesets()
            .activate(&doc("v2", 10, Some(&v1.id)))
            .await
            .unwrap();
        let corrected = computer.evaluate(&t, &v2, &CapBalance::empty(), at()).unwrap();

        let err = db.rewards().record(&corrected).await.unwrap_err();
        assert!(matches!(err, DbError::OutcomeConflict { .. }));
    }

    #[tokio::test]
    async fn test_active_transaction_ids_are_ordered() {
        let late = tx("tx-a", 20, 1_000);
        let early = tx("tx-z", 3, 1_000);
        let same_day = tx("tx-m", 3, 1_000);
        let (db, ruleset) = setup(&[late.clone(), early.clone(), same_day.clone()]).await;
        let computer = RewardComputer::new();

        for t in [&late, &early, &same_day] {
            db.rewards().settle(&computer, t, &ruleset, at()).await.unwrap();
        }

        let ids = db.rewards().active_transaction_ids(&ruleset.id).await.unwrap();
        assert_eq!(ids, vec!["tx-m", "tx-z", "tx-a"]);
    }
}
