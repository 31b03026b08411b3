//! # Cap Ledger
//!
//! Running totals per (card, ruleset, period) and the only code that
//! mutates them.
//!
//! ## Serialized Read-Modify-Write
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  BEGIN                                                                 │
//! │    INSERT … ON CONFLICT DO NOTHING   ← first statement is a write, so  │
//! │                                         the SQLite write lock is taken │
//! │                                         before the balance is read     │
//! │    SELECT points, cashback_cents     ← nobody else can move it now     │
//! │    grant = min(proposed, max - balance)                                │
//! │    UPDATE cap_balances += grant                                        │
//! │    INSERT cap_adjustments (audit)                                      │
//! │  COMMIT                              ← other writers were queued on    │
//! │                                         busy_timeout the whole time    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two evaluations near a cap boundary therefore see each other's grants
//! and never jointly overgrant. Balances only go down through an explicit
//! [`CapLedger::release`] tied to a correction.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::DbResult;
use perk_core::cap::{self, CapGrant};
use perk_core::{CapBalance, CapKey, PeriodKey, RewardMetric};

/// Why a balance moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum AdjustmentReason {
    Reserve,
    Release,
}

/// One row of the append-only adjustment log.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CapAdjustment {
    pub id: i64,
    pub metric: RewardMetric,
    pub delta: i64,
    pub reason: AdjustmentReason,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct BalanceRow {
    points: i64,
    cashback_cents: i64,
}

impl From<BalanceRow> for CapBalance {
    fn from(row: BalanceRow) -> Self {
        CapBalance {
            points: row.points,
            cashback_cents: row.cashback_cents,
        }
    }
}

// =============================================================================
// Connection-Level Operations
// =============================================================================
// Used by CapLedger and by RewardRecorder inside its own transaction.

/// Creates the balance row if missing and returns the current balance.
///
/// Must be the first statement of the enclosing transaction.
pub(crate) async fn lock_balance(
    conn: &mut SqliteConnection,
    key: &CapKey,
    now: DateTime<Utc>,
) -> DbResult<CapBalance> {
    sqlx::query(
        r#"
        INSERT INTO cap_balances (
            card_id, ruleset_id, period_key, points, cashback_cents, created_at, updated_at
        ) VALUES (?1, ?2, ?3, 0, 0, ?4, ?4)
        ON CONFLICT (card_id, ruleset_id, period_key) DO NOTHING
        "#,
    )
    .bind(&key.card_id)
    .bind(&key.ruleset_id)
    .bind(key.period.as_str())
    .bind(now)
    .execute(&mut *conn)
    .await?;

    read_balance(conn, key).await
}

async fn read_balance(conn: &mut SqliteConnection, key: &CapKey) -> DbResult<CapBalance> {
    let row: Option<BalanceRow> = sqlx::query_as(
        r#"
        SELECT points, cashback_cents
        FROM cap_balances
        WHERE card_id = ?1 AND ruleset_id = ?2 AND period_key = ?3
        "#,
    )
    .bind(&key.card_id)
    .bind(&key.ruleset_id)
    .bind(key.period.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(CapBalance::from).unwrap_or_default())
}

/// Moves one metric of a locked balance by `delta` and logs the adjustment.
pub(crate) async fn adjust(
    conn: &mut SqliteConnection,
    key: &CapKey,
    metric: RewardMetric,
    delta: i64,
    reason: AdjustmentReason,
    transaction_id: Option<&str>,
    now: DateTime<Utc>,
) -> DbResult<()> {
    if delta == 0 {
        return Ok(());
    }

    let update = match metric {
        RewardMetric::Points => {
            "UPDATE cap_balances SET points = points + ?4, updated_at = ?5 \
             WHERE card_id = ?1 AND ruleset_id = ?2 AND period_key = ?3"
        }
        RewardMetric::Cashback => {
            "UPDATE cap_balances SET cashback_cents = cashback_cents + ?4, updated_at = ?5 \
             WHERE card_id = ?1 AND ruleset_id = ?2 AND period_key = ?3"
        }
    };

    sqlx::query(update)
        .bind(&key.card_id)
        .bind(&key.ruleset_id)
        .bind(key.period.as_str())
        .bind(delta)
        .bind(now)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO cap_adjustments (
            card_id, ruleset_id, period_key, metric, delta, reason, transaction_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&key.card_id)
    .bind(&key.ruleset_id)
    .bind(key.period.as_str())
    .bind(metric)
    .bind(delta)
    .bind(reason)
    .bind(transaction_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

// =============================================================================
// Cap Ledger
// =============================================================================

/// Atomic cap reservations against `cap_balances`.
#[derive(Debug, Clone)]
pub struct CapLedger {
    pool: SqlitePool,
}

impl CapLedger {
    /// Creates a new CapLedger.
    pub fn new(pool: SqlitePool) -> Self {
        CapLedger { pool }
    }

    /// Reserves up to `proposed` of `metric` in the `key` scope.
    ///
    /// Grants `min(proposed, limit - balance)` floored at zero, or the full
    /// amount when `limit` is `None`. Caps truncate; they never reject.
    pub async fn reserve(
        &self,
        key: &CapKey,
        metric: RewardMetric,
        proposed: i64,
        limit: Option<i64>,
        transaction_id: Option<&str>,
    ) -> DbResult<CapGrant> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let balance = lock_balance(&mut tx, key, now).await?;
        let grant = cap::grant(limit, balance.get(metric), proposed);
        adjust(
            &mut tx,
            key,
            metric,
            grant.granted,
            AdjustmentReason::Reserve,
            transaction_id,
            now,
        )
        .await?;

        tx.commit().await?;

        if grant.is_truncated() {
            info!(
                cap_key = %key,
                metric = %metric,
                requested = grant.requested,
                granted = grant.granted,
                truncated = grant.truncated,
                "Reservation truncated by cap"
            );
        } else {
            debug!(cap_key = %key, metric = %metric, granted = grant.granted, "Reserved");
        }

        Ok(grant)
    }

    /// Returns up to `amount` of `metric` to the `key` scope.
    ///
    /// Never takes a balance below zero. Returns the amount released.
    pub async fn release(
        &self,
        key: &CapKey,
        metric: RewardMetric,
        amount: i64,
        transaction_id: Option<&str>,
    ) -> DbResult<i64> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let balance = lock_balance(&mut tx, key, now).await?;
        let released = amount.max(0).min(balance.get(metric));
        adjust(
            &mut tx,
            key,
            metric,
            -released,
            AdjustmentReason::Release,
            transaction_id,
            now,
        )
        .await?;

        tx.commit().await?;

        debug!(cap_key = %key, metric = %metric, released, "Released");
        Ok(released)
    }

    /// Current balance; an untouched period is empty.
    pub async fn balance(&self, key: &CapKey) -> DbResult<CapBalance> {
        let mut conn = self.pool.acquire().await?;
        read_balance(&mut conn, key).await
    }

    /// Balance for a card, ruleset and period given as separate parts.
    pub async fn balance_for(
        &self,
        card_id: &str,
        ruleset_id: &str,
        period: PeriodKey,
    ) -> DbResult<CapBalance> {
        self.balance(&CapKey::new(card_id, ruleset_id, period)).await
    }

    /// The adjustment log for one scope, oldest first.
    pub async fn adjustments(&self, key: &CapKey) -> DbResult<Vec<CapAdjustment>> {
        let rows = sqlx::query_as(
            r#"
            SELECT id, metric, delta, reason, transaction_id, created_at
            FROM cap_adjustments
            WHERE card_id = ?1 AND ruleset_id = ?2 AND period_key = ?3
            ORDER BY id
            "#,
        )
        .bind(&key.card_id)
        .bind(&key.ruleset_id)
        .bind(key.period.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
