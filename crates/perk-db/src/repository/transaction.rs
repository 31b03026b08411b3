//! # Transaction Repository
//!
//! Normalized purchase transactions. The ingestion collaborator writes them;
//! the engine only reads. Rows are never updated.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use perk_core::Transaction;

/// Row shape of the `transactions` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransactionRow {
    pub id: String,
    pub card_id: String,
    pub posted_on: NaiveDate,
    pub amount_cents: i64,
    pub mcc: i64,
    pub description: Option<String>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = DbError;

    fn try_from(row: TransactionRow) -> DbResult<Self> {
        let mcc = u16::try_from(row.mcc)
            .map_err(|_| DbError::corrupt("Transaction", &row.id, format!("mcc {}", row.mcc)))?;

        Ok(Transaction {
            id: row.id,
            card_id: row.card_id,
            posted_on: row.posted_on,
            amount_cents: row.amount_cents,
            mcc,
            description: row.description,
        })
    }
}

/// Repository for transaction database operations.
#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pool: SqlitePool,
}

impl TransactionRepository {
    /// Creates a new TransactionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TransactionRepository { pool }
    }

    /// Inserts a transaction.
    ///
    /// ## Errors
    /// [`DbError::UniqueViolation`] if the id was already ingested.
    pub async fn insert(&self, tx: &Transaction) -> DbResult<()> {
        debug!(id = %tx.id, card_id = %tx.card_id, "Inserting transaction");

        let created_at: DateTime<Utc> = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, card_id, posted_on, amount_cents, mcc, description, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&tx.id)
        .bind(&tx.card_id)
        .bind(tx.posted_on)
        .bind(tx.amount_cents)
        .bind(i64::from(tx.mcc))
        .bind(&tx.description)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(field, &tx.id),
            other => other,
        })?;

        Ok(())
    }

    /// Gets a transaction by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Transaction>> {
        let row: Option<TransactionRow> = sqlx::query_as(
            r#"
            SELECT id, card_id, posted_on, amount_cents, mcc, description
            FROM transactions
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Transaction::try_from).transpose()
    }

    /// Lists a card's transactions posted in `[from, to)`, oldest first.
    pub async fn list_for_card(
        &self,
        card_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DbResult<Vec<Transaction>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(
            r#"
            SELECT id, card_id, posted_on, amount_cents, mcc, description
            FROM transactions
            WHERE card_id = ?1 AND posted_on >= ?2 AND posted_on < ?3
            ORDER BY posted_on, id
            "#,
        )
        .bind(card_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Transaction::try_from).collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
