//! # Evaluation Repository
//!
//! Last terminal status per transaction, as reported to the job scheduler.
//! A transaction that is not yet rewarded shows up here as
//! `unmatched-ruleset` until a covering ruleset is activated and the
//! evaluation is rerun.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use perk_core::EvaluationStatus;

/// A stored evaluation status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct EvaluationRecord {
    pub transaction_id: String,
    pub status: EvaluationStatus,
    pub ruleset_id: Option<String>,
    pub detail: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Repository for evaluation status rows.
#[derive(Debug, Clone)]
pub struct EvaluationRepository {
    pool: SqlitePool,
}

impl EvaluationRepository {
    /// Creates a new EvaluationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        EvaluationRepository { pool }
    }

    /// Stores the latest status for a transaction, replacing any earlier one.
    pub async fn upsert(
        &self,
        transaction_id: &str,
        status: EvaluationStatus,
        ruleset_id: Option<&str>,
        detail: Option<&str>,
    ) -> DbResult<()> {
        debug!(transaction_id, status = %status, "Storing evaluation status");

        sqlx::query(
            r#"
            INSERT INTO evaluations (transaction_id, status, ruleset_id, detail, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (transaction_id) DO UPDATE SET
                status = excluded.status,
                ruleset_id = excluded.ruleset_id,
                detail = excluded.detail,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(transaction_id)
        .bind(status)
        .bind(ruleset_id)
        .bind(detail)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::ForeignKeyViolation { .. } => DbError::not_found("Transaction", transaction_id),
            other => other,
        })?;

        Ok(())
    }

    /// Gets the latest status for a transaction.
    pub async fn get(&self, transaction_id: &str) -> DbResult<Option<EvaluationRecord>> {
        let record = sqlx::query_as(
            r#"
            SELECT transaction_id, status, ruleset_id, detail, updated_at
            FROM evaluations
            WHERE transaction_id = ?1
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Transactions whose last evaluation ended in `status`, by id.
    pub async fn list_by_status(&self, status: EvaluationStatus) -> DbResult<Vec<EvaluationRecord>> {
        let records = sqlx::query_as(
            r#"
            SELECT transaction_id, status, ruleset_id, detail, updated_at
            FROM evaluations
            WHERE status = ?1
            ORDER BY transaction_id
            "#,
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
