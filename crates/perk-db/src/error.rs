//! # Store Errors
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sqlx::Error ──► classify ──► DbError ◄── CoreError (DbError::Domain)   │
//! │                                  │                                      │
//! │                                  ▼                                      │
//! │                       EngineError (perk-engine)                         │
//! │                                                                         │
//! │  Retryable (scheduler may try the same call again):                     │
//! │    Busy, PoolExhausted, ConnectionFailed,                               │
//! │    StaleReservation, RulesetSuperseded                                  │
//! │  Not retryable (needs different input or an administrator):             │
//! │    NotFound, UniqueViolation, ForeignKeyViolation, OutcomeConflict,     │
//! │    Corrupt, Domain, MigrationFailed, QueryFailed, Internal              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every write path is one SQLite transaction, so a retryable failure never
//! leaves a partial reservation behind.

use perk_core::{CoreError, RewardMetric};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    /// A transaction, ruleset or outcome id that does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A row that must be unique already exists.
    ///
    /// ## When This Occurs
    /// - Ingesting a transaction id twice
    /// - Publishing a (card, version) pair twice
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// A row references a transaction or ruleset that is not stored.
    ///
    /// Repositories usually turn this into [`DbError::NotFound`] naming the
    /// missing entity.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// The outcome was computed against a cap balance that has since moved.
    ///
    /// ## When This Occurs
    /// Another evaluation in the same (card, ruleset, period) was recorded
    /// between computing this outcome and recording it. Nothing was written;
    /// recompute and retry.
    #[error(
        "Stale reservation for transaction {transaction_id}: {metric} balance is {actual}, outcome assumed {assumed}"
    )]
    StaleReservation {
        transaction_id: String,
        metric: RewardMetric,
        assumed: i64,
        actual: i64,
    },

    /// The transaction already has an active outcome under another ruleset.
    ///
    /// `record` refuses to create a second active outcome; use `replace`.
    #[error("Transaction {transaction_id} is already rewarded under ruleset {active_ruleset}")]
    OutcomeConflict {
        transaction_id: String,
        active_ruleset: String,
    },

    /// The ruleset was superseded after the evaluation selected it.
    ///
    /// ## When This Occurs
    /// A correction was activated between catalog resolution and settlement.
    /// Nothing was written; resolving the catalog again picks the successor.
    #[error("Ruleset {ruleset_id} has been superseded")]
    RulesetSuperseded { ruleset_id: String },

    /// Stored data no longer decodes into a domain type.
    #[error("Corrupt {entity} {id}: {reason}")]
    Corrupt {
        entity: String,
        id: String,
        reason: String,
    },

    /// A domain rule rejected the operation (invalid ruleset, overlap, ...).
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// Another writer held the SQLite write lock for longer than the
    /// configured busy timeout. Cap reservations on a hot card land here
    /// under heavy contention.
    #[error("Store busy: {0}")]
    Busy(String),

    /// Every pooled connection stayed checked out past the acquire timeout.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// The store could not be opened, or the pool was closed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Any other statement failure reported by SQLite.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn corrupt(
        entity: impl Into<String>,
        id: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        DbError::Corrupt {
            entity: entity.into(),
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    /// True if repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DbError::Busy(_)
                | DbError::PoolExhausted
                | DbError::ConnectionFailed(_)
                | DbError::StaleReservation { .. }
                | DbError::RulesetSuperseded { .. }
        )
    }

    /// Maps a SQLite error message onto a category.
    ///
    /// ```text
    /// "UNIQUE constraint failed: <table>.<column>"  → UniqueViolation
    /// "FOREIGN KEY constraint failed"               → ForeignKeyViolation
    /// "database is locked" (SQLITE_BUSY)            → Busy
    /// anything else                                 → QueryFailed
    /// ```
    fn classify(message: &str) -> Self {
        if let Some(column) = message.strip_prefix("UNIQUE constraint failed: ") {
            DbError::duplicate(column, "unknown")
        } else if message.contains("FOREIGN KEY constraint failed") {
            DbError::ForeignKeyViolation {
                message: message.to_string(),
            }
        } else if message.contains("database is locked")
            || message.contains("database table is locked")
        {
            DbError::Busy(message.to_string())
        } else {
            DbError::QueryFailed(message.to_string())
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Record", "unknown"),
            sqlx::Error::Database(db_err) => DbError::classify(db_err.message()),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool is closed".to_string()),
            other => DbError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;
