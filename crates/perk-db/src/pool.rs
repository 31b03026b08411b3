//! # Connection Pool
//!
//! Opens the SQLite store and hands out repositories.
//!
//! ## Who Waits On What
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  evaluate_many ── N tasks ──► SqlitePool (max_connections)              │
//! │                                   │                                     │
//! │            ┌──────────────────────┼──────────────────────┐              │
//! │            ▼                      ▼                      ▼              │
//! │     catalog lookup         transaction load       RewardRecorder        │
//! │     (WAL reader)           (WAL reader)           BEGIN                 │
//! │     never blocks           never blocks           INSERT cap_balances   │
//! │                                                    └─ write lock, or    │
//! │                                                       wait busy_timeout │
//! │                                                                         │
//! │  A task waiting for a pooled connection gives up after acquire_timeout │
//! │  (DbError::PoolExhausted). A writer waiting for the lock gives up after │
//! │  busy_timeout ("database is locked", DbError::Busy).                    │
//! │  Both are retryable.                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `:memory:` databases exist per connection, so [`DbConfig::in_memory`]
//! pins the pool to a single connection.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::cap::CapLedger;
use crate::repository::evaluation::EvaluationRepository;
use crate::repository::reward::RewardRecorder;
use crate::repository::ruleset::RulesetRepository;
use crate::repository::transaction::TransactionRepository;

const IN_MEMORY: &str = ":memory:";

/// Pooled connections are recycled after this long unused.
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

// =============================================================================
// Configuration
// =============================================================================

/// Where the store lives and how callers queue for it.
///
/// ## Example
/// ```rust
/// use perk_db::DbConfig;
/// use std::time::Duration;
///
/// let config = DbConfig::new("/var/lib/perk/perk.db")
///     .max_connections(8)
///     .busy_timeout(Duration::from_secs(10));
/// assert_eq!(config.max_connections, 8);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// SQLite file, created on first open.
    pub database_path: PathBuf,

    /// Upper bound on pooled connections. Default: 5
    pub max_connections: u32,

    /// How long a caller waits for a pooled connection. Default: 30 seconds
    pub acquire_timeout: Duration,

    /// How long a writer waits for the SQLite write lock. Cap reservations
    /// for busy cards queue here. Default: 5 seconds
    pub busy_timeout: Duration,

    /// Apply embedded migrations on open. Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Settings for a file-backed store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    /// A private in-memory store on one connection (tests, dry runs).
    pub fn in_memory() -> Self {
        DbConfig {
            max_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            ..DbConfig::new(IN_MEMORY)
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// True for the `:memory:` database.
    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let base = if self.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
        } else {
            SqliteConnectOptions::new()
                .filename(&self.database_path)
                .create_if_missing(true)
        };

        Ok(base
            .journal_mode(SqliteJournalMode::Wal)
            // Durable against crashes; a power cut may lose the last commit.
            .synchronous(SqliteSynchronous::Normal)
            // Outcomes reference transactions and rulesets.
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout))
    }
}

// =============================================================================
// Database
// =============================================================================

/// Handle to the store. Clones share one pool.
///
/// ```rust,ignore
/// let db = Database::new(DbConfig::new("perk.db")).await?;
/// let ruleset = db.rulesets().load(&ruleset_id).await?;
/// let balance = db.cap_ledger().balance(&key).await?;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the store and, unless disabled, brings the schema up to date.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            max_connections = config.max_connections,
            busy_timeout_ms = config.busy_timeout.as_millis() as u64,
            "Opening rewards store"
        );

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(1)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(IDLE_TIMEOUT))
            .connect_with(config.connect_options()?)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        let db = Database { pool };
        if config.run_migrations {
            db.run_migrations().await?;
        } else {
            debug!("Skipping migrations");
        }
        Ok(db)
    }

    /// Applies pending embedded migrations.
    pub async fn run_migrations(&self) -> DbResult<()> {
        migrations::run_migrations(&self.pool).await?;
        debug!("Schema up to date");
        Ok(())
    }

    /// The raw pool, for tests and ad-hoc maintenance queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn transactions(&self) -> TransactionRepository {
        TransactionRepository::new(self.pool.clone())
    }

    pub fn rulesets(&self) -> RulesetRepository {
        RulesetRepository::new(self.pool.clone())
    }

    pub fn cap_ledger(&self) -> CapLedger {
        CapLedger::new(self.pool.clone())
    }

    pub fn rewards(&self) -> RewardRecorder {
        RewardRecorder::new(self.pool.clone())
    }

    pub fn evaluations(&self) -> EvaluationRepository {
        EvaluationRepository::new(self.pool.clone())
    }

    /// Waits for checked-out connections and closes the pool. Repository
    /// calls made afterwards fail with [`DbError::ConnectionFailed`].
    pub async fn close(&self) {
        info!("Closing rewards store");
        self.pool.close().await;
    }

    /// True when a trivial query succeeds.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

/// Creates the parent directory of a file-backed store if it is missing.
pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && path.as_os_str() != IN_MEMORY => {
            std::fs::create_dir_all(parent)
        }
        _ => Ok(()),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
