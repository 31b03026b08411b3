//! # Engine Error Types
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Domain      │  │      Persistence        │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Core(..)       │  │  Db(..)                 │ │
//! │  │  ConfigLoad..   │  │  InvalidInput   │  │  is_retryable() decides │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Terminal evaluation states (unmatched, ambiguous, invalid rule data)  │
//! │  are NOT errors: they come back as an EvaluationReport status.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use perk_core::CoreError;
use perk_db::DbError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type.
#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to initialize logging.
    #[error("Failed to initialize logging: {0}")]
    LoggingFailed(String),

    // =========================================================================
    // Input Errors
    // =========================================================================
    /// A document or transaction file could not be parsed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The transaction id is unknown to the ingestion store.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// The ruleset id is unknown.
    #[error("Ruleset not found: {0}")]
    RulesetNotFound(String),

    // =========================================================================
    // Domain and Persistence Errors
    // =========================================================================
    /// A domain rule rejected the operation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Database failure.
    #[error(transparent)]
    Db(DbError),

    /// File I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal engine error (task panics, closed semaphores).
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Domain(core) => EngineError::Core(core),
            other => EngineError::Db(other),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::InvalidInput(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl EngineError {
    /// Returns true if the job scheduler may retry the same call.
    ///
    /// ## Retryable Errors
    /// - Lock contention and pool exhaustion
    /// - Stale reservations
    /// - A ruleset superseded mid-evaluation
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Invalid documents and rule data
    /// - Unknown transactions or rulesets
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Db(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidConfig(_)
                | EngineError::ConfigLoadFailed(_)
                | EngineError::LoggingFailed(_)
        )
    }

    /// Returns true if the error is a fault in ruleset data.
    pub fn is_rule_data_error(&self) -> bool {
        matches!(self, EngineError::Core(err) if err.is_rule_data_error())
    }
}
