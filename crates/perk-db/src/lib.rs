//! # perk-db: Database Layer for Perk
//!
//! This crate provides persistent state for the Perk rewards engine.
//! It uses SQLite with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Perk Data Flow                                   │
//! │                                                                         │
//! │  Engine::evaluate_transaction(tx_id)                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     perk-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │  │   │
//! │  │   │               │    │ Transactions   │    │              │  │   │
//! │  │   │ SqlitePool    │    │ Rulesets       │    │ 001_initial_ │  │   │
//! │  │   │ WAL, busy     │◄───│ CapLedger      │    │   schema.sql │  │   │
//! │  │   │ timeout       │    │ RewardRecorder │    │              │  │   │
//! │  │   │               │    │ Evaluations    │    │              │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   ~/.local/share/perk/perk.db (or [database] path)              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use perk_core::RewardComputer;
//! use perk_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("perk.db")).await?;
//!
//! let ruleset = db.rulesets().activate(&document).await?;
//! let tx = db.transactions().get_by_id("tx-1").await?.unwrap();
//! let ack = db.rewards().settle(&RewardComputer::new(), &tx, &ruleset, now).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{ensure_parent_dir, Database, DbConfig};

// Repository re-exports for convenience
pub use repository::cap::{AdjustmentReason, CapAdjustment, CapLedger};
pub use repository::evaluation::{EvaluationRecord, EvaluationRepository};
pub use repository::reward::{Ack, RewardRecorder, StoredOutcome};
pub use repository::ruleset::{RulesetRecord, RulesetRepository};
pub use repository::transaction::TransactionRepository;
