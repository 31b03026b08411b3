//! # Repository Module
//!
//! Database repository implementations for Perk.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  perk-engine                                                           │
//! │       │                                                                 │
//! │       │  db.rewards().settle(&computer, &tx, &ruleset, now)            │
//! │       ▼                                                                 │
//! │  RewardRecorder ──uses──► CapLedger (same SQLite transaction)          │
//! │  RulesetRepository ─────► RulesetCatalog (perk-core) for overlap checks│
//! │  TransactionRepository, EvaluationRepository                           │
//! │       │                                                                 │
//! │       │  SQL                                                            │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`TransactionRepository`](transaction::TransactionRepository) - Ingested transactions
//! - [`RulesetRepository`](ruleset::RulesetRepository) - Publication, supersession, catalog loading
//! - [`CapLedger`](cap::CapLedger) - Atomic cap reservations and reversals
//! - [`RewardRecorder`](reward::RewardRecorder) - Idempotent outcome recording and replacement
//! - [`EvaluationRepository`](evaluation::EvaluationRepository) - Terminal status per transaction

pub mod cap;
pub mod evaluation;
pub mod reward;
pub mod ruleset;
pub mod transaction;
