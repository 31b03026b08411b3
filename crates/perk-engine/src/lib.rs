//! # perk-engine: Evaluation Entry Points for Perk
//!
//! Orchestrates perk-core (pure reward logic) over perk-db (state) and
//! exposes the operations the job scheduler calls.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Job Scheduler            `perk` CLI                                  │
//! │        │                       │                                        │
//! │        └───────────┬───────────┘                                        │
//! │                    ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 perk-engine (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │  evaluate_transaction   → EvaluationReport (terminal status)    │   │
//! │  │  evaluate_many          → bounded by evaluation.concurrency     │   │
//! │  │  replay_ruleset         → ReplayReport                          │   │
//! │  │  activate_ruleset       → Ruleset                               │   │
//! │  │  breakdown              → Rewarded | Pending                    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                    │                                                    │
//! │        ┌───────────┴───────────┐                                        │
//! │        ▼                       ▼                                        │
//! │   perk-core                 perk-db                                    │
//! │   (catalog, resolver,       (rulesets, cap ledger,                     │
//! │    computer, trace)          reward recorder)                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine performs no retries. [`EngineError::is_retryable`] tells the
//! scheduler which failures are safe to retry; every write path is
//! idempotent, so a retry never double-grants.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod replay;
pub mod telemetry;

pub use config::EngineConfig;
pub use engine::{
    Breakdown, Engine, EvaluationReport, IngestReport, Settlement, PENDING_RULE_COVERAGE,
};
pub use error::{EngineError, EngineResult};
pub use replay::{ReplayFailure, ReplayReport};
