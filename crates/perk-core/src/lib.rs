//! # perk-core: Pure Reward Logic for Perk
//!
//! This crate is the **heart** of the Perk rewards engine. It contains all
//! reward computation as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Perk Architecture                                │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            Job Scheduler / CLI (perk-engine)                    │   │
//! │  │    EvaluateTransaction, ReplayForRuleset, activate_ruleset      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ perk-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │  catalog  │  │ resolver  │  │    cap    │  │ computer  │  │   │
//! │  │   │ ruleset   │─►│ first     │─►│ truncate  │─►│ outcome + │  │   │
//! │  │   │ by date   │  │ match     │  │ to limit  │  │ trace     │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    perk-db (Database Layer)                     │   │
//! │  │     rulesets, cap ledger, reward recorder, evaluation status    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Transactions, rates, metrics, periods, cap balances
//! - [`money`] - Money and Points with half-up rounding
//! - [`ruleset`] - Ruleset document, validated ruleset, MCC matchers
//! - [`catalog`] - Ruleset selection by card and date
//! - [`resolver`] - First-match multiplier resolution
//! - [`cap`] - Cap truncation arithmetic
//! - [`computer`] - Outcome + justification trace for one transaction
//! - [`outcome`] - RewardOutcome and trace steps
//! - [`error`] - Domain error types
//! - [`validation`] - Field validation
//!
//! ## Design Principles
//!
//! 1. **Deterministic**: same transaction, ruleset and prior balance give the same outcome
//! 2. **No I/O**: database, network, clock and file access are FORBIDDEN here
//! 3. **Exact Arithmetic**: rates are decimals, amounts are integer cents/points
//! 4. **Explicit Errors**: all errors are typed, never strings or panics
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::{NaiveDate, Utc};
//! use perk_core::{CapBalance, RewardComputer, Ruleset, Transaction};
//!
//! let ruleset = Ruleset::from_json("rs-1", r#"{
//!     "card_id": "card-1", "version": "v1", "reward_type": "cashback",
//!     "base_rate": 0.01,
//!     "multipliers": [{ "category": "electronics", "include_mccs": [5732], "rate": 0.04 }],
//!     "caps": [], "effective_from": "2024-01-01"
//! }"#).unwrap();
//!
//! let tx = Transaction {
//!     id: "tx-1".into(),
//!     card_id: "card-1".into(),
//!     posted_on: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
//!     amount_cents: 12_345,
//!     mcc: 5732,
//!     description: None,
//! };
//!
//! let outcome = RewardComputer::new()
//!     .evaluate(&tx, &ruleset, &CapBalance::empty(), Utc::now())
//!     .unwrap();
//!
//! // $123.45 × 4% = $4.938 → $4.94
//! assert_eq!(outcome.cashback_cents, 494);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cap;
pub mod catalog;
pub mod computer;
pub mod error;
pub mod money;
pub mod outcome;
pub mod resolver;
pub mod ruleset;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use catalog::RulesetCatalog;
pub use computer::RewardComputer;
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::{Money, Points};
pub use outcome::{JustificationTrace, RewardOutcome, TraceStep};
pub use resolver::{RateSource, ResolvedRate, RuleResolver};
pub use ruleset::{EffectiveRange, MccMatch, Ruleset, RulesetDocument, RulesetHeader};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Highest valid merchant category code (MCCs are four digits).
pub const MAX_MCC: u16 = 9999;

/// Posting years must fit the four-digit `YYYY-MM` period key.
pub const MAX_POSTING_YEAR: i32 = 9999;

/// Upper bound for any rate.
///
/// ## Business Reason
/// Rejects rates that can only be typos (`400` for a 4% rate) while still
/// allowing generous points multipliers.
pub const MAX_RATE: rust_decimal::Decimal = rust_decimal::Decimal::ONE_HUNDRED;

/// Maximum multiplier rules in one ruleset.
pub const MAX_RULES: usize = 256;

/// Maximum length of card ids, version labels and ruleset ids.
pub const MAX_IDENTIFIER_LEN: usize = 128;
