//! # Error Types
//!
//! Domain-specific error types for perk-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  perk-core errors (this file)                                          │
//! │  ├── CoreError        - Catalog, rule-definition and document errors   │
//! │  └── ValidationError  - Field-level validation failures                │
//! │                                                                         │
//! │  perk-db errors (separate crate)                                       │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  perk-engine errors                                                    │
//! │  └── EngineError      - What the scheduler sees                        │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → job status          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Not An Error
//! A cap that truncates a reward is a normal outcome. It is recorded in the
//! justification trace, never raised here.

use chrono::NaiveDate;
use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// No active ruleset covers the transaction date for this card.
    ///
    /// ## When This Occurs
    /// - The card has no ruleset published yet
    /// - The transaction predates the first ruleset or falls in a gap
    ///
    /// The transaction is reported as unmatched and stays visible as
    /// "pending rule coverage" until an administrator backfills a ruleset
    /// and replays.
    #[error("No applicable ruleset for card {card_id} on {date}")]
    NoApplicableRuleset { card_id: String, date: NaiveDate },

    /// More than one active ruleset covers the same date for one card.
    ///
    /// Publication rejects overlaps, so this only appears when stored data
    /// was damaged upstream.
    #[error("Ambiguous rulesets for card {card_id} on {date}: {ruleset_ids:?}")]
    AmbiguousRuleset {
        card_id: String,
        date: NaiveDate,
        ruleset_ids: Vec<String>,
    },

    /// A multiplier rule is malformed (both or neither of inclusion/exclusion,
    /// empty code set, out-of-range code or rate).
    #[error("Invalid rule #{rule_index} ({category}): {reason}")]
    InvalidRuleDefinition {
        rule_index: usize,
        category: String,
        reason: String,
    },

    /// The ruleset document could not be parsed (missing field, wrong type,
    /// unknown field).
    #[error("Invalid ruleset document: {0}")]
    InvalidDocument(String),

    /// Publishing this ruleset would overlap an active ruleset of the same card.
    #[error("Ruleset for card {card_id} overlaps active ruleset {existing}")]
    OverlappingRuleset { card_id: String, existing: String },

    /// A ruleset was applied to a transaction it does not cover (other card,
    /// or posting date outside its effective range).
    #[error("Ruleset {ruleset_id} does not cover transaction {transaction_id}")]
    RulesetMismatch {
        transaction_id: String,
        ruleset_id: String,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Returns true if the error describes bad ruleset data (as opposed to a
    /// catalog lookup result).
    pub fn is_rule_data_error(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidRuleDefinition { .. }
                | CoreError::InvalidDocument(_)
                | CoreError::Validation(_)
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::InvalidDocument(err.to_string())
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Field-level validation errors for ruleset documents and transactions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: String, max: String },

    /// Invalid format (e.g., fractional points, sub-cent cashback).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value (e.g., two caps for the same period and metric).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
