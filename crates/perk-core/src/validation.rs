//! # Validation Module
//!
//! Field-level validation for ruleset documents and ingested transactions.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Deserialization (serde)                                      │
//! │  ├── Missing required fields, wrong types, unknown fields              │
//! │  └── → CoreError::InvalidDocument                                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE + ruleset::MultiplierRule                        │
//! │  ├── Identifiers, rate bounds, date ranges, cap units                  │
//! │  └── Rule shape (include XOR exclude) → InvalidRuleDefinition          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (amount_cents >= 0), UNIQUE (card_id, version)              │
//! │  └── Foreign keys from outcomes to transactions and rulesets           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use perk_core::validation::{validate_identifier, validate_rate};
//!
//! assert!(validate_identifier("card_id", "card-1").is_ok());
//! assert!(validate_rate("base_rate", "0.015".parse().unwrap()).is_ok());
//! assert!(validate_rate("base_rate", "-1".parse().unwrap()).is_err());
//! ```

use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::ValidationError;
use crate::ruleset::EffectiveRange;
use crate::types::{Rate, RewardMetric, Transaction};
use crate::{MAX_IDENTIFIER_LEN, MAX_MCC, MAX_POSTING_YEAR, MAX_RATE};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates an identifier or label (card id, version, ruleset id).
///
/// ## Rules
/// - Must not be empty after trimming
/// - At most [`MAX_IDENTIFIER_LEN`] characters
///
/// ## Returns
/// The trimmed value.
pub fn validate_identifier(field: &str, value: &str) -> ValidationResult<String> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_IDENTIFIER_LEN,
        });
    }

    Ok(value.to_string())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a reward rate.
///
/// ## Rules
/// - Between 0 and [`MAX_RATE`] inclusive
pub fn validate_rate(field: &str, rate: Rate) -> ValidationResult<Rate> {
    if rate.value() < Decimal::ZERO || rate.value() > MAX_RATE {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: "0".to_string(),
            max: MAX_RATE.to_string(),
        });
    }

    Ok(rate)
}

/// Converts a document cap `max` into the metric's smallest unit.
///
/// ## Rules
/// - Non-negative
/// - Points: whole numbers only
/// - Cashback: at most two decimal places (converted to cents)
///
/// ## Example
/// ```rust
/// use perk_core::types::RewardMetric;
/// use perk_core::validation::validate_cap_max;
/// use rust_decimal::Decimal;
///
/// assert_eq!(validate_cap_max(RewardMetric::Cashback, Decimal::new(2550, 2)).unwrap(), 2550);
/// assert_eq!(validate_cap_max(RewardMetric::Points, Decimal::from(10_000)).unwrap(), 10_000);
/// assert!(validate_cap_max(RewardMetric::Points, Decimal::new(15, 1)).is_err());
/// ```
pub fn validate_cap_max(metric: RewardMetric, max: Decimal) -> ValidationResult<i64> {
    let field = format!("caps.{}.max", metric);

    if max < Decimal::ZERO {
        return Err(ValidationError::OutOfRange {
            field,
            min: "0".to_string(),
            max: i64::MAX.to_string(),
        });
    }

    let out_of_range = |field: String| ValidationError::OutOfRange {
        field,
        min: "0".to_string(),
        max: i64::MAX.to_string(),
    };

    let scaled = match metric {
        RewardMetric::Points => max,
        RewardMetric::Cashback => max
            .checked_mul(Decimal::ONE_HUNDRED)
            .ok_or_else(|| out_of_range(field.clone()))?,
    };

    if scaled.fract() != Decimal::ZERO {
        let reason = match metric {
            RewardMetric::Points => "points caps must be whole numbers",
            RewardMetric::Cashback => "cashback caps allow at most two decimal places",
        };
        return Err(ValidationError::InvalidFormat {
            field,
            reason: reason.to_string(),
        });
    }

    scaled.to_i64().ok_or_else(|| out_of_range(field))
}

// =============================================================================
// Date Validators
// =============================================================================

/// Validates an effective range `[from, to)`.
///
/// ## Rules
/// - `to`, when present, must be strictly after `from`
pub fn validate_effective_range(
    from: NaiveDate,
    to: Option<NaiveDate>,
) -> ValidationResult<EffectiveRange> {
    if let Some(to) = to {
        if to <= from {
            return Err(ValidationError::InvalidFormat {
                field: "effective_to".to_string(),
                reason: format!("must be after effective_from ({})", from),
            });
        }
    }

    Ok(EffectiveRange { from, to })
}

// =============================================================================
// Transaction Validator
// =============================================================================

/// Validates a normalized transaction before it is stored.
///
/// ## Rules
/// - `id` and `card_id` are valid identifiers
/// - `amount_cents` is non-negative
/// - `mcc` is within 0..=9999
/// - `posted_on` falls in years 1..=9999
pub fn validate_transaction(tx: &Transaction) -> ValidationResult<()> {
    validate_identifier("id", &tx.id)?;
    validate_identifier("card_id", &tx.card_id)?;

    if tx.amount_cents < 0 {
        return Err(ValidationError::OutOfRange {
            field: "amount_cents".to_string(),
            min: "0".to_string(),
            max: i64::MAX.to_string(),
        });
    }

    if tx.mcc > MAX_MCC {
        return Err(ValidationError::OutOfRange {
            field: "mcc".to_string(),
            min: "0".to_string(),
            max: MAX_MCC.to_string(),
        });
    }

    if !(1..=MAX_POSTING_YEAR).contains(&tx.posted_on.year()) {
        return Err(ValidationError::OutOfRange {
            field: "posted_on".to_string(),
            min: "0001-01-01".to_string(),
            max: format!("{}-12-31", MAX_POSTING_YEAR),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tx() -> Transaction {
        Transaction {
            id: "tx-1".to_string(),
            card_id: "card-1".to_string(),
            posted_on: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            amount_cents: 1_000,
            mcc: 5732,
            description: None,
        }
    }

    #[test]
    fn test_validate_identifier() {
        assert_eq!(validate_identifier("card_id", "  card-1 ").unwrap(), "card-1");
        assert!(validate_identifier("card_id", "   ").is_err());
        assert!(validate_identifier("card_id", &"x".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_rate_bounds() {
        assert!(validate_rate("rate", Rate::zero()).is_ok());
        assert!(validate_rate("rate", Rate::new(MAX_RATE)).is_ok());
        assert!(validate_rate("rate", Rate::new(MAX_RATE + Decimal::ONE)).is_err());
        assert!(validate_rate("rate", "-0.01".parse().unwrap()).is_err());
    }

    #[test]
    fn test_validate_cap_max_units() {
        assert_eq!(
            validate_cap_max(RewardMetric::Cashback, Decimal::new(25, 0)).unwrap(),
            2_500
        );
        assert!(validate_cap_max(RewardMetric::Cashback, Decimal::new(2_5001, 3)).is_err());
        assert!(validate_cap_max(RewardMetric::Points, Decimal::new(-1, 0)).is_err());
        assert_eq!(validate_cap_max(RewardMetric::Points, Decimal::ZERO).unwrap(), 0);
    }

    #[test]
    fn test_validate_cap_max_rejects_overflow() {
        let err = validate_cap_max(RewardMetric::Cashback, Decimal::MAX).unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { ref field, .. } if field == "caps.cashback.max"));

        // Scales without overflow but does not fit in i64 cents.
        assert!(validate_cap_max(RewardMetric::Cashback, Decimal::from(i64::MAX)).is_err());
        assert!(validate_cap_max(RewardMetric::Points, Decimal::MAX).is_err());
    }

    #[test]
    fn test_validate_effective_range() {
        let from = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(validate_effective_range(from, None).is_ok());
        assert!(validate_effective_range(from, Some(from)).is_err());
        assert!(validate_effective_range(from, from.succ_opt()).is_ok());
    }

    #[test]
    fn test_validate_transaction() {
        assert!(validate_transaction(&tx()).is_ok());

        let mut negative = tx();
        negative.amount_cents = -1;
        assert!(validate_transaction(&negative).is_err());

        let mut bad_mcc = tx();
        bad_mcc.mcc = 10_000;
        assert!(validate_transaction(&bad_mcc).is_err());

        let mut far_future = tx();
        far_future.posted_on = NaiveDate::from_ymd_opt(10_000, 3, 1).unwrap();
        assert!(matches!(
            validate_transaction(&far_future),
            Err(ValidationError::OutOfRange { ref field, .. }) if field == "posted_on"
        ));

        let mut last_year = tx();
        last_year.posted_on = NaiveDate::from_ymd_opt(MAX_POSTING_YEAR, 12, 31).unwrap();
        assert!(validate_transaction(&last_year).is_ok());
    }
}
