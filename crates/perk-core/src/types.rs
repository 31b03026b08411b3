//! # Domain Types
//!
//! Core domain types used throughout Perk.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  Transaction    │   │   CapBalance    │   │   PeriodKey     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id             │   │  card_id        │   │  "2024-03"      │       │
//! │  │  card_id        │   │  ruleset_id     │   │  (CapPeriod +   │       │
//! │  │  posted_on      │   │  period         │   │   posting date) │       │
//! │  │  amount_cents   │   │  points         │   └─────────────────┘       │
//! │  │  mcc            │   │  cashback_cents │                             │
//! │  └─────────────────┘   └─────────────────┘                             │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │      Rate       │   │  RewardMetric   │   │ EvaluationStatus│       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  exact decimal  │   │  Points         │   │  Rewarded       │       │
//! │  │  0.04 = 4%      │   │  Cashback       │   │  Unmatched...   │       │
//! │  │  3    = 3x      │   └─────────────────┘   │  InvalidRule... │       │
//! │  └─────────────────┘                         │  Ambiguous...   │       │
//! │                                              └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rulesets and their rules live in [`crate::ruleset`]; computed outcomes
//! and their traces live in [`crate::outcome`].

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::money::Money;

// =============================================================================
// Rate
// =============================================================================

/// A reward rate as an exact decimal.
///
/// For cashback rulesets this is a fraction of spend (`0.04` = 4%). For
/// points rulesets it is points per major currency unit (`3` = 3x).
///
/// ## Why Decimal?
/// `0.04` has no exact binary representation. Parsing rates into `f64`
/// would make two evaluations of the same document able to disagree after
/// rounding, which breaks reprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rate(Decimal);

impl Rate {
    /// Wraps a decimal rate. Range checks happen in [`crate::validation`].
    #[inline]
    pub const fn new(value: Decimal) -> Self {
        Rate(value)
    }

    /// Returns the underlying decimal.
    #[inline]
    pub const fn value(&self) -> Decimal {
        self.0
    }

    /// Zero rate.
    #[inline]
    pub const fn zero() -> Self {
        Rate(Decimal::ZERO)
    }
}

impl FromStr for Rate {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim()).map(Rate)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

// =============================================================================
// Reward Metric
// =============================================================================

/// The two quantities a card can accrue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum RewardMetric {
    /// Whole loyalty points.
    Points,
    /// Cashback, tracked in cents.
    Cashback,
}

impl RewardMetric {
    /// Both metrics, in the order the computer reserves them.
    pub const ALL: [RewardMetric; 2] = [RewardMetric::Points, RewardMetric::Cashback];

    /// Stable string form used in storage and traces.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RewardMetric::Points => "points",
            RewardMetric::Cashback => "cashback",
        }
    }

    /// Formats an amount of this metric for display.
    pub fn format_amount(&self, amount: i64) -> String {
        match self {
            RewardMetric::Points => format!("{} pts", amount),
            RewardMetric::Cashback => Money::from_cents(amount).to_string(),
        }
    }
}

impl Default for RewardMetric {
    fn default() -> Self {
        RewardMetric::Points
    }
}

impl fmt::Display for RewardMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Cap Period
// =============================================================================

/// Accounting period granularity for a cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapPeriod {
    /// Calendar month of the posting date.
    CalendarMonth,
}

impl CapPeriod {
    /// Stable string form used in traces.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CapPeriod::CalendarMonth => "calendar_month",
        }
    }
}

impl fmt::Display for CapPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Period Key
// =============================================================================

/// Identifies one accounting period, e.g. `2024-03` for March 2024.
///
/// ## Example
/// ```rust
/// use chrono::NaiveDate;
/// use perk_core::types::{CapPeriod, PeriodKey};
///
/// let date = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
/// assert_eq!(PeriodKey::for_date(CapPeriod::CalendarMonth, date).as_str(), "2024-03");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodKey(String);

impl PeriodKey {
    /// Computes the period key containing `date`.
    pub fn for_date(period: CapPeriod, date: NaiveDate) -> Self {
        match period {
            CapPeriod::CalendarMonth => PeriodKey(format!("{:04}-{:02}", date.year(), date.month())),
        }
    }

    /// Returns the key as stored.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PeriodKey {
    type Err = ValidationError;

    /// Parses a `YYYY-MM` key.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidFormat {
            field: "period".to_string(),
            reason: "expected YYYY-MM".to_string(),
        };

        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;

        Ok(PeriodKey::for_date(CapPeriod::CalendarMonth, first))
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A normalized purchase transaction, produced by statement ingestion.
///
/// Read-only to the engine and immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique identifier.
    pub id: String,

    /// Owning card.
    pub card_id: String,

    /// Posting date (drives ruleset selection and the cap period).
    pub posted_on: NaiveDate,

    /// Purchase amount in cents. Non-negative.
    pub amount_cents: i64,

    /// Merchant category code (0..=9999).
    pub mcc: u16,

    /// Optional statement text.
    #[serde(default)]
    pub description: Option<String>,
}

impl Transaction {
    /// Returns the amount as a Money type.
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

// =============================================================================
// Cap Balance
// =============================================================================

/// Identifies the scope a cap balance is accrued in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapKey {
    pub card_id: String,
    pub ruleset_id: String,
    pub period: PeriodKey,
}

impl CapKey {
    pub fn new(card_id: impl Into<String>, ruleset_id: impl Into<String>, period: PeriodKey) -> Self {
        CapKey {
            card_id: card_id.into(),
            ruleset_id: ruleset_id.into(),
            period,
        }
    }
}

impl fmt::Display for CapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.card_id, self.ruleset_id, self.period)
    }
}

/// Amounts already granted within one [`CapKey`] scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapBalance {
    /// Points granted so far.
    pub points: i64,
    /// Cashback granted so far, in cents.
    pub cashback_cents: i64,
}

impl CapBalance {
    /// A balance with nothing granted yet (lazily created periods start here).
    pub const fn empty() -> Self {
        CapBalance {
            points: 0,
            cashback_cents: 0,
        }
    }

    /// Returns the accrued amount for one metric.
    pub const fn get(&self, metric: RewardMetric) -> i64 {
        match metric {
            RewardMetric::Points => self.points,
            RewardMetric::Cashback => self.cashback_cents,
        }
    }
}

// =============================================================================
// Ruleset Status
// =============================================================================

/// Lifecycle of a stored ruleset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum RulesetStatus {
    /// Participates in catalog resolution.
    Active,
    /// Replaced by a corrected version; kept for audit.
    Superseded,
}

// =============================================================================
// Evaluation Status
// =============================================================================

/// Terminal status of one `EvaluateTransaction` call, reported to the
/// job scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "kebab-case"))]
#[serde(rename_all = "kebab-case")]
pub enum EvaluationStatus {
    /// An outcome is recorded.
    Rewarded,
    /// No active ruleset covers the posting date; pending rule coverage.
    UnmatchedRuleset,
    /// The selected ruleset's stored data does not validate.
    InvalidRuleData,
    /// More than one active ruleset covers the posting date.
    AmbiguousRuleset,
}

impl EvaluationStatus {
    /// Stable string form used in storage and job bookkeeping.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EvaluationStatus::Rewarded => "rewarded",
            EvaluationStatus::UnmatchedRuleset => "unmatched-ruleset",
            EvaluationStatus::InvalidRuleData => "invalid-rule-data",
            EvaluationStatus::AmbiguousRuleset => "ambiguous-ruleset",
        }
    }
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_parses_exactly() {
        let rate: Rate = "0.04".parse().unwrap();
        assert_eq!(rate.value(), Decimal::new(4, 2));
        assert_eq!(rate.to_string(), "0.04");
        assert!("four percent".parse::<Rate>().is_err());
    }

    #[test]
    fn test_rate_deserializes_from_number_and_string() {
        let from_number: Rate = serde_json::from_str("0.04").unwrap();
        let from_string: Rate = serde_json::from_str("\"0.04\"").unwrap();
        assert_eq!(from_number, from_string);
    }

    #[test]
    fn test_period_key_for_date() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(
            PeriodKey::for_date(CapPeriod::CalendarMonth, date).as_str(),
            "2024-01"
        );
    }

    #[test]
    fn test_period_key_parse() {
        let key: PeriodKey = "2024-03".parse().unwrap();
        assert_eq!(key.as_str(), "2024-03");

        assert!("2024-13".parse::<PeriodKey>().is_err());
        assert!("2024-3".parse::<PeriodKey>().is_err());
        assert!("march".parse::<PeriodKey>().is_err());
    }

    #[test]
    fn test_cap_balance_get() {
        let balance = CapBalance {
            points: 9_900,
            cashback_cents: 250,
        };
        assert_eq!(balance.get(RewardMetric::Points), 9_900);
        assert_eq!(balance.get(RewardMetric::Cashback), 250);
        assert_eq!(CapBalance::empty().get(RewardMetric::Points), 0);
    }

    #[test]
    fn test_evaluation_status_serialization() {
        let json = serde_json::to_string(&EvaluationStatus::UnmatchedRuleset).unwrap();
        assert_eq!(json, "\"unmatched-ruleset\"");
        assert_eq!(EvaluationStatus::InvalidRuleData.as_str(), "invalid-rule-data");
    }

    #[test]
    fn test_metric_format_amount() {
        assert_eq!(RewardMetric::Points.format_amount(100), "100 pts");
        assert_eq!(RewardMetric::Cashback.format_amount(494), "$4.94");
    }

    #[test]
    fn test_transaction_deserializes_without_description() {
        let json = r#"{"id":"tx-1","card_id":"card-1","posted_on":"2024-03-01","amount_cents":1250,"mcc":5732}"#;
        let tx: Transaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.amount().cents(), 1250);
        assert_eq!(tx.description, None);
    }
}
