//! # Rulesets
//!
//! The inbound ruleset document and its validated, immutable form.
//!
//! ## Document → Ruleset
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   JSON document ──► RulesetDocument ──► validate ──► Ruleset            │
//! │   (admin input)     (serde, strict:     (rules,      (sorted rules,     │
//! │                      unknown fields      caps,        typed matchers,   │
//! │                      rejected)           ranges)      caps in units)    │
//! │                                                                         │
//! │   The same path runs at activation AND every time a stored ruleset     │
//! │   is loaded, so bad data is caught once and never silently coerced.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Document
//! ```json
//! {
//!   "card_id": "card-1",
//!   "version": "2024-03",
//!   "reward_type": "cashback",
//!   "base_rate": 0.01,
//!   "multipliers": [
//!     { "category": "electronics", "include_mccs": [5732], "rate": 0.04 },
//!     { "category": "everything but utilities", "exclude_mccs": [4900], "rate": 0.03 }
//!   ],
//!   "caps": [ { "period": "calendar_month", "metric": "cashback", "max": 25.00 } ],
//!   "effective_from": "2024-03-01",
//!   "effective_to": null
//! }
//! ```

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::{CapPeriod, Rate, RewardMetric};
use crate::validation::{
    validate_cap_max, validate_effective_range, validate_identifier, validate_rate,
};
use crate::{MAX_MCC, MAX_RULES};

// =============================================================================
// Inbound Document
// =============================================================================

/// A ruleset definition as supplied by an administrator.
///
/// Every field except `reward_type`, `effective_to` and `supersedes` is
/// required; unknown fields are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesetDocument {
    pub card_id: String,
    pub version: String,

    /// Metric this ruleset earns. Defaults to points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward_type: Option<RewardMetric>,

    pub base_rate: Rate,
    pub multipliers: Vec<MultiplierDocument>,
    pub caps: Vec<CapDocument>,
    pub effective_from: NaiveDate,

    /// Exclusive end date; omitted or null means still active.
    #[serde(default)]
    pub effective_to: Option<NaiveDate>,

    /// Id of the active ruleset this version corrects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
}

impl RulesetDocument {
    /// Parses a JSON document. Missing or malformed fields are
    /// [`CoreError::InvalidDocument`].
    pub fn from_json(json: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Normalized JSON, as stored.
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// One multiplier rule as written in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultiplierDocument {
    pub category: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_mccs: Option<Vec<u32>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_mccs: Option<Vec<u32>>,

    pub rate: Rate,

    /// Lower runs first. Defaults to the rule's position in the list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
}

/// One cap as written in the document. `max` is in points or in major
/// currency units for cashback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CapDocument {
    pub period: CapPeriod,
    pub metric: RewardMetric,
    pub max: Decimal,
}

// =============================================================================
// MCC Matching
// =============================================================================

/// How a multiplier rule matches a merchant category code.
///
/// A closed set of predicate kinds: a rule is exactly one of these, so a
/// rule carrying both or neither code set cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MccMatch {
    /// Matches when the code is in the set.
    Include(BTreeSet<u16>),
    /// Matches when the code is NOT in the set.
    Exclude(BTreeSet<u16>),
}

impl MccMatch {
    /// Returns true if `mcc` satisfies the predicate.
    pub fn matches(&self, mcc: u16) -> bool {
        match self {
            MccMatch::Include(codes) => codes.contains(&mcc),
            MccMatch::Exclude(codes) => !codes.contains(&mcc),
        }
    }

    /// Explains the match (or non-match) of `mcc` in trace wording,
    /// e.g. `MCC 5732 in {5732}`.
    pub fn explain(&self, mcc: u16) -> String {
        let (codes, hit) = match self {
            MccMatch::Include(codes) => (codes, codes.contains(&mcc)),
            MccMatch::Exclude(codes) => (codes, codes.contains(&mcc)),
        };
        let set = codes
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let relation = if hit { "in" } else { "not in" };
        format!("MCC {} {} {{{}}}", mcc, relation, set)
    }
}

// =============================================================================
// Validated Rules and Caps
// =============================================================================

/// A validated multiplier rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiplierRule {
    pub category: String,
    pub matcher: MccMatch,
    pub rate: Rate,

    /// Explicit priority, if the document gave one.
    pub priority: Option<u32>,

    /// Position in the document's `multipliers` list.
    pub declared_at: usize,
}

impl MultiplierRule {
    /// Sort key: explicit priority, else declaration index.
    pub fn effective_priority(&self) -> u64 {
        self.priority
            .map(u64::from)
            .unwrap_or(self.declared_at as u64)
    }

    fn from_document(index: usize, doc: &MultiplierDocument) -> CoreResult<Self> {
        let invalid = |reason: String| CoreError::InvalidRuleDefinition {
            rule_index: index,
            category: doc.category.clone(),
            reason,
        };

        let category = doc.category.trim();
        if category.is_empty() {
            return Err(invalid("category is required".to_string()));
        }

        let codes = |list: &[u32]| -> CoreResult<BTreeSet<u16>> {
            if list.is_empty() {
                return Err(invalid("merchant category code set is empty".to_string()));
            }
            list.iter()
                .map(|&code| {
                    u16::try_from(code)
                        .ok()
                        .filter(|c| *c <= MAX_MCC)
                        .ok_or_else(|| {
                            invalid(format!(
                                "merchant category code {} is outside 0..={}",
                                code, MAX_MCC
                            ))
                        })
                })
                .collect()
        };

        let matcher = match (&doc.include_mccs, &doc.exclude_mccs) {
            (Some(include), None) => MccMatch::Include(codes(include)?),
            (None, Some(exclude)) => MccMatch::Exclude(codes(exclude)?),
            (Some(_), Some(_)) => {
                return Err(invalid(
                    "both include_mccs and exclude_mccs are set".to_string(),
                ))
            }
            (None, None) => {
                return Err(invalid(
                    "neither include_mccs nor exclude_mccs is set".to_string(),
                ))
            }
        };

        let rate = validate_rate("rate", doc.rate).map_err(|e| invalid(e.to_string()))?;

        Ok(MultiplierRule {
            category: category.to_string(),
            matcher,
            rate,
            priority: doc.priority,
            declared_at: index,
        })
    }
}

/// A validated cap. `max` is in the metric's smallest unit (points or cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapDefinition {
    pub period: CapPeriod,
    pub metric: RewardMetric,
    pub max: i64,
}

// =============================================================================
// Effective Range
// =============================================================================

/// Half-open date range `[from, to)`; `to = None` is open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveRange {
    pub from: NaiveDate,
    pub to: Option<NaiveDate>,
}

impl EffectiveRange {
    /// True if `date` falls inside the range. `to` itself is outside.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && self.to.map_or(true, |to| date < to)
    }

    /// True if the two ranges share at least one day.
    pub fn overlaps(&self, other: &EffectiveRange) -> bool {
        let starts_before_other_ends = other.to.map_or(true, |to| self.from < to);
        let other_starts_before_self_ends = self.to.map_or(true, |to| other.from < to);
        starts_before_other_ends && other_starts_before_self_ends
    }
}

impl fmt::Display for EffectiveRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to {
            Some(to) => write!(f, "[{}, {})", self.from, to),
            None => write!(f, "[{}, ∞)", self.from),
        }
    }
}

// =============================================================================
// Ruleset
// =============================================================================

/// The catalog's view of a ruleset: enough to select one by date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesetHeader {
    pub id: String,
    pub card_id: String,
    pub version: String,
    pub effective: EffectiveRange,
}

/// A validated, immutable ruleset.
///
/// `rules` are already in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ruleset {
    pub id: String,
    pub card_id: String,
    pub version: String,
    pub reward_type: RewardMetric,
    pub base_rate: Rate,
    pub rules: Vec<MultiplierRule>,
    pub caps: Vec<CapDefinition>,
    pub effective: EffectiveRange,
    pub supersedes: Option<String>,
}

impl Ruleset {
    /// Validates a document and binds it to a ruleset id.
    ///
    /// ## Errors
    /// - [`CoreError::InvalidRuleDefinition`] for a malformed multiplier rule
    /// - [`CoreError::Validation`] for bad top-level fields or caps
    pub fn from_document(id: impl Into<String>, doc: &RulesetDocument) -> CoreResult<Self> {
        let card_id = validate_identifier("card_id", &doc.card_id)?;
        let version = validate_identifier("version", &doc.version)?;
        let base_rate = validate_rate("base_rate", doc.base_rate)?;
        let effective = validate_effective_range(doc.effective_from, doc.effective_to)?;

        if doc.multipliers.len() > MAX_RULES {
            return Err(ValidationError::OutOfRange {
                field: "multipliers".to_string(),
                min: "0".to_string(),
                max: MAX_RULES.to_string(),
            }
            .into());
        }

        let mut rules = doc
            .multipliers
            .iter()
            .enumerate()
            .map(|(index, rule)| MultiplierRule::from_document(index, rule))
            .collect::<CoreResult<Vec<_>>>()?;
        // Stable: equal priorities keep declaration order.
        rules.sort_by_key(MultiplierRule::effective_priority);

        let mut caps: Vec<CapDefinition> = Vec::with_capacity(doc.caps.len());
        for cap in &doc.caps {
            if caps
                .iter()
                .any(|c| c.period == cap.period && c.metric == cap.metric)
            {
                return Err(ValidationError::Duplicate {
                    field: "caps".to_string(),
                    value: format!("{}/{}", cap.period, cap.metric),
                }
                .into());
            }
            caps.push(CapDefinition {
                period: cap.period,
                metric: cap.metric,
                max: validate_cap_max(cap.metric, cap.max)?,
            });
        }

        let supersedes = match &doc.supersedes {
            Some(id) => Some(validate_identifier("supersedes", id)?),
            None => None,
        };

        Ok(Ruleset {
            id: id.into(),
            card_id,
            version,
            reward_type: doc.reward_type.unwrap_or_default(),
            base_rate,
            rules,
            caps,
            effective,
            supersedes,
        })
    }

    /// Parses and validates a JSON document in one step.
    pub fn from_json(id: impl Into<String>, json: &str) -> CoreResult<Self> {
        Self::from_document(id, &RulesetDocument::from_json(json)?)
    }

    pub fn header(&self) -> RulesetHeader {
        RulesetHeader {
            id: self.id.clone(),
            card_id: self.card_id.clone(),
            version: self.version.clone(),
            effective: self.effective,
        }
    }

    /// The cap on `metric`, if one is configured.
    ///
    /// Only calendar-month caps exist today, so at most one cap per metric.
    pub fn cap(&self, metric: RewardMetric) -> Option<&CapDefinition> {
        self.caps.iter().find(|c| c.metric == metric)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
