//! # Rule Resolver
//!
//! Picks the rate for a transaction within a ruleset: the **first** rule (in
//! priority order) whose predicate matches the merchant category code,
//! otherwise the base rate. Rates never stack or compete; the first match
//! wins even when a later rule would also match at a higher rate.
//!
//! Rule shape errors are caught when the ruleset is built
//! ([`crate::ruleset::Ruleset::from_document`]), so resolution itself
//! cannot fail.

use serde::{Deserialize, Serialize};

use crate::outcome::TraceStep;
use crate::ruleset::Ruleset;
use crate::types::{Rate, Transaction};

/// Where a resolved rate came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateSource {
    /// A multiplier rule matched.
    Rule {
        /// Declaration index in the ruleset document.
        rule_index: usize,
        category: String,
        /// e.g. `MCC 5732 in {5732}`.
        predicate: String,
    },
    /// No rule matched.
    BaseRate { rules_checked: usize },
}

/// A rate plus the reason it was chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRate {
    pub rate: Rate,
    pub source: RateSource,
}

impl ResolvedRate {
    /// The trace step explaining this resolution.
    pub fn trace_step(&self, mcc: u16) -> TraceStep {
        match &self.source {
            RateSource::Rule {
                rule_index,
                category,
                predicate,
            } => TraceStep::RuleMatched {
                rule_index: *rule_index,
                category: category.clone(),
                predicate: predicate.clone(),
                rate: self.rate,
            },
            RateSource::BaseRate { rules_checked } => TraceStep::BaseRateApplied {
                mcc,
                rules_checked: *rules_checked,
                rate: self.rate,
            },
        }
    }
}

/// First-match rule resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleResolver;

impl RuleResolver {
    pub fn new() -> Self {
        RuleResolver
    }

    /// Resolves the rate for `tx` under `ruleset`.
    pub fn resolve(&self, ruleset: &Ruleset, tx: &Transaction) -> ResolvedRate {
        ruleset
            .rules
            .iter()
            .find(|rule| rule.matcher.matches(tx.mcc))
            .map(|rule| ResolvedRate {
                rate: rule.rate,
                source: RateSource::Rule {
                    rule_index: rule.declared_at,
                    category: rule.category.clone(),
                    predicate: rule.matcher.explain(tx.mcc),
                },
            })
            .unwrap_or_else(|| ResolvedRate {
                rate: ruleset.base_rate,
                source: RateSource::BaseRate {
                    rules_checked: ruleset.rules.len(),
                },
            })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ruleset() -> Ruleset {
        Ruleset::from_json(
            "rs-1",
            r#"{
                "card_id": "card-1",
                "version": "v1",
                "reward_type": "cashback",
                "base_rate": 0.01,
                "multipliers": [
                    { "category": "A", "include_mccs": [5732], "rate": 0.04 },
                    { "category": "B", "exclude_mccs": [4900], "rate": 0.03 }
                ],
                "caps": [],
                "effective_from": "2024-01-01"
            }"#,
        )
        .unwrap()
    }

    fn tx(mcc: u16) -> Transaction {
        Transaction {
            id: "tx-1".to_string(),
            card_id: "card-1".to_string(),
            posted_on: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            amount_cents: 10_000,
            mcc,
            description: None,
        }
    }

    #[test]
    fn test_first_match_wins() {
        // 5732 also satisfies B's exclusion, but A is first.
        let resolved = RuleResolver::new().resolve(&ruleset(), &tx(5732));
        assert_eq!(resolved.rate, "0.04".parse().unwrap());
        assert!(matches!(
            resolved.source,
            RateSource::Rule { rule_index: 0, .. }
        ));
    }

    #[test]
    fn test_exclusion_rule_matches_other_codes() {
        let resolved = RuleResolver::new().resolve(&ruleset(), &tx(5411));
        assert_eq!(resolved.rate, "0.03".parse().unwrap());
        match resolved.source {
            RateSource::Rule { predicate, .. } => assert_eq!(predicate, "MCC 5411 not in {4900}"),
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn test_no_match_falls_back_to_base_rate() {
        let resolved = RuleResolver::new().resolve(&ruleset(), &tx(4900));
        assert_eq!(resolved.rate, "0.01".parse().unwrap());
        assert_eq!(resolved.source, RateSource::BaseRate { rules_checked: 2 });
        assert!(matches!(
            resolved.trace_step(4900),
            TraceStep::BaseRateApplied { mcc: 4900, .. }
        ));
    }

    #[test]
    fn test_priority_overrides_declaration_order() {
        let ruleset = Ruleset::from_json(
            "rs-2",
            r#"{
                "card_id": "card-1",
                "version": "v2",
                "reward_type": "cashback",
                "base_rate": 0.01,
                "multipliers": [
                    { "category": "A", "include_mccs": [5732], "rate": 0.04, "priority": 2 },
                    { "category": "B", "exclude_mccs": [4900], "rate": 0.03, "priority": 1 }
                ],
                "caps": [],
                "effective_from": "2024-01-01"
            }"#,
        )
        .unwrap();

        let resolved = RuleResolver::new().resolve(&ruleset, &tx(5732));
        assert_eq!(resolved.rate, "0.03".parse().unwrap());
        // The reported index is still the declaration position.
        assert!(matches!(
            resolved.source,
            RateSource::Rule { rule_index: 1, ref category, .. } if category == "B"
        ));
    }
}
