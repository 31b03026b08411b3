//! # Reward Outcomes and Justification Traces
//!
//! A [`RewardOutcome`] is what the engine owes for one transaction under one
//! ruleset. It carries a [`JustificationTrace`]: the ordered reasoning steps
//! that produced the amounts, complete enough that nobody ever needs to
//! re-read the ruleset to explain a reward.
//!
//! ## Trace Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. ruleset_selected   ruleset 7f3c… (v2024-03) for card-1             │
//! │  2. rule_matched       rule #0 "electronics": MCC 5732 in {5732} @ 4%  │
//! │     (or base_rate_applied when no rule matched)                        │
//! │  3. raw_reward         $123.45 × 0.04 = $4.94 cashback                 │
//! │  4. cap_checked        per metric: limit, prior, requested, granted    │
//! │     (or cap_not_configured)                                            │
//! │  5. cap_truncated      only when the cap cut the reward                │
//! │  6. reward_granted     final points / cashback                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each step serializes as `{"step": "<name>", ...fields}` so the audit log
//! stays machine-readable, and [`TraceStep::describe`] renders the sentence
//! shown to the cardholder.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::types::{CapKey, PeriodKey, Rate, RewardMetric};

// =============================================================================
// Trace Steps
// =============================================================================

/// One reasoning step in a justification trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum TraceStep {
    /// The catalog picked this ruleset for the posting date.
    RulesetSelected {
        ruleset_id: String,
        version: String,
        card_id: String,
        effective_from: NaiveDate,
        effective_to: Option<NaiveDate>,
    },

    /// A multiplier rule matched the merchant category code.
    RuleMatched {
        rule_index: usize,
        category: String,
        predicate: String,
        rate: Rate,
    },

    /// No multiplier rule matched; the ruleset's base rate applies.
    BaseRateApplied { mcc: u16, rules_checked: usize, rate: Rate },

    /// Reward before any cap.
    RawReward {
        metric: RewardMetric,
        spend_cents: i64,
        rate: Rate,
        amount: i64,
    },

    /// The ruleset configures no cap for this metric; the full amount is granted.
    CapNotConfigured { metric: RewardMetric, granted: i64 },

    /// A cap was consulted.
    CapChecked {
        metric: RewardMetric,
        period: PeriodKey,
        limit: i64,
        prior: i64,
        requested: i64,
        granted: i64,
    },

    /// The cap cut the reward short.
    CapTruncated {
        metric: RewardMetric,
        period: PeriodKey,
        truncated: i64,
    },

    /// Final amounts.
    RewardGranted { points: i64, cashback_cents: i64 },
}

impl TraceStep {
    /// Renders the step as a sentence for the cardholder-facing breakdown.
    pub fn describe(&self) -> String {
        match self {
            TraceStep::RulesetSelected {
                ruleset_id,
                version,
                card_id,
                effective_from,
                effective_to,
            } => {
                let until = match effective_to {
                    Some(to) => format!("until {}", to),
                    None => "with no end date".to_string(),
                };
                format!(
                    "Selected ruleset {} (version {}) for card {}, effective from {} {}",
                    ruleset_id, version, card_id, effective_from, until
                )
            }
            TraceStep::RuleMatched {
                rule_index,
                category,
                predicate,
                rate,
            } => format!(
                "Rule #{} \"{}\" matched ({}), rate {}",
                rule_index, category, predicate, rate
            ),
            TraceStep::BaseRateApplied {
                mcc,
                rules_checked,
                rate,
            } => format!(
                "MCC {} matched none of {} multiplier rule(s); base rate {} applies",
                mcc, rules_checked, rate
            ),
            TraceStep::RawReward {
                metric,
                spend_cents,
                rate,
                amount,
            } => format!(
                "{} × {} = {} {} before caps",
                Money::from_cents(*spend_cents),
                rate,
                metric.format_amount(*amount),
                metric
            ),
            TraceStep::CapNotConfigured { metric, granted } => format!(
                "No {} cap configured; granted {}",
                metric,
                metric.format_amount(*granted)
            ),
            TraceStep::CapChecked {
                metric,
                period,
                limit,
                prior,
                requested,
                granted,
            } => format!(
                "{} cap for {}: limit {}, already granted {}, requested {}, granted {}",
                metric,
                period,
                metric.format_amount(*limit),
                metric.format_amount(*prior),
                metric.format_amount(*requested),
                metric.format_amount(*granted)
            ),
            TraceStep::CapTruncated {
                metric,
                period,
                truncated,
            } => format!(
                "{} truncated by the {} cap for {}",
                metric.format_amount(*truncated),
                metric,
                period
            ),
            TraceStep::RewardGranted {
                points,
                cashback_cents,
            } => format!(
                "Granted {} and {} cashback",
                RewardMetric::Points.format_amount(*points),
                Money::from_cents(*cashback_cents)
            ),
        }
    }
}

// =============================================================================
// Justification Trace
// =============================================================================

/// Ordered list of [`TraceStep`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JustificationTrace(Vec<TraceStep>);

impl JustificationTrace {
    pub fn new() -> Self {
        JustificationTrace(Vec::new())
    }

    pub fn push(&mut self, step: TraceStep) {
        self.0.push(step);
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.0
    }

    /// Human-readable lines, one per step.
    pub fn describe(&self) -> Vec<String> {
        self.0.iter().map(TraceStep::describe).collect()
    }

    /// Total amount truncated by caps for `metric`.
    pub fn truncated(&self, metric: RewardMetric) -> i64 {
        self.0
            .iter()
            .filter_map(|step| match step {
                TraceStep::CapTruncated {
                    metric: m,
                    truncated,
                    ..
                } if *m == metric => Some(*truncated),
                _ => None,
            })
            .sum()
    }
}

// =============================================================================
// Reward Outcome
// =============================================================================

/// The reward owed for one transaction under one ruleset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardOutcome {
    pub transaction_id: String,
    pub ruleset_id: String,
    pub ruleset_version: String,
    pub card_id: String,

    /// Cap period the grant was accrued in.
    pub period: PeriodKey,

    /// Granted points (non-negative).
    pub points: i64,

    /// Granted cashback in cents (non-negative).
    pub cashback_cents: i64,

    pub trace: JustificationTrace,

    /// Supplied by the caller, never read from a clock inside the computer.
    pub computed_at: DateTime<Utc>,
}

impl RewardOutcome {
    /// Granted amount for one metric.
    pub const fn granted(&self, metric: RewardMetric) -> i64 {
        match metric {
            RewardMetric::Points => self.points,
            RewardMetric::Cashback => self.cashback_cents,
        }
    }

    /// The cap scope this outcome reserved against.
    pub fn cap_key(&self) -> CapKey {
        CapKey::new(&*self.card_id, &*self.ruleset_id, self.period.clone())
    }

    /// Granted cashback as Money.
    pub fn cashback(&self) -> Money {
        Money::from_cents(self.cashback_cents)
    }

    /// True when both outcomes grant the same amounts for the same reasons,
    /// ignoring when they were computed.
    pub fn same_reward(&self, other: &RewardOutcome) -> bool {
        self.transaction_id == other.transaction_id
            && self.ruleset_id == other.ruleset_id
            && self.period == other.period
            && self.points == other.points
            && self.cashback_cents == other.cashback_cents
            && self.trace == other.trace
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CapPeriod;

    fn period() -> PeriodKey {
        PeriodKey::for_date(
            CapPeriod::CalendarMonth,
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
        )
    }

    #[test]
    fn test_trace_step_is_tagged() {
        let step = TraceStep::CapTruncated {
            metric: RewardMetric::Points,
            period: period(),
            truncated: 400,
        };
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["step"], "cap_truncated");
        assert_eq!(json["truncated"], 400);
        assert_eq!(json["period"], "2024-03");
    }

    #[test]
    fn test_trace_round_trips_through_storage_json() {
        let mut trace = JustificationTrace::new();
        trace.push(TraceStep::RuleMatched {
            rule_index: 0,
            category: "electronics".to_string(),
            predicate: "MCC 5732 in {5732}".to_string(),
            rate: "0.04".parse().unwrap(),
        });
        trace.push(TraceStep::RewardGranted {
            points: 0,
            cashback_cents: 494,
        });

        let stored = serde_json::to_string(&trace).unwrap();
        let loaded: JustificationTrace = serde_json::from_str(&stored).unwrap();
        assert_eq!(loaded, trace);
    }

    #[test]
    fn test_describe_truncation() {
        let step = TraceStep::CapTruncated {
            metric: RewardMetric::Points,
            period: period(),
            truncated: 400,
        };
        assert_eq!(
            step.describe(),
            "400 pts truncated by the points cap for 2024-03"
        );
    }

    #[test]
    fn test_truncated_sums_per_metric() {
        let mut trace = JustificationTrace::new();
        trace.push(TraceStep::CapTruncated {
            metric: RewardMetric::Points,
            period: period(),
            truncated: 400,
        });
        assert_eq!(trace.truncated(RewardMetric::Points), 400);
        assert_eq!(trace.truncated(RewardMetric::Cashback), 0);
    }
}
