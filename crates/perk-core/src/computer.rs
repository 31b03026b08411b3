//! # Reward Computer
//!
//! Turns (transaction, ruleset, prior cap balance) into a [`RewardOutcome`].
//!
//! ## Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Transaction ──► RuleResolver ──► raw = spend × rate (half-up)         │
//! │                                          │                              │
//! │                                          ▼                              │
//! │                        points cap ──► cashback cap (independent)       │
//! │                                          │                              │
//! │                                          ▼                              │
//! │                        RewardOutcome { points, cashback, trace }       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `evaluate` is a pure function: the prior balance and the timestamp are
//! inputs, so the same inputs always produce the same outcome. Making the
//! balance current (and the reservation atomic) is the caller's job; see
//! `perk_db::RewardRecorder::settle`.

use chrono::{DateTime, Utc};

use crate::cap;
use crate::error::{CoreError, CoreResult};
use crate::money::Points;
use crate::outcome::{JustificationTrace, RewardOutcome, TraceStep};
use crate::resolver::{ResolvedRate, RuleResolver};
use crate::ruleset::Ruleset;
use crate::types::{CapBalance, CapPeriod, PeriodKey, RewardMetric, Transaction};

/// Computes rewards and their justification traces.
#[derive(Debug, Clone, Copy, Default)]
pub struct RewardComputer {
    resolver: RuleResolver,
}

impl RewardComputer {
    pub fn new() -> Self {
        RewardComputer {
            resolver: RuleResolver::new(),
        }
    }

    /// The period key `tx` accrues in under `ruleset`.
    ///
    /// Every cap today is a calendar-month cap, so this is the posting month.
    pub fn period_for(&self, ruleset: &Ruleset, tx: &Transaction) -> PeriodKey {
        let period = ruleset
            .caps
            .first()
            .map(|c| c.period)
            .unwrap_or(CapPeriod::CalendarMonth);
        PeriodKey::for_date(period, tx.posted_on)
    }

    /// Raw (uncapped) amount of the ruleset's reward metric.
    pub fn raw_amount(&self, ruleset: &Ruleset, tx: &Transaction, resolved: &ResolvedRate) -> i64 {
        match ruleset.reward_type {
            RewardMetric::Points => Points::earned(tx.amount(), resolved.rate).value(),
            RewardMetric::Cashback => tx.amount().apply_rate(resolved.rate).cents(),
        }
    }

    /// Evaluates `tx` under `ruleset` against the balance already granted in
    /// the transaction's period.
    ///
    /// ## Errors
    /// [`CoreError::RulesetMismatch`] if the ruleset belongs to another card
    /// or does not cover the posting date. Nothing else can fail here.
    pub fn evaluate(
        &self,
        tx: &Transaction,
        ruleset: &Ruleset,
        balance: &CapBalance,
        computed_at: DateTime<Utc>,
    ) -> CoreResult<RewardOutcome> {
        if tx.card_id != ruleset.card_id || !ruleset.effective.contains(tx.posted_on) {
            return Err(CoreError::RulesetMismatch {
                transaction_id: tx.id.clone(),
                ruleset_id: ruleset.id.clone(),
            });
        }

        let mut trace = JustificationTrace::new();
        trace.push(TraceStep::RulesetSelected {
            ruleset_id: ruleset.id.clone(),
            version: ruleset.version.clone(),
            card_id: ruleset.card_id.clone(),
            effective_from: ruleset.effective.from,
            effective_to: ruleset.effective.to,
        });

        let resolved = self.resolver.resolve(ruleset, tx);
        trace.push(resolved.trace_step(tx.mcc));

        let raw = self.raw_amount(ruleset, tx, &resolved);
        trace.push(TraceStep::RawReward {
            metric: ruleset.reward_type,
            spend_cents: tx.amount_cents,
            rate: resolved.rate,
            amount: raw,
        });

        let period = self.period_for(ruleset, tx);
        let mut granted = CapBalance::empty();

        for metric in RewardMetric::ALL {
            let proposed = if metric == ruleset.reward_type { raw } else { 0 };
            let cap = ruleset.cap(metric);

            let amount = match cap {
                None => {
                    // Only the earned metric is worth explaining when uncapped.
                    if metric == ruleset.reward_type {
                        trace.push(TraceStep::CapNotConfigured {
                            metric,
                            granted: proposed,
                        });
                    }
                    proposed
                }
                Some(cap) => {
                    let prior = balance.get(metric);
                    let g = cap::grant(Some(cap.max), prior, proposed);
                    trace.push(TraceStep::CapChecked {
                        metric,
                        period: period.clone(),
                        limit: cap.max,
                        prior,
                        requested: g.requested,
                        granted: g.granted,
                    });
                    if g.is_truncated() {
                        trace.push(TraceStep::CapTruncated {
                            metric,
                            period: period.clone(),
                            truncated: g.truncated,
                        });
                    }
                    g.granted
                }
            };

            match metric {
                RewardMetric::Points => granted.points = amount,
                RewardMetric::Cashback => granted.cashback_cents = amount,
            }
        }

        trace.push(TraceStep::RewardGranted {
            points: granted.points,
            cashback_cents: granted.cashback_cents,
        });

        Ok(RewardOutcome {
            transaction_id: tx.id.clone(),
            ruleset_id: ruleset.id.clone(),
            ruleset_version: ruleset.version.clone(),
            card_id: tx.card_id.clone(),
            period,
            points: granted.points,
            cashback_cents: granted.cashback_cents,
            trace,
            computed_at,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn points_ruleset() -> Ruleset {
        Ruleset::from_json(
            "rs-points",
            r#"{
                "card_id": "card-1",
                "version": "v1",
                "base_rate": 1,
                "multipliers": [
                    { "category": "electronics", "include_mccs": [5732], "rate": 5 }
                ],
                "caps": [ { "period": "calendar_month", "metric": "points", "max": 10000 } ],
                "effective_from": "2024-01-01"
            }"#,
        )
        .unwrap()
    }

    fn cashback_ruleset() -> Ruleset {
        Ruleset::from_json(
            "rs-cash",
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

    fn tx(amount_cents: i64, mcc: u16) -> Transaction {
        Transaction {
            id: "tx-1".to_string(),
            card_id: "card-1".to_string(),
            posted_on: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            amount_cents,
            mcc,
            description: Some("ELECTRO STORE".to_string()),
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 16, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_first_match_rate_applies() {
        let outcome = RewardComputer::new()
            .evaluate(&tx(10_000, 5732), &cashback_ruleset(), &CapBalance::empty(), at())
            .unwrap();

        // $100.00 × 0.04 = $4.00
        assert_eq!(outcome.cashback_cents, 400);
        assert_eq!(outcome.points, 0);
        assert!(matches!(
            outcome.trace.steps()[1],
            TraceStep::RuleMatched { rule_index: 0, .. }
        ));
    }

    #[test]
    fn test_base_rate_fallback() {
        let outcome = RewardComputer::new()
            .evaluate(&tx(10_000, 4900), &cashback_ruleset(), &CapBalance::empty(), at())
            .unwrap();

        assert_eq!(outcome.cashback_cents, 100);
        assert!(matches!(
            outcome.trace.steps()[1],
            TraceStep::BaseRateApplied { mcc: 4900, .. }
        ));
    }

    #[test]
    fn test_cap_truncation() {
        // $100.00 at 5x = 500 points; 9 900 of 10 000 already granted.
        let balance = CapBalance {
            points: 9_900,
            cashback_cents: 0,
        };
        let outcome = RewardComputer::new()
            .evaluate(&tx(10_000, 5732), &points_ruleset(), &balance, at())
            .unwrap();

        assert_eq!(outcome.points, 100);
        assert_eq!(outcome.trace.truncated(RewardMetric::Points), 400);
        assert!(outcome.trace.steps().iter().any(|s| matches!(
            s,
            TraceStep::CapChecked {
                limit: 10_000,
                prior: 9_900,
                requested: 500,
                granted: 100,
                ..
            }
        )));
        assert!(outcome
            .trace
            .describe()
            .iter()
            .any(|line| line == "400 pts truncated by the points cap for 2024-03"));
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let computer = RewardComputer::new();
        let balance = CapBalance {
            points: 1_234,
            cashback_cents: 0,
        };
        let first = computer
            .evaluate(&tx(7_777, 5999), &points_ruleset(), &balance, at())
            .unwrap();
        let second = computer
            .evaluate(&tx(7_777, 5999), &points_ruleset(), &balance, at())
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_trace_ends_with_grant() {
        let outcome = RewardComputer::new()
            .evaluate(&tx(10_000, 5732), &cashback_ruleset(), &CapBalance::empty(), at())
            .unwrap();

        assert!(matches!(
            outcome.trace.steps().first(),
            Some(TraceStep::RulesetSelected { .. })
        ));
        assert_eq!(
            outcome.trace.steps().last(),
            Some(&TraceStep::RewardGranted {
                points: 0,
                cashback_cents: 400
            })
        );
        assert_eq!(outcome.period.as_str(), "2024-03");
    }

    #[test]
    fn test_wrong_card_or_date_is_rejected() {
        let mut other_card = tx(100, 5732);
        other_card.card_id = "card-2".to_string();
        assert!(matches!(
            RewardComputer::new().evaluate(&other_card, &points_ruleset(), &CapBalance::empty(), at()),
            Err(CoreError::RulesetMismatch { .. })
        ));

        let mut too_early = tx(100, 5732);
        too_early.posted_on = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        assert!(RewardComputer::new()
            .evaluate(&too_early, &points_ruleset(), &CapBalance::empty(), at())
            .is_err());
    }
}
