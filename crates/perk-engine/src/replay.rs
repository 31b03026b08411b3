//! # Replay
//!
//! `ReplayForRuleset`: after a retroactive correction, move every
//! transaction rewarded under the superseded ruleset onto whatever the
//! catalog selects now.
//!
//! ```text
//!   v1 (superseded) ── active outcomes, oldest posting first
//!        │
//!        ▼  for each transaction, sequentially:
//!   Engine::evaluate_transaction
//!        ├── resolves to v2 → settle reverses v1 grants, reserves v2 grants
//!        ├── still v1       → unchanged (v1 was not superseded)
//!        └── no ruleset     → unmatched, v1 outcome stays active
//! ```
//!
//! Transactions are replayed one at a time in posting order, so the new
//! ruleset's cap balances accrue exactly as if it had been in force from
//! the start. Every step is a settle, which makes a partially failed
//! replay safe to run again.

use perk_core::EvaluationStatus;
use serde::Serialize;
use tracing::{info, warn};

use crate::engine::{Engine, Settlement};
use crate::error::{EngineError, EngineResult};

/// A transaction the replay could not move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayFailure {
    pub transaction_id: String,
    pub reason: String,
    /// The scheduler may retry this transaction.
    pub retryable: bool,
}

/// Summary of one replay run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub ruleset_id: String,
    /// Moved onto another ruleset.
    pub replaced: Vec<String>,
    /// Still rewarded under the replayed ruleset.
    pub unchanged: Vec<String>,
    /// No ruleset covers them any more; the old outcome stays active.
    pub unmatched: Vec<String>,
    pub failed: Vec<ReplayFailure>,
}

impl ReplayReport {
    /// Transactions the replay looked at.
    pub fn total(&self) -> usize {
        self.replaced.len() + self.unchanged.len() + self.unmatched.len() + self.failed.len()
    }

    /// True when nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Engine {
    /// Re-evaluates every transaction whose active outcome is under
    /// `ruleset_id`.
    ///
    /// ## Errors
    /// [`EngineError::RulesetNotFound`] for an unknown id. Per-transaction
    /// failures are collected in the report instead.
    pub async fn replay_ruleset(&self, ruleset_id: &str) -> EngineResult<ReplayReport> {
        let record = self
            .database()
            .rulesets()
            .get(ruleset_id)
            .await?
            .ok_or_else(|| EngineError::RulesetNotFound(ruleset_id.to_string()))?;

        if record.is_active() {
            warn!(ruleset_id, "Replaying a ruleset that is still active");
        }

        let transaction_ids = self.database().rewards().active_transaction_ids(ruleset_id).await?;
        info!(
            ruleset_id,
            card_id = %record.card_id,
            transactions = transaction_ids.len(),
            "Replay started"
        );

        let mut report = ReplayReport {
            ruleset_id: ruleset_id.to_string(),
            ..ReplayReport::default()
        };

        for transaction_id in transaction_ids {
            match self.evaluate_transaction(&transaction_id).await {
                Ok(result) => match (result.status, result.settlement) {
                    (EvaluationStatus::Rewarded, Some(Settlement::Unchanged)) => {
                        report.unchanged.push(transaction_id)
                    }
                    (EvaluationStatus::Rewarded, _) => report.replaced.push(transaction_id),
                    (EvaluationStatus::UnmatchedRuleset, _) => report.unmatched.push(transaction_id),
                    (status, _) => report.failed.push(ReplayFailure {
                        transaction_id,
                        reason: result
                            .detail
                            .unwrap_or_else(|| status.as_str().to_string()),
                        retryable: false,
                    }),
                },
                Err(err) => {
                    warn!(transaction_id = %transaction_id, error = %err, "Replay step failed");
                    report.failed.push(ReplayFailure {
                        transaction_id,
                        reason: err.to_string(),
                        retryable: err.is_retryable(),
                    });
                }
            }
        }

        info!(
            ruleset_id,
            replaced = report.replaced.len(),
            unchanged = report.unchanged.len(),
            unmatched = report.unmatched.len(),
            failed = report.failed.len(),
            "Replay finished"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perk_db::{Database, DbConfig};

    #[tokio::test]
    async fn test_unknown_ruleset() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let engine = Engine::new(db, 1);

        let err = engine.replay_ruleset("nope").await.unwrap_err();
        assert!(matches!(err, EngineError::RulesetNotFound(_)));
    }

    #[test]
    fn test_report_totals() {
        let report = ReplayReport {
            ruleset_id: "rs-1".into(),
            replaced: vec!["a".into(), "b".into()],
            unchanged: vec!["c".into()],
            unmatched: vec![],
            failed: vec![ReplayFailure {
                transaction_id: "d".into(),
                reason: "database is locked".into(),
                retryable: true,
            }],
        };
        assert_eq!(report.total(), 4);
        assert!(!report.is_clean());
    }
}
