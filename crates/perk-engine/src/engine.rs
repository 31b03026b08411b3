//! # Engine
//!
//! The single evaluation entry point consumed by the job scheduler, plus
//! ruleset activation, the test/dev ingestion loader, the per-transaction
//! breakdown and cap balance lookups.
//!
//! ## EvaluateTransaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  transaction_id                                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  TransactionRepository::get_by_id ──── missing ──► TransactionNotFound │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  RulesetCatalog::resolve(card, posted_on)                              │
//! │       ├── none      ──► status unmatched-ruleset   (warn!)             │
//! │       ├── several   ──► status ambiguous-ruleset   (error!)            │
//! │       ▼                                                                 │
//! │  RulesetRepository::load ── bad data ──► status invalid-rule-data      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  RewardRecorder::settle  (lock cap → evaluate → reserve → insert)      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  status rewarded + EvaluationReport                                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every terminal status is also written to the `evaluations` table, so
//! [`Engine::breakdown`] can explain a transaction that is not rewarded yet.

use chrono::{DateTime, Utc};
use perk_core::validation::validate_transaction;
use perk_core::{
    CapBalance, CapKey, CoreError, EvaluationStatus, PeriodKey, RewardComputer, RewardMetric,
    RewardOutcome, Ruleset, RulesetDocument, Transaction,
};
use perk_db::{ensure_parent_dir, Ack, Database, DbError};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// Shown to the cardholder while no ruleset covers a transaction.
pub const PENDING_RULE_COVERAGE: &str = "not yet rewarded — pending rule coverage";

// =============================================================================
// Reports
// =============================================================================

/// How settlement changed the stored outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Settlement {
    /// First outcome for the transaction.
    Recorded,
    /// An identical outcome was already recorded; nothing was written.
    Unchanged,
    /// The outcome under an earlier ruleset was reversed and superseded.
    Replaced { previous: RewardOutcome },
}

/// Result of one `EvaluateTransaction` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationReport {
    pub transaction_id: String,
    pub status: EvaluationStatus,
    /// The selected ruleset, when one was resolved.
    pub ruleset_id: Option<String>,
    /// The active outcome after the call.
    pub outcome: Option<RewardOutcome>,
    pub settlement: Option<Settlement>,
    /// Why the transaction is not rewarded, for non-rewarded statuses.
    pub detail: Option<String>,
}

impl EvaluationReport {
    fn terminal(
        transaction_id: &str,
        status: EvaluationStatus,
        ruleset_id: Option<String>,
        outcome: Option<RewardOutcome>,
        detail: String,
    ) -> Self {
        EvaluationReport {
            transaction_id: transaction_id.to_string(),
            status,
            ruleset_id,
            outcome,
            settlement: None,
            detail: Some(detail),
        }
    }

    pub fn is_rewarded(&self) -> bool {
        self.status == EvaluationStatus::Rewarded
    }
}

/// Result of loading a batch of transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub inserted: usize,
    /// Ids that were already present and left untouched.
    pub duplicates: Vec<String>,
}

/// What the cardholder sees for one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Breakdown {
    /// A computed reward with its full rationale.
    ///
    /// `status` is the latest evaluation status. It is not `rewarded` when a
    /// later evaluation found no usable ruleset and the earlier outcome
    /// stayed in force.
    Rewarded {
        outcome: RewardOutcome,
        explanation: Vec<String>,
        status: Option<EvaluationStatus>,
    },
    /// Not rewarded yet, and why.
    Pending {
        transaction_id: String,
        status: Option<EvaluationStatus>,
        reason: String,
    },
}

// =============================================================================
// Engine
// =============================================================================

/// Rewards engine over one database.
///
/// Cheap to clone: clones share the connection pool.
#[derive(Debug, Clone)]
pub struct Engine {
    db: Database,
    computer: RewardComputer,
    concurrency: usize,
}

impl Engine {
    /// Creates an engine over an open database.
    pub fn new(db: Database, concurrency: usize) -> Self {
        Engine {
            db,
            computer: RewardComputer::new(),
            concurrency: concurrency.max(1),
        }
    }

    /// Opens (and migrates) the configured database.
    pub async fn open(config: &EngineConfig) -> EngineResult<Self> {
        let db_config = config.db_config();
        ensure_parent_dir(&db_config.database_path)?;

        let db = Database::new(db_config).await?;
        Ok(Engine::new(db, config.evaluation.concurrency))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // =========================================================================
    // Ruleset Activation
    // =========================================================================

    /// Validates and activates a ruleset document given as JSON.
    ///
    /// Malformed documents are rejected before anything is stored.
    pub async fn activate_ruleset(&self, document_json: &str) -> EngineResult<Ruleset> {
        let document = RulesetDocument::from_json(document_json)?;
        self.activate_document(&document).await
    }

    /// Activates an already-parsed ruleset document.
    pub async fn activate_document(&self, document: &RulesetDocument) -> EngineResult<Ruleset> {
        match self.db.rulesets().activate(document).await {
            Ok(ruleset) => Ok(ruleset),
            Err(err) => {
                warn!(
                    card_id = %document.card_id,
                    version = %document.version,
                    error = %err,
                    "Ruleset activation rejected"
                );
                Err(err.into())
            }
        }
    }

    // =========================================================================
    // Ingestion Loader
    // =========================================================================

    /// Stores one normalized transaction.
    pub async fn ingest_transaction(&self, transaction: &Transaction) -> EngineResult<()> {
        validate_transaction(transaction).map_err(CoreError::from)?;
        self.db.transactions().insert(transaction).await?;
        Ok(())
    }

    /// Stores normalized transactions, skipping ids already present.
    ///
    /// Stops at the first invalid transaction; earlier ones stay stored.
    pub async fn ingest_transactions(
        &self,
        transactions: &[Transaction],
    ) -> EngineResult<IngestReport> {
        let mut report = IngestReport::default();

        for transaction in transactions {
            match self.ingest_transaction(transaction).await {
                Ok(()) => report.inserted += 1,
                Err(EngineError::Db(DbError::UniqueViolation { .. })) => {
                    debug!(transaction_id = %transaction.id, "Transaction already ingested");
                    report.duplicates.push(transaction.id.clone());
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            inserted = report.inserted,
            duplicates = report.duplicates.len(),
            "Transactions ingested"
        );
        Ok(report)
    }

    // =========================================================================
    // EvaluateTransaction
    // =========================================================================

    /// Evaluates one transaction and records its reward.
    ///
    /// Terminal states that need administrator action (no ruleset, several
    /// rulesets, unreadable rule data) come back as a report status, not an
    /// error. Errors are persistence failures, retryable per
    /// [`EngineError::is_retryable`], or unknown transaction ids.
    pub async fn evaluate_transaction(&self, transaction_id: &str) -> EngineResult<EvaluationReport> {
        self.evaluate_at(transaction_id, Utc::now()).await
    }

    /// [`Engine::evaluate_transaction`] with an explicit computation timestamp.
    pub async fn evaluate_at(
        &self,
        transaction_id: &str,
        computed_at: DateTime<Utc>,
    ) -> EngineResult<EvaluationReport> {
        let transaction = self
            .db
            .transactions()
            .get_by_id(transaction_id)
            .await?
            .ok_or_else(|| EngineError::TransactionNotFound(transaction_id.to_string()))?;

        let catalog = self.db.rulesets().catalog(&transaction.card_id).await?;
        let header = match catalog.resolve(&transaction.card_id, transaction.posted_on) {
            Ok(header) => header.clone(),
            Err(CoreError::NoApplicableRuleset { card_id, date }) => {
                warn!(
                    transaction_id,
                    card_id = %card_id,
                    posted_on = %date,
                    "No applicable ruleset"
                );
                return self.unmatched(&transaction).await;
            }
            Err(CoreError::AmbiguousRuleset {
                card_id,
                date,
                ruleset_ids,
            }) => {
                error!(
                    transaction_id,
                    card_id = %card_id,
                    posted_on = %date,
                    ruleset_ids = ?ruleset_ids,
                    "Ambiguous ruleset selection; overlapping active rulesets need attention"
                );
                let detail = format!(
                    "overlapping active rulesets for {} on {}: {}",
                    card_id,
                    date,
                    ruleset_ids.join(", ")
                );
                return self
                    .finish(transaction_id, EvaluationStatus::AmbiguousRuleset, None, detail)
                    .await;
            }
            Err(other) => return Err(other.into()),
        };

        let ruleset = match self.db.rulesets().load(&header.id).await {
            Ok(ruleset) => ruleset,
            Err(DbError::Domain(err)) if err.is_rule_data_error() => {
                error!(
                    transaction_id,
                    ruleset_id = %header.id,
                    error = %err,
                    "Stored ruleset no longer validates"
                );
                return self
                    .finish(
                        transaction_id,
                        EvaluationStatus::InvalidRuleData,
                        Some(header.id.clone()),
                        err.to_string(),
                    )
                    .await;
            }
            Err(err) => return Err(err.into()),
        };

        let ack = self
            .db
            .rewards()
            .settle(&self.computer, &transaction, &ruleset, computed_at)
            .await?;

        let settlement = match &ack {
            Ack::Recorded(_) => Settlement::Recorded,
            Ack::AlreadyRecorded(_) => Settlement::Unchanged,
            Ack::Replaced { previous, .. } => Settlement::Replaced {
                previous: previous.clone(),
            },
        };
        let outcome = ack.into_outcome();

        for metric in RewardMetric::ALL {
            let truncated = outcome.trace.truncated(metric);
            if truncated > 0 && settlement != Settlement::Unchanged {
                info!(
                    transaction_id,
                    ruleset_id = %ruleset.id,
                    period = %outcome.period,
                    metric = %metric,
                    truncated,
                    "Reward truncated by cap"
                );
            }
        }

        self.db
            .evaluations()
            .upsert(
                transaction_id,
                EvaluationStatus::Rewarded,
                Some(&ruleset.id),
                None,
            )
            .await?;

        debug!(
            transaction_id,
            ruleset_id = %ruleset.id,
            points = outcome.points,
            cashback_cents = outcome.cashback_cents,
            "Transaction rewarded"
        );

        Ok(EvaluationReport {
            transaction_id: transaction_id.to_string(),
            status: EvaluationStatus::Rewarded,
            ruleset_id: Some(ruleset.id.clone()),
            outcome: Some(outcome),
            settlement: Some(settlement),
            detail: None,
        })
    }

    /// No ruleset covers the transaction. Any earlier outcome stays active.
    async fn unmatched(&self, transaction: &Transaction) -> EngineResult<EvaluationReport> {
        let prior = self
            .db
            .rewards()
            .active_for_transaction(&transaction.id)
            .await?
            .map(|stored| stored.outcome);

        let mut report = self
            .finish(
                &transaction.id,
                EvaluationStatus::UnmatchedRuleset,
                None,
                PENDING_RULE_COVERAGE.to_string(),
            )
            .await?;
        report.outcome = prior;
        Ok(report)
    }

    async fn finish(
        &self,
        transaction_id: &str,
        status: EvaluationStatus,
        ruleset_id: Option<String>,
        detail: String,
    ) -> EngineResult<EvaluationReport> {
        self.db
            .evaluations()
            .upsert(transaction_id, status, ruleset_id.as_deref(), Some(&detail))
            .await?;

        Ok(EvaluationReport::terminal(
            transaction_id,
            status,
            ruleset_id,
            None,
            detail,
        ))
    }

    // =========================================================================
    // Batch Evaluation
    // =========================================================================

    /// Evaluates many transactions concurrently, at most
    /// `evaluation.concurrency` at a time.
    ///
    /// Results come back in input order. Evaluations sharing a cap scope
    /// serialize on the cap ledger; everything else runs in parallel.
    pub async fn evaluate_many(
        &self,
        transaction_ids: &[String],
    ) -> Vec<(String, EngineResult<EvaluationReport>)> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (index, transaction_id) in transaction_ids.iter().cloned().enumerate() {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(error = %e, "Evaluation semaphore closed");
                    break;
                }
            };
            let engine = self.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let result = engine.evaluate_transaction(&transaction_id).await;
                (index, result)
            });
        }

        let mut results: Vec<Option<EngineResult<EvaluationReport>>> =
            transaction_ids.iter().map(|_| None).collect();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => error!(error = %e, "Evaluation task failed"),
            }
        }

        transaction_ids
            .iter()
            .cloned()
            .zip(results)
            .map(|(id, result)| {
                let result = result.unwrap_or_else(|| {
                    Err(EngineError::Internal(format!("evaluation of {} did not complete", id)))
                });
                (id, result)
            })
            .collect()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The cardholder-facing view of one transaction.
    pub async fn breakdown(&self, transaction_id: &str) -> EngineResult<Breakdown> {
        if self.db.transactions().get_by_id(transaction_id).await?.is_none() {
            return Err(EngineError::TransactionNotFound(transaction_id.to_string()));
        }

        let status = self
            .db
            .evaluations()
            .get(transaction_id)
            .await?
            .map(|record| record.status);

        if let Some(stored) = self.db.rewards().active_for_transaction(transaction_id).await? {
            let explanation = stored.outcome.trace.describe();
            return Ok(Breakdown::Rewarded {
                outcome: stored.outcome,
                explanation,
                status,
            });
        }

        let reason = match status {
            Some(EvaluationStatus::UnmatchedRuleset) => PENDING_RULE_COVERAGE,
            Some(EvaluationStatus::AmbiguousRuleset) | Some(EvaluationStatus::InvalidRuleData) => {
                "not yet rewarded — ruleset under administrator review"
            }
            Some(EvaluationStatus::Rewarded) | None => "not yet evaluated",
        };

        Ok(Breakdown::Pending {
            transaction_id: transaction_id.to_string(),
            status,
            reason: reason.to_string(),
        })
    }

    /// Amounts granted so far in one cap scope.
    pub async fn balance(
        &self,
        card_id: &str,
        ruleset_id: &str,
        period: &str,
    ) -> EngineResult<CapBalance> {
        let period: PeriodKey = period.parse().map_err(CoreError::from)?;
        let balance = self
            .db
            .cap_ledger()
            .balance(&CapKey::new(card_id, ruleset_id, period))
            .await?;
        Ok(balance)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
