//! # Ruleset Repository
//!
//! Publication and lookup of immutable ruleset versions.
//!
//! ## Ruleset Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Ruleset Lifecycle                                 │
//! │                                                                         │
//! │  1. ACTIVATE                                                           │
//! │     └── activate(doc) → validate → Ruleset { status: active }          │
//! │         (rejected if its range overlaps another active ruleset)        │
//! │                                                                         │
//! │  2. CORRECT (never edit)                                               │
//! │     └── activate(doc with "supersedes": old_id)                        │
//! │         ├── new row inserted as active                                 │
//! │         └── old row flipped to superseded (same SQLite transaction)    │
//! │                                                                         │
//! │  3. REPLAY (perk-engine)                                               │
//! │     └── outcomes under the superseded id are re-settled                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The stored `definition` is the normalized document JSON. Every load runs
//! it through the same validation as activation.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use perk_core::{
    CoreError, CoreResult, EffectiveRange, Ruleset, RulesetCatalog, RulesetDocument,
    RulesetHeader, RulesetStatus, ValidationError,
};

/// A stored ruleset row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RulesetRecord {
    pub id: String,
    pub card_id: String,
    pub version: String,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    pub status: RulesetStatus,
    pub definition: String,
    pub supersedes: Option<String>,
    pub superseded_by: Option<String>,
    pub activated_at: DateTime<Utc>,
    pub superseded_at: Option<DateTime<Utc>>,
}

impl RulesetRecord {
    pub fn header(&self) -> RulesetHeader {
        RulesetHeader {
            id: self.id.clone(),
            card_id: self.card_id.clone(),
            version: self.version.clone(),
            effective: EffectiveRange {
                from: self.effective_from,
                to: self.effective_to,
            },
        }
    }

    /// Re-validates the stored definition into a [`Ruleset`].
    pub fn decode(&self) -> CoreResult<Ruleset> {
        Ruleset::from_json(&*self.id, &self.definition)
    }

    pub fn is_active(&self) -> bool {
        self.status == RulesetStatus::Active
    }
}

const SELECT_RECORD: &str = r#"
    SELECT
        id, card_id, version, effective_from, effective_to, status, definition,
        supersedes, superseded_by, activated_at, superseded_at
    FROM rulesets
"#;

/// Fetches one ruleset row on an already-open connection.
pub(crate) async fn fetch_record(
    conn: &mut SqliteConnection,
    id: &str,
) -> DbResult<Option<RulesetRecord>> {
    let record = sqlx::query_as(&format!("{SELECT_RECORD} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(record)
}

/// Repository for ruleset database operations.
#[derive(Debug, Clone)]
pub struct RulesetRepository {
    pool: SqlitePool,
}

impl RulesetRepository {
    /// Creates a new RulesetRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RulesetRepository { pool }
    }

    /// Validates and publishes a ruleset document.
    ///
    /// ## What This Does
    /// 1. Validates the document (rule shape, rates, caps, range)
    /// 2. Assigns a UUID v4 id
    /// 3. In one SQLite transaction:
    ///    - inserts the ruleset as active
    ///    - checks the supersession target (exists, active, same card)
    ///    - rejects overlap with any other active ruleset of the card
    ///    - flips the superseded ruleset to `superseded`
    ///
    /// ## Errors
    /// - [`DbError::Domain`] with `InvalidRuleDefinition` / `Validation` /
    ///   `OverlappingRuleset`
    /// - [`DbError::UniqueViolation`] if the (card, version) pair exists
    /// - [`DbError::NotFound`] if `supersedes` names an unknown ruleset
    pub async fn activate(&self, doc: &RulesetDocument) -> DbResult<Ruleset> {
        let id = Uuid::new_v4().to_string();
        let ruleset = Ruleset::from_document(&*id, doc)?;
        let definition = doc.to_json()?;
        let now = Utc::now();

        debug!(
            ruleset_id = %id,
            card_id = %ruleset.card_id,
            version = %ruleset.version,
            "Activating ruleset"
        );

        let mut tx = self.pool.begin().await?;

        // The insert comes first so the write lock is held before any read.
        sqlx::query(
            r#"
            INSERT INTO rulesets (
                id, card_id, version, effective_from, effective_to,
                status, definition, supersedes, activated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&ruleset.id)
        .bind(&ruleset.card_id)
        .bind(&ruleset.version)
        .bind(ruleset.effective.from)
        .bind(ruleset.effective.to)
        .bind(RulesetStatus::Active)
        .bind(&definition)
        .bind(&ruleset.supersedes)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::duplicate(
                "version",
                format!("{}/{}", ruleset.card_id, ruleset.version),
            ),
            DbError::ForeignKeyViolation { .. } => DbError::not_found(
                "Ruleset",
                ruleset.supersedes.clone().unwrap_or_default(),
            ),
            other => other,
        })?;

        if let Some(target_id) = &ruleset.supersedes {
            let target = fetch_record(&mut tx, target_id)
                .await?
                .ok_or_else(|| DbError::not_found("Ruleset", target_id))?;

            if target.card_id != ruleset.card_id {
                return Err(invalid_supersedes(format!(
                    "ruleset {} belongs to card {}",
                    target_id, target.card_id
                )));
            }
            if !target.is_active() {
                return Err(invalid_supersedes(format!(
                    "ruleset {} is already superseded",
                    target_id
                )));
            }
        }

        let active: Vec<RulesetRecord> =
            sqlx::query_as(&format!("{SELECT_RECORD} WHERE card_id = ?1 AND status = ?2"))
                .bind(&ruleset.card_id)
                .bind(RulesetStatus::Active)
                .fetch_all(&mut *tx)
                .await?;

        let catalog = RulesetCatalog::new(active.iter().map(RulesetRecord::header).collect());
        catalog.ensure_no_overlap(&ruleset.header(), ruleset.supersedes.as_deref())?;

        if let Some(target_id) = &ruleset.supersedes {
            sqlx::query(
                r#"
                UPDATE rulesets
                SET status = ?2, superseded_by = ?3, superseded_at = ?4
                WHERE id = ?1 AND status = 'active'
                "#,
            )
            .bind(target_id)
            .bind(RulesetStatus::Superseded)
            .bind(&ruleset.id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            ruleset_id = %ruleset.id,
            card_id = %ruleset.card_id,
            version = %ruleset.version,
            effective = %ruleset.effective,
            supersedes = ?ruleset.supersedes,
            "Ruleset activated"
        );

        Ok(ruleset)
    }

    /// Gets a stored ruleset row by ID.
    pub async fn get(&self, id: &str) -> DbResult<Option<RulesetRecord>> {
        let record = sqlx::query_as(&format!("{SELECT_RECORD} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    /// Loads and validates a ruleset.
    ///
    /// ## Errors
    /// - [`DbError::NotFound`] if the id is unknown
    /// - [`DbError::Domain`] if the stored definition no longer validates
    pub async fn load(&self, id: &str) -> DbResult<Ruleset> {
        let record = self
            .get(id)
            .await?
            .ok_or_else(|| DbError::not_found("Ruleset", id))?;

        Ok(record.decode()?)
    }

    /// Headers of the card's active rulesets.
    pub async fn active_headers(&self, card_id: &str) -> DbResult<Vec<RulesetHeader>> {
        let records: Vec<RulesetRecord> =
            sqlx::query_as(&format!(
                "{SELECT_RECORD} WHERE card_id = ?1 AND status = ?2 ORDER BY effective_from, id"
            ))
            .bind(card_id)
            .bind(RulesetStatus::Active)
            .fetch_all(&self.pool)
            .await?;

        Ok(records.iter().map(RulesetRecord::header).collect())
    }

    /// A catalog over the card's active rulesets.
    pub async fn catalog(&self, card_id: &str) -> DbResult<RulesetCatalog> {
        Ok(RulesetCatalog::new(self.active_headers(card_id).await?))
    }

    /// Every ruleset ever published for a card (active and superseded),
    /// oldest first.
    pub async fn history(&self, card_id: &str) -> DbResult<Vec<RulesetRecord>> {
        let records = sqlx::query_as(&format!(
            "{SELECT_RECORD} WHERE card_id = ?1 ORDER BY activated_at, id"
        ))
        .bind(card_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

fn invalid_supersedes(reason: String) -> DbError {
    DbError::Domain(CoreError::Validation(ValidationError::InvalidFormat {
        field: "supersedes".to_string(),
        reason,
    }))
}

// =============================================================================
// Unit Tests
// =============================================================================
