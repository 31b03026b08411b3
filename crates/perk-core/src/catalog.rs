//! # Ruleset Catalog
//!
//! Selects the one ruleset version effective for a card on a date.
//!
//! ```text
//!   card-1 ─┬─ v2024-01  [2024-01-01, 2024-03-01)
//!           └─ v2024-03  [2024-03-01, ∞)
//!
//!   resolve(card-1, 2024-02-29) → v2024-01
//!   resolve(card-1, 2024-03-01) → v2024-03   (from is inclusive, to is not)
//!   resolve(card-1, 2023-12-31) → NoApplicableRuleset
//! ```
//!
//! The catalog holds headers only. The storage layer loads the active
//! headers for a card, the catalog picks one, and only then is the full
//! ruleset decoded.

use chrono::NaiveDate;

use crate::error::{CoreError, CoreResult};
use crate::ruleset::RulesetHeader;

/// An in-memory view over active ruleset headers.
#[derive(Debug, Clone, Default)]
pub struct RulesetCatalog {
    headers: Vec<RulesetHeader>,
}

impl RulesetCatalog {
    pub fn new(headers: Vec<RulesetHeader>) -> Self {
        RulesetCatalog { headers }
    }

    pub fn headers(&self) -> &[RulesetHeader] {
        &self.headers
    }

    /// Returns the unique ruleset whose effective range contains `date`.
    ///
    /// ## Errors
    /// - [`CoreError::NoApplicableRuleset`] when nothing covers the date.
    ///   There is no fallback default.
    /// - [`CoreError::AmbiguousRuleset`] when more than one range covers it,
    ///   which means the non-overlap invariant was broken upstream.
    pub fn resolve(&self, card_id: &str, date: NaiveDate) -> CoreResult<&RulesetHeader> {
        let mut matches: Vec<&RulesetHeader> = self
            .headers
            .iter()
            .filter(|h| h.card_id == card_id && h.effective.contains(date))
            .collect();

        match matches.len() {
            0 => Err(CoreError::NoApplicableRuleset {
                card_id: card_id.to_string(),
                date,
            }),
            1 => Ok(matches.remove(0)),
            _ => {
                let mut ruleset_ids: Vec<String> =
                    matches.iter().map(|h| h.id.clone()).collect();
                ruleset_ids.sort();
                Err(CoreError::AmbiguousRuleset {
                    card_id: card_id.to_string(),
                    date,
                    ruleset_ids,
                })
            }
        }
    }

    /// Checks that publishing `candidate` keeps the card's ranges disjoint.
    ///
    /// `ignoring` names a ruleset that is about to be superseded in the same
    /// publication and therefore does not count.
    pub fn ensure_no_overlap(
        &self,
        candidate: &RulesetHeader,
        ignoring: Option<&str>,
    ) -> CoreResult<()> {
        let clash = self.headers.iter().find(|h| {
            h.card_id == candidate.card_id
                && Some(h.id.as_str()) != ignoring
                && h.id != candidate.id
                && h.effective.overlaps(&candidate.effective)
        });

        match clash {
            Some(existing) => Err(CoreError::OverlappingRuleset {
                card_id: candidate.card_id.clone(),
                existing: existing.id.clone(),
            }),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ruleset::EffectiveRange;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn header(id: &str, from: NaiveDate, to: Option<NaiveDate>) -> RulesetHeader {
        RulesetHeader {
            id: id.to_string(),
            card_id: "card-1".to_string(),
            version: id.to_string(),
            effective: EffectiveRange { from, to },
        }
    }

    fn catalog() -> RulesetCatalog {
        RulesetCatalog::new(vec![
            header("v1", date(2024, 1, 1), Some(date(2024, 3, 1))),
            header("v2", date(2024, 3, 1), None),
        ])
    }

    #[test]
    fn test_resolve_picks_containing_range() {
        let catalog = catalog();
        assert_eq!(catalog.resolve("card-1", date(2024, 2, 29)).unwrap().id, "v1");
        assert_eq!(catalog.resolve("card-1", date(2030, 1, 1)).unwrap().id, "v2");
    }

    #[test]
    fn test_resolve_boundary_uses_new_version() {
        let catalog = catalog();
        assert_eq!(catalog.resolve("card-1", date(2024, 3, 1)).unwrap().id, "v2");
    }

    #[test]
    fn test_resolve_no_applicable_ruleset() {
        let catalog = catalog();
        assert!(matches!(
            catalog.resolve("card-1", date(2023, 12, 31)),
            Err(CoreError::NoApplicableRuleset { .. })
        ));
        assert!(matches!(
            catalog.resolve("card-2", date(2024, 3, 1)),
            Err(CoreError::NoApplicableRuleset { .. })
        ));
    }

    #[test]
    fn test_resolve_ambiguous_ruleset() {
        let catalog = RulesetCatalog::new(vec![
            header("b", date(2024, 1, 1), None),
            header("a", date(2024, 2, 1), None),
        ]);
        match catalog.resolve("card-1", date(2024, 2, 15)) {
            Err(CoreError::AmbiguousRuleset { ruleset_ids, .. }) => {
                assert_eq!(ruleset_ids, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn test_ensure_no_overlap() {
        let catalog = catalog();

        let overlapping = header("v3", date(2024, 2, 1), Some(date(2024, 4, 1)));
        assert!(matches!(
            catalog.ensure_no_overlap(&overlapping, None),
            Err(CoreError::OverlappingRuleset { .. })
        ));

        // Correcting v2 in place: v2 is being superseded, v1 does not overlap.
        let correction = header("v2-fix", date(2024, 3, 1), None);
        assert!(catalog.ensure_no_overlap(&correction, Some("v2")).is_ok());

        let other_card = RulesetHeader {
            card_id: "card-2".to_string(),
            ..overlapping
        };
        assert!(catalog.ensure_no_overlap(&other_card, None).is_ok());
    }
}
