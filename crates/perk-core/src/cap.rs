//! # Cap Arithmetic
//!
//! The pure half of the CapLedger: given a cap, the balance already granted
//! in the period and a proposed amount, how much may be granted.
//!
//! ```text
//!   limit 10 000, prior 9 900, proposed 500
//!
//!   room      = max(limit - prior, 0) =   100
//!   granted   = min(proposed, room)   =   100
//!   truncated = proposed - granted    =   400   ← recorded in the trace
//! ```
//!
//! Caps truncate, they never reject. The storage half (serialized
//! read-modify-write of the balance row) lives in `perk-db`.

use serde::{Deserialize, Serialize};

/// Result of checking a proposed amount against a cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapGrant {
    pub requested: i64,
    pub granted: i64,
    pub truncated: i64,
}

impl CapGrant {
    pub const fn is_truncated(&self) -> bool {
        self.truncated > 0
    }
}

/// Computes the grant for `proposed` against `limit` given `prior` accrued.
///
/// `limit = None` means no cap: the full amount is granted.
///
/// ## Example
/// ```rust
/// use perk_core::cap::grant;
///
/// let g = grant(Some(10_000), 9_900, 500);
/// assert_eq!((g.granted, g.truncated), (100, 400));
///
/// // A balance already over the limit grants nothing.
/// assert_eq!(grant(Some(100), 150, 20).granted, 0);
/// ```
pub fn grant(limit: Option<i64>, prior: i64, proposed: i64) -> CapGrant {
    let requested = proposed.max(0);
    let granted = match limit {
        None => requested,
        Some(limit) => requested.min(limit.saturating_sub(prior).max(0)),
    };

    CapGrant {
        requested,
        granted,
        truncated: requested - granted,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncapped_grants_everything() {
        let g = grant(None, 1_000_000, 500);
        assert_eq!(g.granted, 500);
        assert!(!g.is_truncated());
    }

    #[test]
    fn test_truncation() {
        let g = grant(Some(10_000), 9_900, 500);
        assert_eq!(g.requested, 500);
        assert_eq!(g.granted, 100);
        assert_eq!(g.truncated, 400);
        assert!(g.is_truncated());
    }

    #[test]
    fn test_exactly_at_limit() {
        assert_eq!(grant(Some(10_000), 9_500, 500).granted, 500);
        assert_eq!(grant(Some(10_000), 10_000, 500).granted, 0);
    }

    #[test]
    fn test_cumulative_grants_never_exceed_cap() {
        let limit = 1_000;
        let mut balance = 0;
        for proposed in [300, 450, 10, 999, 1, 0, 250] {
            let g = grant(Some(limit), balance, proposed);
            assert!(g.granted >= 0);
            assert_eq!(g.granted + g.truncated, proposed);
            balance += g.granted;
            assert!(balance <= limit);
        }
        assert_eq!(balance, limit);
    }
}
