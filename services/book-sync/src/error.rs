//! Error types for the book-sync core
//!
//! Only integrity failures surface as errors. Stale records, unknown
//! markets and unrecognized messages are expected in a live feed and are
//! reported as outcomes and counters instead.

use thiserror::Error;
use types::ids::MarketId;
use types::numeric::Price;
use types::order::Side;

use crate::diff::BookDiff;

/// Reconstructed state disagrees with the exchange. Never auto-corrected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyFault {
    #[error(
        "snapshot at nonce {snapshot_nonce} disagrees with book at nonce {book_nonce} ({} level(s) differ)",
        .diff.len()
    )]
    SnapshotMismatch {
        snapshot_nonce: u64,
        book_nonce: u64,
        /// Book (before) versus snapshot (after).
        diff: BookDiff,
    },

    #[error("batch at nonce {nonce} removes absent {side} level {price}")]
    RemovalOfAbsentLevel { nonce: u64, side: Side, price: Price },
}

impl ConsistencyFault {
    /// Structured diff, when the fault came from snapshot verification.
    pub fn diff(&self) -> Option<&BookDiff> {
        match self {
            ConsistencyFault::SnapshotMismatch { diff, .. } => Some(diff),
            ConsistencyFault::RemovalOfAbsentLevel { .. } => None,
        }
    }

    /// Multi-line report suitable for logs.
    pub fn report(&self) -> String {
        match self.diff() {
            Some(diff) => format!("{}\n{}", self, diff.report()),
            None => self.to_string(),
        }
    }
}

/// Errors returned by the book store to its caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("consistency fault in market {market}: {fault}")]
    ConsistencyFault {
        market: MarketId,
        fault: ConsistencyFault,
    },

    #[error("market {market} is halted after a consistency fault")]
    MarketHalted { market: MarketId },
}

impl SyncError {
    pub fn market(&self) -> &MarketId {
        match self {
            SyncError::ConsistencyFault { market, .. } => market,
            SyncError::MarketHalted { market } => market,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removal_fault_display() {
        let fault = ConsistencyFault::RemovalOfAbsentLevel {
            nonce: 12,
            side: Side::Ask,
            price: Price::from_u64(21),
        };
        assert_eq!(fault.to_string(), "batch at nonce 12 removes absent ASK level 21");
        assert!(fault.diff().is_none());
        assert_eq!(fault.report(), fault.to_string());
    }

    #[test]
    fn test_snapshot_mismatch_display() {
        let fault = ConsistencyFault::SnapshotMismatch {
            snapshot_nonce: 100,
            book_nonce: 100,
            diff: BookDiff::default(),
        };
        assert!(fault.to_string().contains("0 level(s) differ"));
        assert!(fault.report().ends_with("No changes"));
    }

    #[test]
    fn test_sync_error_market() {
        let err = SyncError::MarketHalted {
            market: MarketId::new("BTC-ETH"),
        };
        assert_eq!(err.market().as_str(), "BTC-ETH");
        assert!(err.to_string().contains("halted"));
    }
}
