//! Snapshot loading and verification
//!
//! The first snapshot for a market becomes its baseline. Every later
//! snapshot at an equal or newer nonce is treated as ground truth to check
//! the reconstructed book against, never as a replacement: if deltas have
//! kept the book correct, the snapshot matches and nothing changes; if it
//! does not match, something upstream was lost and the caller must know.

use tracing::{debug, info, warn};

use crate::diff::diff;
use crate::error::ConsistencyFault;
use crate::events::SnapshotRecord;
use crate::order_book::OrderBookState;

/// Result of offering a snapshot to a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// No book existed; the snapshot became the baseline.
    Created,
    /// Snapshot is older than the book (warm-up race); ignored.
    Stale { book_nonce: u64 },
    /// Snapshot matched the book. `advanced` is set when its nonce was
    /// newer and has been adopted.
    Verified { advanced: bool },
}

/// Materialize a snapshot as a book.
pub fn book_from_snapshot(record: &SnapshotRecord) -> OrderBookState {
    OrderBookState::from_levels(
        record.market.clone(),
        record.nonce,
        record.bids.iter().copied(),
        record.asks.iter().copied(),
    )
    .with_captured_at(record.captured_at)
}

/// Load a snapshot into a market slot, creating the book or verifying it.
pub fn load_snapshot(
    slot: &mut Option<OrderBookState>,
    record: &SnapshotRecord,
) -> Result<SnapshotOutcome, ConsistencyFault> {
    match slot {
        None => {
            let book = book_from_snapshot(record);
            info!(
                market = %record.market,
                nonce = record.nonce,
                bid_levels = book.bid_depth(),
                ask_levels = book.ask_depth(),
                "Order book created from snapshot"
            );
            *slot = Some(book);
            Ok(SnapshotOutcome::Created)
        }
        Some(book) => verify_snapshot(book, record),
    }
}

/// Check a snapshot against an existing book.
///
/// Levels are never written here: a matching snapshot can only move the
/// nonce (and capture time) forward.
pub fn verify_snapshot(
    book: &mut OrderBookState,
    record: &SnapshotRecord,
) -> Result<SnapshotOutcome, ConsistencyFault> {
    if record.nonce < book.nonce() {
        warn!(
            market = %record.market,
            nonce = record.nonce,
            book_nonce = book.nonce(),
            "Snapshot older than book, skipped"
        );
        return Ok(SnapshotOutcome::Stale {
            book_nonce: book.nonce(),
        });
    }

    let expected = book_from_snapshot(record);
    let changes = diff(book, &expected);
    if !changes.is_empty() {
        return Err(ConsistencyFault::SnapshotMismatch {
            snapshot_nonce: record.nonce,
            book_nonce: book.nonce(),
            diff: changes,
        });
    }

    let advanced = record.nonce > book.nonce();
    book.advance(record.nonce, record.captured_at);

    debug!(
        market = %record.market,
        nonce = record.nonce,
        advanced,
        "Snapshot matches book"
    );

    Ok(SnapshotOutcome::Verified { advanced })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order_book::PriceLevel;
    use types::ids::MarketId;
    use types::numeric::{Price, Quantity};
    use types::order::Side;

    fn level(p: u64, q: u64) -> PriceLevel {
        PriceLevel::new(Price::from_u64(p), Quantity::from_u64(q))
    }

    fn snapshot(nonce: u64, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> SnapshotRecord {
        SnapshotRecord::new(MarketId::new("BTC-ETH"), nonce, bids, asks)
    }

    #[test]
    fn test_first_snapshot_creates_book() {
        let mut slot = None;
        let outcome = load_snapshot(
            &mut slot,
            &snapshot(10, vec![level(10, 1)], vec![level(11, 2)]).with_captured_at(5),
        )
        .unwrap();

        assert_eq!(outcome, SnapshotOutcome::Created);
        let book = slot.unwrap();
        assert_eq!(book.nonce(), 10);
        assert_eq!(book.captured_at(), Some(5));
        assert_eq!(book.quantity_at(Side::Ask, Price::from_u64(11)), Some(Quantity::from_u64(2)));
    }

    #[test]
    fn test_older_snapshot_is_ignored() {
        let mut slot = Some(book_from_snapshot(&snapshot(10, vec![level(10, 1)], vec![])));
        let outcome = load_snapshot(&mut slot, &snapshot(9, vec![level(99, 9)], vec![])).unwrap();

        assert_eq!(outcome, SnapshotOutcome::Stale { book_nonce: 10 });
        assert_eq!(slot.unwrap().bid_depth(), 1);
    }

    #[test]
    fn test_equal_nonce_mismatch_faults_with_diff() {
        let mut slot = Some(book_from_snapshot(&snapshot(100, vec![level(50, 5)], vec![])));
        let result = load_snapshot(&mut slot, &snapshot(100, vec![level(50, 6)], vec![]));

        match result {
            Err(ConsistencyFault::SnapshotMismatch { snapshot_nonce, book_nonce, diff }) => {
                assert_eq!(snapshot_nonce, 100);
                assert_eq!(book_nonce, 100);
                assert_eq!(
                    diff.side_triples(Side::Bid),
                    vec![(
                        Price::from_u64(50),
                        Some(Quantity::from_u64(5)),
                        Some(Quantity::from_u64(6))
                    )]
                );
            }
            other => panic!("Expected SnapshotMismatch, got {:?}", other),
        }

        // Book untouched
        let book = slot.unwrap();
        assert_eq!(book.quantity_at(Side::Bid, Price::from_u64(50)), Some(Quantity::from_u64(5)));
    }

    #[test]
    fn test_matching_newer_snapshot_adopts_nonce() {
        let mut slot = Some(book_from_snapshot(&snapshot(100, vec![level(50, 5)], vec![level(60, 1)])));
        let outcome = load_snapshot(
            &mut slot,
            &snapshot(120, vec![level(50, 5)], vec![level(60, 1)]),
        )
        .unwrap();

        assert_eq!(outcome, SnapshotOutcome::Verified { advanced: true });
        assert_eq!(slot.unwrap().nonce(), 120);
    }

    #[test]
    fn test_matching_equal_snapshot_keeps_nonce() {
        let mut slot = Some(book_from_snapshot(&snapshot(100, vec![level(50, 5)], vec![])));
        let outcome = load_snapshot(&mut slot, &snapshot(100, vec![level(50, 5)], vec![])).unwrap();

        assert_eq!(outcome, SnapshotOutcome::Verified { advanced: false });
        assert_eq!(slot.unwrap().nonce(), 100);
    }

    #[test]
    fn test_zero_quantity_levels_in_snapshot_are_ignored() {
        let mut slot = Some(book_from_snapshot(&snapshot(1, vec![level(50, 5)], vec![])));
        let outcome = load_snapshot(
            &mut slot,
            &snapshot(2, vec![level(50, 5), level(49, 0)], vec![]),
        )
        .unwrap();
        assert_eq!(outcome, SnapshotOutcome::Verified { advanced: true });
    }
}
