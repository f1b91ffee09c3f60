//! Nonce-gated application of delta batches
//!
//! A batch is staged on an overlay first and only committed once every
//! entry has been validated, so a faulting batch leaves the book exactly as
//! it was. The book's nonce advances in the same step as the commit.
//!
//! Delta flow:
//! 1. Drop the batch if its nonce is not newer than the book's
//! 2. Stage entries in batch order (last entry for a price wins)
//! 3. Reject removals of levels that exist neither in the book nor earlier
//!    in the batch
//! 4. Commit staged levels and advance the nonce

use std::collections::BTreeMap;

use tracing::debug;
use types::numeric::{Price, Quantity};
use types::order::Side;

use crate::error::ConsistencyFault;
use crate::events::DeltaBatch;
use crate::order_book::OrderBookState;

/// Result of offering a batch to a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// Batch committed; `levels_changed` levels now hold a different value.
    Applied { levels_changed: usize },
    /// Batch nonce was not newer than the book; nothing changed.
    Stale { book_nonce: u64 },
    /// No baseline snapshot for the market yet; batch dropped.
    UnknownMarket,
}

/// Apply one batch atomically.
///
/// `Upsert` inserts or replaces a level, `Remove` (or a zero quantity)
/// erases it. Removing a level that does not exist means an earlier update
/// was missed and is reported as a fault instead of being ignored.
pub fn apply_delta_batch(
    book: &mut OrderBookState,
    batch: &DeltaBatch,
) -> Result<DeltaOutcome, ConsistencyFault> {
    if batch.nonce <= book.nonce() {
        debug!(
            market = %batch.market,
            nonce = batch.nonce,
            book_nonce = book.nonce(),
            "Dropping stale delta batch"
        );
        return Ok(DeltaOutcome::Stale {
            book_nonce: book.nonce(),
        });
    }

    let staged = stage(book, batch)?;

    let mut levels_changed = 0;
    for ((side, price), quantity) in staged {
        let previous = book.set_level(side, price, quantity.unwrap_or(Quantity::ZERO));
        if previous != quantity {
            levels_changed += 1;
        }
    }
    book.advance(batch.nonce, batch.captured_at);

    debug!(
        market = %batch.market,
        nonce = batch.nonce,
        entries = batch.entries.len(),
        levels_changed,
        "Delta batch applied"
    );

    Ok(DeltaOutcome::Applied { levels_changed })
}

/// Staged level values keyed by side and price; `None` marks a removal.
type Overlay = BTreeMap<(Side, Price), Option<Quantity>>;

fn stage(book: &OrderBookState, batch: &DeltaBatch) -> Result<Overlay, ConsistencyFault> {
    let mut overlay = Overlay::new();

    for entry in &batch.entries {
        let key = (entry.side, entry.price);
        if entry.is_removal() {
            let current = match overlay.get(&key) {
                Some(staged) => *staged,
                None => book.quantity_at(entry.side, entry.price),
            };
            if current.is_none() {
                return Err(ConsistencyFault::RemovalOfAbsentLevel {
                    nonce: batch.nonce,
                    side: entry.side,
                    price: entry.price,
                });
            }
            overlay.insert(key, None);
        } else {
            overlay.insert(key, Some(entry.quantity));
        }
    }

    Ok(overlay)
}
