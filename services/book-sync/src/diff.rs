//! Level-by-level comparison of two books
//!
//! Used for live consistency-fault reports and for offline audits. A diff
//! only lists levels whose quantity differs (a missing level counts as
//! "no value"); identical books produce an empty diff.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use types::numeric::{Price, Quantity};
use types::order::Side;

use crate::order_book::OrderBookState;

/// One differing price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LevelChange {
    pub side: Side,
    pub price: Price,
    /// Quantity in the first book (`None` = level absent).
    pub before: Option<Quantity>,
    /// Quantity in the second book (`None` = level absent).
    pub after: Option<Quantity>,
}

impl LevelChange {
    pub fn is_added(&self) -> bool {
        self.before.is_none() && self.after.is_some()
    }

    pub fn is_removed(&self) -> bool {
        self.before.is_some() && self.after.is_none()
    }

    pub fn is_changed(&self) -> bool {
        self.before.is_some() && self.after.is_some()
    }
}

impl fmt::Display for LevelChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {} -> {}",
            self.side,
            self.price,
            display_quantity(self.before),
            display_quantity(self.after)
        )
    }
}

fn display_quantity(quantity: Option<Quantity>) -> String {
    quantity.map_or_else(|| "no value".to_string(), |q| q.to_string())
}

/// Ordered list of differing levels: bids first, then asks, each by price
/// ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookDiff {
    changes: Vec<LevelChange>,
}

impl BookDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn changes(&self) -> &[LevelChange] {
        &self.changes
    }

    pub fn added(&self) -> impl Iterator<Item = &LevelChange> {
        self.changes.iter().filter(|c| c.is_added())
    }

    pub fn removed(&self) -> impl Iterator<Item = &LevelChange> {
        self.changes.iter().filter(|c| c.is_removed())
    }

    pub fn changed(&self) -> impl Iterator<Item = &LevelChange> {
        self.changes.iter().filter(|c| c.is_changed())
    }

    /// `(price, before, after)` triples for one side.
    pub fn side_triples(&self, side: Side) -> Vec<(Price, Option<Quantity>, Option<Quantity>)> {
        self.changes
            .iter()
            .filter(|c| c.side == side)
            .map(|c| (c.price, c.before, c.after))
            .collect()
    }

    /// Human-readable report, one line per level.
    pub fn report(&self) -> String {
        if self.changes.is_empty() {
            return "No changes".to_string();
        }
        self.changes
            .iter()
            .map(LevelChange::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for BookDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.report())
    }
}

/// Compare two books level by level over both sides.
pub fn diff(before: &OrderBookState, after: &OrderBookState) -> BookDiff {
    let mut changes = Vec::new();
    for side in [Side::Bid, Side::Ask] {
        diff_side(side, before.side(side), after.side(side), &mut changes);
    }
    changes.sort();
    BookDiff { changes }
}

fn diff_side(
    side: Side,
    before: &BTreeMap<Price, Quantity>,
    after: &BTreeMap<Price, Quantity>,
    out: &mut Vec<LevelChange>,
) {
    // Levels that existed before (changed or removed)
    for (&price, &old_qty) in before {
        let new_qty = after.get(&price).copied();
        if new_qty != Some(old_qty) {
            out.push(LevelChange {
                side,
                price,
                before: Some(old_qty),
                after: new_qty,
            });
        }
    }

    // Levels that are new
    for (&price, &new_qty) in after {
        if !before.contains_key(&price) {
            out.push(LevelChange {
                side,
                price,
                before: None,
                after: Some(new_qty),
            });
        }
    }
}
