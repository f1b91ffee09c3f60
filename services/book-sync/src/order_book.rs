//! Materialized order book state for a single market
//!
//! One `BTreeMap` per side keyed by exact `Price`, so iteration is always
//! sorted and deterministic. A side never stores a zero quantity: zero means
//! the level does not exist.
//!
//! Mutation is crate-private. Outside code reads a book through the store's
//! `get`, which hands out an owned copy.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use types::ids::MarketId;
use types::numeric::{Price, Quantity};
use types::order::Side;

/// A single price level: price and the total quantity resting at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    pub quantity: Quantity,
}

impl PriceLevel {
    pub fn new(price: Price, quantity: Quantity) -> Self {
        Self { price, quantity }
    }
}

/// Direction for sorted views of a side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Reconstructed book for one market.
///
/// Bids and asks are stored ascending; `bid_levels` reverses for best-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredBook")]
pub struct OrderBookState {
    /// Market this book belongs to.
    pub market: MarketId,
    bids: BTreeMap<Price, Quantity>,
    asks: BTreeMap<Price, Quantity>,
    /// Nonce of the last accepted record.
    nonce: u64,
    /// Unix nanoseconds of the last accepted record, if the feed provided it.
    captured_at: Option<i64>,
}

/// Serialized form of a book, rebuilt through `set_level` on load so that
/// zero-quantity entries never reach the maps.
#[derive(Deserialize)]
struct StoredBook {
    market: MarketId,
    bids: BTreeMap<Price, Quantity>,
    asks: BTreeMap<Price, Quantity>,
    nonce: u64,
    captured_at: Option<i64>,
}

impl From<StoredBook> for OrderBookState {
    fn from(stored: StoredBook) -> Self {
        let level = |(price, quantity): (Price, Quantity)| PriceLevel::new(price, quantity);
        Self::from_levels(
            stored.market,
            stored.nonce,
            stored.bids.into_iter().map(level),
            stored.asks.into_iter().map(level),
        )
        .with_captured_at(stored.captured_at)
    }
}

impl OrderBookState {
    /// Create an empty book at the given nonce.
    pub fn new(market: MarketId, nonce: u64) -> Self {
        Self {
            market,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            nonce,
            captured_at: None,
        }
    }

    /// Build a book from level lists. Zero-quantity levels are dropped and
    /// a repeated price keeps its last quantity.
    pub fn from_levels<B, A>(market: MarketId, nonce: u64, bids: B, asks: A) -> Self
    where
        B: IntoIterator<Item = PriceLevel>,
        A: IntoIterator<Item = PriceLevel>,
    {
        let mut book = Self::new(market, nonce);
        for level in bids {
            book.set_level(Side::Bid, level.price, level.quantity);
        }
        for level in asks {
            book.set_level(Side::Ask, level.price, level.quantity);
        }
        book
    }

    pub fn with_captured_at(mut self, captured_at: Option<i64>) -> Self {
        self.captured_at = captured_at;
        self
    }

    /// Nonce of the last accepted record.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn captured_at(&self) -> Option<i64> {
        self.captured_at
    }

    /// Raw price → quantity map for one side (ascending).
    pub fn side(&self, side: Side) -> &BTreeMap<Price, Quantity> {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    /// Quantity resting at a price, if the level exists.
    pub fn quantity_at(&self, side: Side, price: Price) -> Option<Quantity> {
        self.side(side).get(&price).copied()
    }

    /// Set a level, erasing it when the quantity is zero.
    /// Returns the previous quantity.
    pub(crate) fn set_level(&mut self, side: Side, price: Price, quantity: Quantity) -> Option<Quantity> {
        let levels = match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        if quantity.is_zero() {
            levels.remove(&price)
        } else {
            levels.insert(price, quantity)
        }
    }

    /// Move the book forward to a newer nonce. Never moves it backwards.
    pub(crate) fn advance(&mut self, nonce: u64, captured_at: Option<i64>) {
        if nonce > self.nonce {
            self.nonce = nonce;
        }
        if captured_at.is_some() {
            self.captured_at = captured_at;
        }
    }

    /// Same levels and nonce, ignoring capture time.
    pub fn same_book(&self, other: &OrderBookState) -> bool {
        self.nonce == other.nonce && self.same_levels(other)
    }

    /// Same levels on both sides, ignoring nonce and capture time.
    pub fn same_levels(&self, other: &OrderBookState) -> bool {
        self.bids == other.bids && self.asks == other.asks
    }

    /// Best (highest) bid.
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(p, q)| PriceLevel::new(*p, *q))
    }

    /// Best (lowest) ask.
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.iter().next().map(|(p, q)| PriceLevel::new(*p, *q))
    }

    /// Mid-market price (average of best bid and best ask).
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => {
                let (bid, ask) = (bid.price.as_decimal(), ask.price.as_decimal());
                let two = Decimal::from(2);
                // Halve first when the sum does not fit
                match bid.checked_add(ask) {
                    Some(sum) => sum.checked_div(two),
                    None => (bid / two).checked_add(ask / two),
                }
            }
            _ => None,
        }
    }

    /// Spread between best ask and best bid.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price.as_decimal() - bid.price.as_decimal()),
            _ => None,
        }
    }

    /// Sum of all resting quantity on one side.
    ///
    /// `None` if the sum does not fit in a `Decimal`.
    pub fn total_quantity(&self, side: Side) -> Option<Decimal> {
        self.side(side)
            .values()
            .try_fold(Decimal::ZERO, |total, q| total.checked_add(q.as_decimal()))
    }

    /// Sorted price/quantity pairs for one side.
    pub fn sorted_levels(&self, side: Side, order: SortOrder) -> Vec<PriceLevel> {
        let levels = self.side(side).iter().map(|(p, q)| PriceLevel::new(*p, *q));
        match order {
            SortOrder::Ascending => levels.collect(),
            SortOrder::Descending => levels.rev().collect(),
        }
    }

    pub fn sorted_bids(&self, order: SortOrder) -> Vec<PriceLevel> {
        self.sorted_levels(Side::Bid, order)
    }

    pub fn sorted_asks(&self, order: SortOrder) -> Vec<PriceLevel> {
        self.sorted_levels(Side::Ask, order)
    }

    /// All bid levels, best (highest) first.
    pub fn bid_levels(&self) -> Vec<PriceLevel> {
        self.sorted_levels(Side::Bid, SortOrder::Descending)
    }

    /// All ask levels, best (lowest) first.
    pub fn ask_levels(&self) -> Vec<PriceLevel> {
        self.sorted_levels(Side::Ask, SortOrder::Ascending)
    }

    /// Number of bid price levels.
    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    /// Number of ask price levels.
    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    /// Top-of-book view with at most `max_levels` per side.
    pub fn depth_snapshot(&self, max_levels: usize) -> DepthSnapshot {
        DepthSnapshot {
            market: self.market.clone(),
            bids: self.bid_levels().into_iter().take(max_levels).collect(),
            asks: self.ask_levels().into_iter().take(max_levels).collect(),
            nonce: self.nonce,
        }
    }

    /// SHA-256 over the normalized levels and nonce.
    ///
    /// Two books with the same levels and nonce always hash identically,
    /// whatever the scale their prices were written with.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.market.as_str().as_bytes());
        hasher.update(b"|");

        for (price, quantity) in &self.bids {
            hasher.update(price.to_string().as_bytes());
            hasher.update(b":");
            hasher.update(quantity.to_string().as_bytes());
            hasher.update(b",");
        }
        hasher.update(b"---");

        for (price, quantity) in &self.asks {
            hasher.update(price.to_string().as_bytes());
            hasher.update(b":");
            hasher.update(quantity.to_string().as_bytes());
            hasher.update(b",");
        }
        hasher.update(b"---");

        hasher.update(self.nonce.to_le_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// Top-of-book levels at a nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub market: MarketId,
    /// Bids in descending price order (best first).
    pub bids: Vec<PriceLevel>,
    /// Asks in ascending price order (best first).
    pub asks: Vec<PriceLevel>,
    pub nonce: u64,
}
