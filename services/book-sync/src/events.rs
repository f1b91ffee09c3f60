//! Decoded record definitions for the book-sync core
//!
//! The classifier turns raw feed messages into these types; everything
//! downstream (snapshot loader, delta applier, store, replay) only ever sees
//! them. Each record carries the exchange nonce it was published at.

use serde::{Deserialize, Serialize};
use types::ids::MarketId;
use types::numeric::{Price, Quantity};
use types::order::Side;

use crate::order_book::PriceLevel;

/// Operation carried by a single delta entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeltaOp {
    /// Insert or replace the quantity at a price.
    Upsert,
    /// Erase the price level.
    Remove,
}

/// One incremental change to a single price level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaEntry {
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub op: DeltaOp,
}

impl DeltaEntry {
    pub fn upsert(side: Side, price: Price, quantity: Quantity) -> Self {
        Self {
            side,
            price,
            quantity,
            op: DeltaOp::Upsert,
        }
    }

    pub fn remove(side: Side, price: Price) -> Self {
        Self {
            side,
            price,
            quantity: Quantity::ZERO,
            op: DeltaOp::Remove,
        }
    }

    /// Build an entry from a bare price/quantity pair where zero means removal.
    pub fn from_level(side: Side, price: Price, quantity: Quantity) -> Self {
        if quantity.is_zero() {
            Self::remove(side, price)
        } else {
            Self::upsert(side, price, quantity)
        }
    }

    /// Whether applying this entry erases its price level.
    pub fn is_removal(&self) -> bool {
        self.op == DeltaOp::Remove || self.quantity.is_zero()
    }
}

/// All entries published by the exchange under one nonce for one market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaBatch {
    pub market: MarketId,
    pub nonce: u64,
    pub entries: Vec<DeltaEntry>,
    /// Unix nanoseconds at which the message was captured, if known.
    pub captured_at: Option<i64>,
}

impl DeltaBatch {
    pub fn new(market: MarketId, nonce: u64, entries: Vec<DeltaEntry>) -> Self {
        Self {
            market,
            nonce,
            entries,
            captured_at: None,
        }
    }

    pub fn with_captured_at(mut self, captured_at: i64) -> Self {
        self.captured_at = Some(captured_at);
        self
    }
}

/// A full view of both sides of a market at one nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub market: MarketId,
    pub nonce: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    /// Unix nanoseconds at which the snapshot was captured, if known.
    pub captured_at: Option<i64>,
}

impl SnapshotRecord {
    pub fn new(market: MarketId, nonce: u64, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> Self {
        Self {
            market,
            nonce,
            bids,
            asks,
            captured_at: None,
        }
    }

    pub fn with_captured_at(mut self, captured_at: i64) -> Self {
        self.captured_at = Some(captured_at);
        self
    }
}

/// A captured record as seen by the offline replay engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HistoryRecord {
    Snapshot(SnapshotRecord),
    Delta(DeltaBatch),
}

impl HistoryRecord {
    pub fn market(&self) -> &MarketId {
        match self {
            HistoryRecord::Snapshot(s) => &s.market,
            HistoryRecord::Delta(d) => &d.market,
        }
    }

    pub fn nonce(&self) -> u64 {
        match self {
            HistoryRecord::Snapshot(s) => s.nonce,
            HistoryRecord::Delta(d) => d.nonce,
        }
    }

    pub fn captured_at(&self) -> Option<i64> {
        match self {
            HistoryRecord::Snapshot(s) => s.captured_at,
            HistoryRecord::Delta(d) => d.captured_at,
        }
    }

    /// Record kind as a string label for logging.
    pub fn kind_label(&self) -> &'static str {
        match self {
            HistoryRecord::Snapshot(_) => "Snapshot",
            HistoryRecord::Delta(_) => "Delta",
        }
    }
}

impl From<SnapshotRecord> for HistoryRecord {
    fn from(record: SnapshotRecord) -> Self {
        HistoryRecord::Snapshot(record)
    }
}

impl From<DeltaBatch> for HistoryRecord {
    fn from(batch: DeltaBatch) -> Self {
        HistoryRecord::Delta(batch)
    }
}
