//! Concurrent per-market book store
//!
//! Owns one slot per market. The market map is a `DashMap` so lookups for
//! different markets never contend; each slot sits behind its own mutex so
//! records for one market are applied one at a time. The map shard lock is
//! released before a slot is locked.
//!
//! A consistency fault halts its market: the slot keeps the last good book
//! for inspection, and every later record for that market is rejected with
//! `SyncError::MarketHalted`. Other markets keep running.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use types::ids::MarketId;

use crate::classifier::{classify, Classified, IgnoreReason};
use crate::config::SyncConfig;
use crate::delta::{self, DeltaOutcome};
use crate::error::{ConsistencyFault, SyncError};
use crate::events::{DeltaBatch, SnapshotRecord};
use crate::metrics::SyncMetrics;
use crate::order_book::OrderBookState;
use crate::snapshot::{self, SnapshotOutcome};

/// Lifecycle of a market inside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketStatus {
    /// No baseline snapshot yet.
    Uninitialized,
    Synced,
    /// Stopped after a consistency fault.
    Halted,
}

/// What processing one record did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestReport {
    Snapshot {
        market: MarketId,
        outcome: SnapshotOutcome,
    },
    Deltas(Vec<(MarketId, DeltaOutcome)>),
    Ignored(IgnoreReason),
    /// Line was not valid JSON; skipped.
    DecodeFailure,
}

#[derive(Debug, Default)]
struct MarketSlot {
    state: Option<OrderBookState>,
    fault: Option<ConsistencyFault>,
}

type SharedSlot = Arc<Mutex<MarketSlot>>;

/// Map of market → reconstructed book, safe to share across threads.
pub struct BookStore {
    markets: DashMap<MarketId, SharedSlot>,
    config: SyncConfig,
    metrics: SyncMetrics,
}

impl BookStore {
    pub fn new(config: SyncConfig) -> Self {
        info!(
            snapshot_query = %config.snapshot_query,
            delta_method = %config.delta_method,
            initial_capacity = config.initial_capacity,
            "BookStore initialized"
        );

        Self {
            markets: DashMap::with_capacity(config.initial_capacity),
            metrics: SyncMetrics::new(config.latency_window),
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    /// Copy of the current book for a market, if it has a baseline.
    ///
    /// A halted market still returns its last good book.
    pub fn get(&self, market: &MarketId) -> Option<OrderBookState> {
        let slot = self.slot(market)?;
        let guard = lock(&slot);
        guard.state.clone()
    }

    pub fn status(&self, market: &MarketId) -> MarketStatus {
        let Some(slot) = self.slot(market) else {
            return MarketStatus::Uninitialized;
        };
        let guard = lock(&slot);
        match (&guard.fault, &guard.state) {
            (Some(_), _) => MarketStatus::Halted,
            (None, Some(_)) => MarketStatus::Synced,
            (None, None) => MarketStatus::Uninitialized,
        }
    }

    /// The fault that halted a market.
    pub fn fault(&self, market: &MarketId) -> Option<ConsistencyFault> {
        let slot = self.slot(market)?;
        let guard = lock(&slot);
        guard.fault.clone()
    }

    /// Known markets in sorted order.
    pub fn markets(&self) -> Vec<MarketId> {
        let mut markets: Vec<MarketId> = self.markets.iter().map(|e| e.key().clone()).collect();
        markets.sort();
        markets
    }

    pub fn halted_markets(&self) -> Vec<MarketId> {
        self.markets()
            .into_iter()
            .filter(|m| self.status(m) == MarketStatus::Halted)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    /// Offer a snapshot to its market, creating the book on first sight.
    pub fn load_snapshot(&self, record: &SnapshotRecord) -> Result<SnapshotOutcome, SyncError> {
        let slot = self
            .markets
            .entry(record.market.clone())
            .or_default()
            .value()
            .clone();
        let mut guard = lock(&slot);
        self.ensure_running(&guard, &record.market)?;

        match snapshot::load_snapshot(&mut guard.state, record) {
            Ok(outcome) => {
                let counter = match outcome {
                    SnapshotOutcome::Created => &self.metrics.snapshots_created,
                    SnapshotOutcome::Stale { .. } => &self.metrics.snapshots_stale,
                    SnapshotOutcome::Verified { .. } => &self.metrics.snapshots_verified,
                };
                SyncMetrics::bump(counter);
                Ok(outcome)
            }
            Err(fault) => Err(self.halt(&mut guard, &record.market, fault)),
        }
    }

    /// Apply a delta batch to its market.
    ///
    /// Batches for markets without a baseline are dropped as
    /// `DeltaOutcome::UnknownMarket`; they never create a market.
    pub fn apply_delta_batch(&self, batch: &DeltaBatch) -> Result<DeltaOutcome, SyncError> {
        let Some(slot) = self.slot(&batch.market) else {
            return Ok(self.unknown_market(batch));
        };
        let mut guard = lock(&slot);
        self.ensure_running(&guard, &batch.market)?;

        let Some(book) = guard.state.as_mut() else {
            return Ok(self.unknown_market(batch));
        };

        match delta::apply_delta_batch(book, batch) {
            Ok(outcome) => {
                match outcome {
                    DeltaOutcome::Applied { .. } => SyncMetrics::bump(&self.metrics.deltas_applied),
                    DeltaOutcome::Stale { .. } => SyncMetrics::bump(&self.metrics.deltas_stale),
                    DeltaOutcome::UnknownMarket => {
                        SyncMetrics::bump(&self.metrics.deltas_unknown_market)
                    }
                }
                Ok(outcome)
            }
            Err(fault) => Err(self.halt(&mut guard, &batch.market, fault)),
        }
    }

    /// Route a classified record.
    ///
    /// Every batch of a multi-market message is offered to its market; if
    /// any of them fail, the first error is returned after the rest have
    /// been processed.
    pub fn ingest(&self, classified: Classified) -> Result<IngestReport, SyncError> {
        match classified {
            Classified::Snapshot(record) => {
                let outcome = self.load_snapshot(&record)?;
                Ok(IngestReport::Snapshot {
                    market: record.market,
                    outcome,
                })
            }
            Classified::Deltas(batches) => {
                let mut outcomes = Vec::with_capacity(batches.len());
                let mut first_error = None;
                for batch in batches {
                    match self.apply_delta_batch(&batch) {
                        Ok(outcome) => outcomes.push((batch.market, outcome)),
                        Err(err) => {
                            first_error.get_or_insert(err);
                        }
                    }
                }
                match first_error {
                    Some(err) => Err(err),
                    None => Ok(IngestReport::Deltas(outcomes)),
                }
            }
            Classified::Ignorable(reason) => {
                SyncMetrics::bump(&self.metrics.records_ignored);
                debug!(reason = %reason, "Ignoring record");
                Ok(IngestReport::Ignored(reason))
            }
        }
    }

    /// Classify and apply one decoded record.
    pub fn process_record(&self, record: &Value) -> Result<IngestReport, SyncError> {
        let start = Instant::now();
        let result = self.ingest(classify(record, &self.config));
        let latency_ns = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);

        let total = self.metrics.record_processed(latency_ns);
        let interval = self.config.progress_log_interval;
        if interval > 0 && total % interval == 0 {
            info!(
                records = total,
                markets = self.len(),
                ignored = SyncMetrics::get(&self.metrics.records_ignored),
                faults = SyncMetrics::get(&self.metrics.consistency_faults),
                p99_ns = self.metrics.latency_percentile(99).unwrap_or(0),
                "Processing progress"
            );
        }

        result
    }

    /// Decode and process one line of captured JSON. Undecodable lines
    /// are counted and skipped.
    pub fn process_line(&self, line: &str) -> Result<IngestReport, SyncError> {
        let line = line.trim();
        if line.is_empty() {
            // Counted like any other shapeless record
            return self.process_record(&Value::Null);
        }
        match serde_json::from_str::<Value>(line) {
            Ok(record) => self.process_record(&record),
            Err(err) => {
                self.record_decode_failure(&err);
                Ok(IngestReport::DecodeFailure)
            }
        }
    }

    /// Count a record that could not be decoded upstream.
    pub fn record_decode_failure(&self, err: &dyn std::fmt::Display) {
        SyncMetrics::bump(&self.metrics.decode_failures);
        warn!(error = %err, "Skipping undecodable record");
    }

    fn slot(&self, market: &MarketId) -> Option<SharedSlot> {
        self.markets.get(market).map(|entry| entry.value().clone())
    }

    fn ensure_running(&self, slot: &MarketSlot, market: &MarketId) -> Result<(), SyncError> {
        if slot.fault.is_some() {
            SyncMetrics::bump(&self.metrics.records_rejected_halted);
            return Err(SyncError::MarketHalted {
                market: market.clone(),
            });
        }
        Ok(())
    }

    fn unknown_market(&self, batch: &DeltaBatch) -> DeltaOutcome {
        SyncMetrics::bump(&self.metrics.deltas_unknown_market);
        warn!(
            market = %batch.market,
            nonce = batch.nonce,
            "Dropping delta batch for market without snapshot"
        );
        DeltaOutcome::UnknownMarket
    }

    fn halt(&self, slot: &mut MarketSlot, market: &MarketId, fault: ConsistencyFault) -> SyncError {
        SyncMetrics::bump(&self.metrics.consistency_faults);
        error!(
            market = %market,
            book_nonce = slot.state.as_ref().map(OrderBookState::nonce).unwrap_or(0),
            report = %fault.report(),
            "Consistency fault, halting market"
        );
        slot.fault = Some(fault.clone());
        SyncError::ConsistencyFault {
            market: market.clone(),
            fault,
        }
    }
}

impl Default for BookStore {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

fn lock(slot: &SharedSlot) -> MutexGuard<'_, MarketSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
