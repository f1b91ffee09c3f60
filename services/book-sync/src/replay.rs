//! Offline replay and verification
//!
//! Rebuilds one market's book from a baseline snapshot and a captured
//! history, using the same snapshot and delta rules as the live store.
//! Used to check a capture: replay from the earliest snapshot up to a later
//! one and diff the result against it.
//!
//! Replay rules:
//! - History is stably sorted by nonce (ties keep capture order)
//! - Records for other markets are skipped
//! - Records past the target nonce are not applied
//! - Any consistency fault aborts the replay

use std::time::Instant;

use rust_decimal::Decimal;
use tracing::{error, info};
use types::ids::MarketId;
use types::numeric::Price;
use types::order::Side;

use crate::delta::{apply_delta_batch, DeltaOutcome};
use crate::diff::{diff, BookDiff};
use crate::error::ConsistencyFault;
use crate::events::{HistoryRecord, SnapshotRecord};
use crate::order_book::OrderBookState;
use crate::snapshot::{book_from_snapshot, verify_snapshot, SnapshotOutcome};

/// Counters collected during a replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records for this market up to the target.
    pub records_replayed: u64,
    pub deltas_applied: u64,
    pub deltas_stale: u64,
    pub snapshots_verified: u64,
    pub snapshots_stale: u64,
    pub records_other_markets: u64,
    pub records_beyond_target: u64,
}

/// Result of a successful replay.
#[derive(Debug, Clone)]
pub struct ReplayResult {
    pub state: OrderBookState,
    pub stats: ReplayStats,
    pub state_checksum: String,
    pub duration_ms: u128,
}

/// Reconstructed book compared with a reference snapshot.
#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub market: MarketId,
    pub reference_nonce: u64,
    pub replayed_nonce: u64,
    /// Replayed book (before) versus reference (after).
    pub diff: BookDiff,
    pub stats: ReplayStats,
}

impl VerificationReport {
    pub fn is_match(&self) -> bool {
        self.diff.is_empty()
    }
}

/// Top-of-book and volume summary after one replay step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSummary {
    pub nonce: u64,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    /// `None` when the side's total does not fit in a `Decimal`.
    pub bid_volume: Option<Decimal>,
    pub ask_volume: Option<Decimal>,
}

impl BookSummary {
    pub fn from_book(book: &OrderBookState) -> Self {
        Self {
            nonce: book.nonce(),
            best_bid: book.best_bid().map(|l| l.price),
            best_ask: book.best_ask().map(|l| l.price),
            bid_volume: book.total_quantity(Side::Bid),
            ask_volume: book.total_quantity(Side::Ask),
        }
    }
}

impl std::fmt::Display for BookSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |p: Option<Price>| p.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
        let volume = |v: Option<Decimal>| {
            v.map(|v| v.normalize().to_string())
                .unwrap_or_else(|| "overflow".to_string())
        };
        write!(
            f,
            "nonce={} best_bid={} best_ask={} bid_volume={} ask_volume={}",
            self.nonce,
            show(self.best_bid),
            show(self.best_ask),
            volume(self.bid_volume),
            volume(self.ask_volume)
        )
    }
}

/// Errors during replay.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    #[error("snapshot belongs to market {actual}, replaying {expected}")]
    MarketMismatch { expected: MarketId, actual: MarketId },

    #[error("target nonce {target} is before baseline nonce {baseline}")]
    TargetBeforeBaseline { target: u64, baseline: u64 },

    #[error("consistency fault at nonce {nonce}: {fault}")]
    Fault { nonce: u64, fault: ConsistencyFault },
}

/// Replays one market's history from a baseline snapshot.
///
/// Deterministic: the same baseline and history always produce the same
/// book and checksum.
#[derive(Debug, Clone)]
pub struct ReplayEngine {
    market: MarketId,
    target_nonce: Option<u64>,
}

impl ReplayEngine {
    pub fn new(market: MarketId) -> Self {
        Self {
            market,
            target_nonce: None,
        }
    }

    /// Stop after the last record at or below `nonce`.
    pub fn with_target_nonce(mut self, nonce: u64) -> Self {
        self.target_nonce = Some(nonce);
        self
    }

    pub fn market(&self) -> &MarketId {
        &self.market
    }

    /// Rebuild the book from `initial` and `history`.
    pub fn replay(
        &self,
        initial: &SnapshotRecord,
        history: &[HistoryRecord],
    ) -> Result<ReplayResult, ReplayError> {
        let start = Instant::now();

        info!(
            market = %self.market,
            baseline_nonce = initial.nonce,
            target_nonce = ?self.target_nonce,
            record_count = history.len(),
            "Starting replay"
        );

        let (state, stats) = self.run(initial, history.iter(), |_| {})?;

        let duration_ms = start.elapsed().as_millis();
        let state_checksum = state.checksum();

        info!(
            market = %self.market,
            nonce = state.nonce(),
            records_replayed = stats.records_replayed,
            deltas_applied = stats.deltas_applied,
            duration_ms,
            checksum = %state_checksum,
            "Replay completed"
        );

        Ok(ReplayResult {
            state,
            stats,
            state_checksum,
            duration_ms,
        })
    }

    /// Replay up to `reference.nonce` and diff the result against it.
    ///
    /// Copies of the reference inside `history` are skipped, so the
    /// comparison is reported instead of raised as a fault.
    pub fn verify(
        &self,
        initial: &SnapshotRecord,
        history: &[HistoryRecord],
        reference: &SnapshotRecord,
    ) -> Result<VerificationReport, ReplayError> {
        self.check_market(&reference.market)?;

        let engine = self.clone().with_target_nonce(reference.nonce);
        let records = history.iter().filter(|record| match record {
            HistoryRecord::Snapshot(snapshot) => snapshot != reference,
            HistoryRecord::Delta(_) => true,
        });
        let (state, stats) = engine.run(initial, records, |_| {})?;

        let report = VerificationReport {
            market: self.market.clone(),
            reference_nonce: reference.nonce,
            replayed_nonce: state.nonce(),
            diff: diff(&state, &book_from_snapshot(reference)),
            stats,
        };

        if report.is_match() {
            info!(
                market = %self.market,
                reference_nonce = report.reference_nonce,
                "Replayed book matches reference snapshot"
            );
        } else {
            error!(
                market = %self.market,
                reference_nonce = report.reference_nonce,
                replayed_nonce = report.replayed_nonce,
                report = %report.diff.report(),
                "Replayed book differs from reference snapshot"
            );
        }

        Ok(report)
    }

    /// Summary of the baseline and of the book after every applied record.
    pub fn steps(
        &self,
        initial: &SnapshotRecord,
        history: &[HistoryRecord],
    ) -> Result<Vec<BookSummary>, ReplayError> {
        let mut summaries = Vec::new();
        self.run(initial, history.iter(), |book| {
            summaries.push(BookSummary::from_book(book))
        })?;
        Ok(summaries)
    }

    /// Lowest-nonce snapshot of this market captured strictly inside the
    /// window. Either bound may be open; snapshots without a capture time
    /// only qualify when both are.
    pub fn earliest_snapshot<'a>(
        &self,
        history: &'a [HistoryRecord],
        after: Option<i64>,
        before: Option<i64>,
    ) -> Option<&'a SnapshotRecord> {
        self.snapshots_in_window(history, after, before)
            .min_by_key(|snapshot| snapshot.nonce)
    }

    /// Highest-nonce snapshot of this market.
    pub fn latest_snapshot<'a>(&self, history: &'a [HistoryRecord]) -> Option<&'a SnapshotRecord> {
        self.snapshots_in_window(history, None, None)
            .max_by_key(|snapshot| snapshot.nonce)
    }

    /// Replay from the earliest snapshot and verify against the latest.
    /// `None` when the history holds fewer than two distinct snapshot nonces.
    pub fn audit_latest(
        &self,
        history: &[HistoryRecord],
    ) -> Result<Option<VerificationReport>, ReplayError> {
        let (Some(initial), Some(reference)) =
            (self.earliest_snapshot(history, None, None), self.latest_snapshot(history))
        else {
            return Ok(None);
        };
        if initial.nonce == reference.nonce {
            return Ok(None);
        }
        self.verify(initial, history, reference).map(Some)
    }

    fn snapshots_in_window<'a>(
        &self,
        history: &'a [HistoryRecord],
        after: Option<i64>,
        before: Option<i64>,
    ) -> impl Iterator<Item = &'a SnapshotRecord> + 'a {
        let market = self.market.clone();
        history.iter().filter_map(move |record| match record {
            HistoryRecord::Snapshot(snapshot)
                if snapshot.market == market
                    && in_window(snapshot.captured_at, after, before) =>
            {
                Some(snapshot)
            }
            _ => None,
        })
    }

    fn check_market(&self, market: &MarketId) -> Result<(), ReplayError> {
        if *market != self.market {
            return Err(ReplayError::MarketMismatch {
                expected: self.market.clone(),
                actual: market.clone(),
            });
        }
        Ok(())
    }

    fn run<'a, I, F>(
        &self,
        initial: &SnapshotRecord,
        records: I,
        mut on_step: F,
    ) -> Result<(OrderBookState, ReplayStats), ReplayError>
    where
        I: Iterator<Item = &'a HistoryRecord>,
        F: FnMut(&OrderBookState),
    {
        self.check_market(&initial.market)?;
        if let Some(target) = self.target_nonce {
            if target < initial.nonce {
                return Err(ReplayError::TargetBeforeBaseline {
                    target,
                    baseline: initial.nonce,
                });
            }
        }

        let mut stats = ReplayStats::default();
        let mut ordered: Vec<&HistoryRecord> = Vec::new();
        for record in records {
            if *record.market() == self.market {
                ordered.push(record);
            } else {
                stats.records_other_markets += 1;
            }
        }
        ordered.sort_by_key(|record| record.nonce());

        let mut book = book_from_snapshot(initial);
        on_step(&book);

        for record in ordered {
            if self.target_nonce.is_some_and(|target| record.nonce() > target) {
                stats.records_beyond_target += 1;
                continue;
            }
            stats.records_replayed += 1;

            let applied = match record {
                HistoryRecord::Snapshot(snapshot) => {
                    match verify_snapshot(&mut book, snapshot).map_err(|f| fault(record, f))? {
                        SnapshotOutcome::Stale { .. } => {
                            stats.snapshots_stale += 1;
                            false
                        }
                        SnapshotOutcome::Verified { advanced } => {
                            stats.snapshots_verified += 1;
                            advanced
                        }
                        SnapshotOutcome::Created => true,
                    }
                }
                HistoryRecord::Delta(batch) => {
                    match apply_delta_batch(&mut book, batch).map_err(|f| fault(record, f))? {
                        DeltaOutcome::Applied { .. } => {
                            stats.deltas_applied += 1;
                            true
                        }
                        _ => {
                            stats.deltas_stale += 1;
                            false
                        }
                    }
                }
            };

            if applied {
                on_step(&book);
            }
        }

        Ok((book, stats))
    }
}

fn fault(record: &HistoryRecord, fault: ConsistencyFault) -> ReplayError {
    error!(
        market = %record.market(),
        nonce = record.nonce(),
        kind = record.kind_label(),
        report = %fault.report(),
        "Consistency fault during replay"
    );
    ReplayError::Fault {
        nonce: record.nonce(),
        fault,
    }
}

fn in_window(captured_at: Option<i64>, after: Option<i64>, before: Option<i64>) -> bool {
    match captured_at {
        Some(t) => after.map_or(true, |a| t > a) && before.map_or(true, |b| t < b),
        None => after.is_none() && before.is_none(),
    }
}
