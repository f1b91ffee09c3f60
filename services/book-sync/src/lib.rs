//! Order Book Reconciliation Core
//!
//! Rebuilds per-market limit order books from an exchange feed that mixes
//! full snapshots with nonce-stamped incremental deltas, and proves the
//! result correct:
//! - Message classification into snapshots, delta batches or ignorables
//! - Snapshot loading (first one is the baseline, later ones verify)
//! - Atomic, nonce-gated delta application
//! - A concurrent per-market book store that halts a market on any fault
//! - Offline replay of a capture and verification against a snapshot
//!
//! # Architecture
//!
//! ```text
//! Raw JSON records
//!        │
//!  ┌─────▼──────┐
//!  │ Classifier │  ← shape decode, Ignorable for anything unknown
//!  └─────┬──────┘
//!        │
//!   ┌────┴──────────┐
//!   │               │
//! ┌─▼────────┐  ┌───▼─────┐
//! │ Snapshot │  │ Delta   │
//! │ Loader   │  │ Applier │
//! └─┬────────┘  └───┬─────┘
//!   │               │
//! ┌─▼───────────────▼─┐      ┌──────────────┐
//! │    Book Store     │      │ Replay /     │
//! │ (per-market lock) │      │ Verification │
//! └───────────────────┘      └──────────────┘
//! ```

pub mod classifier;
pub mod config;
pub mod delta;
pub mod diff;
pub mod error;
pub mod events;
pub mod metrics;
pub mod order_book;
pub mod replay;
pub mod snapshot;
pub mod store;

pub use classifier::{classify, Classified, IgnoreReason};
pub use config::SyncConfig;
pub use delta::DeltaOutcome;
pub use diff::{diff, BookDiff, LevelChange};
pub use error::{ConsistencyFault, SyncError};
pub use events::{DeltaBatch, DeltaEntry, DeltaOp, HistoryRecord, SnapshotRecord};
pub use order_book::{OrderBookState, PriceLevel, SortOrder};
pub use replay::{BookSummary, ReplayEngine, ReplayError, ReplayResult, VerificationReport};
pub use snapshot::SnapshotOutcome;
pub use store::{BookStore, IngestReport, MarketStatus};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
