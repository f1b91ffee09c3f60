//! book-audit: rebuild order books from captured feed files
//!
//! Streams every capture file (sorted, `.zst` decompressed) through one
//! `BookStore`, then prints each market's final state and the store
//! counters. With `--verify` the capture is also replayed offline per market
//! and checked against its latest snapshot. Exits non-zero if any market
//! halted or failed verification.

mod reader;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use book_sync::{
    classify, BookStore, Classified, HistoryRecord, MarketStatus, ReplayEngine, SyncConfig,
};
use clap::Parser;
use serde_json::Value;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use types::ids::MarketId;

use crate::reader::Line;

#[derive(Debug, Parser)]
#[command(about = "Rebuild order books from captured feed files and report consistency faults")]
struct Args {
    /// JSON config file; missing fields take their defaults
    #[arg(long, env = "BOOK_AUDIT_CONFIG")]
    config: Option<PathBuf>,

    /// Only report these markets (repeatable). All markets are still processed.
    #[arg(long = "market", short = 'm')]
    markets: Vec<String>,

    /// Print one summary line per market instead of top-of-book levels
    #[arg(long, default_value_t = false)]
    summary: bool,

    /// Levels per side to print for each market
    #[arg(long, default_value_t = 5)]
    depth: usize,

    /// Replay each reported market offline and verify it against its latest snapshot
    #[arg(long, default_value_t = false)]
    verify: bool,

    /// Print best bid/ask and volumes after every replayed record
    #[arg(long, default_value_t = false)]
    steps: bool,

    /// Capture files (newline-delimited JSON, optionally .zst)
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

impl Args {
    fn load_config(&self) -> Result<SyncConfig> {
        let Some(path) = &self.config else {
            return Ok(SyncConfig::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        SyncConfig::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    fn wants(&self, market: &MarketId) -> bool {
        self.markets.is_empty() || self.markets.iter().any(|m| m == market.as_str())
    }

    fn keeps_history(&self) -> bool {
        self.verify || self.steps
    }
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let store = BookStore::new(args.load_config()?);
    let mut history: BTreeMap<MarketId, Vec<HistoryRecord>> = BTreeMap::new();

    for path in reader::sorted_paths(args.files.clone()) {
        info!(file = %path.display(), "Reading capture");
        for line in reader::lines(reader::open_capture(&path)?) {
            match line.with_context(|| format!("read {}", path.display()))? {
                Line::Text(text) => process_text(&args, &store, &text, &mut history),
                Line::Undecodable(err) => store.record_decode_failure(&err),
            }
        }
    }

    let mut healthy = print_markets(&args, &store);
    if args.keeps_history() {
        healthy &= replay_markets(&args, &history);
    }

    println!();
    for (name, value) in store.metrics().export() {
        println!("{:<26} {}", name, value);
    }

    Ok(if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn process_text(
    args: &Args,
    store: &BookStore,
    text: &str,
    history: &mut BTreeMap<MarketId, Vec<HistoryRecord>>,
) {
    if text.trim().is_empty() {
        return;
    }
    let record: Value = match serde_json::from_str(text) {
        Ok(record) => record,
        Err(err) => {
            store.record_decode_failure(&err);
            return;
        }
    };

    // Faults are logged by the store and the market halts; keep going.
    if let Err(err) = store.process_record(&record) {
        debug!(market = %err.market(), error = %err, "Record rejected");
    }

    if !args.keeps_history() {
        return;
    }
    let records: Vec<HistoryRecord> = match classify(&record, store.config()) {
        Classified::Snapshot(snapshot) => vec![snapshot.into()],
        Classified::Deltas(batches) => batches.into_iter().map(HistoryRecord::from).collect(),
        Classified::Ignorable(_) => Vec::new(),
    };
    for record in records {
        if args.wants(record.market()) {
            history.entry(record.market().clone()).or_default().push(record);
        }
    }
}

/// Print every reported market. Returns false if any of them halted.
fn print_markets(args: &Args, store: &BookStore) -> bool {
    let mut healthy = true;

    for market in store.markets().into_iter().filter(|m| args.wants(m)) {
        let status = store.status(&market);
        let Some(book) = store.get(&market) else {
            println!("{:<12} {:?}", market, status);
            continue;
        };

        let best = |level: Option<book_sync::PriceLevel>| {
            level.map(|l| l.price.to_string()).unwrap_or_else(|| "-".to_string())
        };
        println!(
            "{:<12} {:?} nonce={} bids={} asks={} best_bid={} best_ask={} checksum={}",
            market,
            status,
            book.nonce(),
            book.bid_depth(),
            book.ask_depth(),
            best(book.best_bid()),
            best(book.best_ask()),
            &book.checksum()[..16]
        );

        if !args.summary {
            let depth = book.depth_snapshot(args.depth);
            for level in &depth.asks {
                println!("    ASK {:>18} {}", level.price, level.quantity);
            }
            for level in &depth.bids {
                println!("    BID {:>18} {}", level.price, level.quantity);
            }
        }

        if status == MarketStatus::Halted {
            healthy = false;
            if let Some(fault) = store.fault(&market) {
                println!("    HALTED: {}", fault.report().replace('\n', "\n    "));
            }
        }
    }

    healthy
}

/// Offline replay per market. Returns false if any verification failed.
fn replay_markets(args: &Args, history: &BTreeMap<MarketId, Vec<HistoryRecord>>) -> bool {
    let mut healthy = true;

    for (market, records) in history {
        let engine = ReplayEngine::new(market.clone());

        if args.steps {
            match engine.earliest_snapshot(records, None, None) {
                Some(initial) => match engine.steps(initial, records) {
                    Ok(steps) => {
                        println!("\n{} replay steps", market);
                        for step in steps {
                            println!("    {}", step);
                        }
                    }
                    Err(err) => {
                        healthy = false;
                        println!("\n{} replay failed: {}", market, err);
                    }
                },
                None => warn!(market = %market, "No snapshot in capture, nothing to replay"),
            }
        }

        if args.verify {
            match engine.audit_latest(records) {
                Ok(Some(report)) if report.is_match() => println!(
                    "{} verified: replay {} -> {} matches snapshot",
                    market, report.replayed_nonce, report.reference_nonce
                ),
                Ok(Some(report)) => {
                    healthy = false;
                    println!(
                        "{} MISMATCH at nonce {}:\n{}",
                        market,
                        report.reference_nonce,
                        report.diff.report()
                    );
                }
                Ok(None) => println!("{} not verified: fewer than two snapshots", market),
                Err(err) => {
                    healthy = false;
                    println!("{} replay failed: {}", market, err);
                }
            }
        }
    }

    healthy
}
