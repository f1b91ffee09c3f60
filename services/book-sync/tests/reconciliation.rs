//! End-to-end reconciliation tests for the book-sync core
//!
//! Drives the book store with raw feed records in both message dialects.
//!
//! Tests include:
//! - Zero-quantity removal, stale batches, snapshot disagreement, mixed batches
//! - Unknown markets, halted markets and undecodable lines
//! - Several markets fed concurrently
//! - Replaying a capture and verifying it against a later snapshot

use std::thread;

use book_sync::{
    BookStore, ConsistencyFault, DeltaOutcome, HistoryRecord, IngestReport, MarketStatus,
    ReplayEngine, SnapshotOutcome, SyncError,
};
use serde_json::{json, Value};
use types::ids::MarketId;
use types::numeric::{Price, Quantity};
use types::order::Side;

fn price(s: &str) -> Price {
    s.parse().unwrap()
}

fn qty(s: &str) -> Quantity {
    s.parse().unwrap()
}

fn snapshot_msg(market: &str, nonce: u64, bids: Value, asks: Value) -> Value {
    json!({
        "responseTo": ["QueryExchangeState", market],
        "R": {"N": nonce, "Z": bids, "S": asks, "f": []}
    })
}

fn delta_msg(market: &str, nonce: u64, bids: Value, asks: Value) -> Value {
    json!({
        "C": "d-1",
        "M": [{"H": "C2", "M": "uE", "A": [{"M": market, "N": nonce, "Z": bids, "S": asks}]}]
    })
}

fn seeded_store() -> BookStore {
    let store = BookStore::default();
    store
        .process_record(&snapshot_msg(
            "BTC-ETH",
            5,
            json!([{"R": 10, "Q": 1}, {"R": 9, "Q": 2}]),
            json!([{"R": 11, "Q": 1}]),
        ))
        .unwrap();
    store
}

fn btc_eth() -> MarketId {
    MarketId::new("BTC-ETH")
}

#[test]
fn zero_quantity_delta_removes_level() {
    let store = seeded_store();

    let report = store
        .process_record(&delta_msg("BTC-ETH", 6, json!([{"R": 10, "Q": 0}]), json!([])))
        .unwrap();
    assert_eq!(
        report,
        IngestReport::Deltas(vec![(btc_eth(), DeltaOutcome::Applied { levels_changed: 1 })])
    );

    let book = store.get(&btc_eth()).unwrap();
    assert_eq!(book.nonce(), 6);
    assert_eq!(book.bid_depth(), 1);
    assert_eq!(book.quantity_at(Side::Bid, price("9")), Some(qty("2")));
    assert_eq!(book.quantity_at(Side::Bid, price("10")), None);
    assert_eq!(book.quantity_at(Side::Ask, price("11")), Some(qty("1")));
}

#[test]
fn stale_delta_leaves_book_unchanged() {
    let store = seeded_store();
    let before = store.get(&btc_eth()).unwrap();

    let report = store
        .process_record(&delta_msg("BTC-ETH", 5, json!([{"R": 9, "Q": 99}]), json!([])))
        .unwrap();
    assert_eq!(
        report,
        IngestReport::Deltas(vec![(btc_eth(), DeltaOutcome::Stale { book_nonce: 5 })])
    );
    assert_eq!(store.get(&btc_eth()).unwrap(), before);
    assert_eq!(store.metrics().export()["deltas_stale"], 1);
}

#[test]
fn disagreeing_snapshot_raises_fault_with_diff() {
    let store = BookStore::default();
    store
        .process_record(&snapshot_msg("BTC-ETH", 100, json!([{"R": 50, "Q": 5}]), json!([])))
        .unwrap();

    let err = store
        .process_record(&snapshot_msg("BTC-ETH", 100, json!([{"R": 50, "Q": 6}]), json!([])))
        .unwrap_err();

    match err {
        SyncError::ConsistencyFault { market, fault } => {
            assert_eq!(market, btc_eth());
            let diff = fault.diff().expect("snapshot mismatch carries a diff");
            assert_eq!(
                diff.side_triples(Side::Bid),
                vec![(price("50"), Some(qty("5")), Some(qty("6")))]
            );
            assert!(diff.side_triples(Side::Ask).is_empty());
            assert!(fault.report().contains("BID 50: 5 -> 6"));
        }
        other => panic!("Expected ConsistencyFault, got {:?}", other),
    }
    assert_eq!(store.status(&btc_eth()), MarketStatus::Halted);
}

#[test]
fn mixed_batch_inserts_and_removes() {
    let store = BookStore::default();
    store
        .process_record(&snapshot_msg("BTC-ETH", 6, json!([]), json!([{"R": 21, "Q": 4}])))
        .unwrap();

    store
        .process_record(&delta_msg(
            "BTC-ETH",
            7,
            json!([]),
            json!([{"R": 20, "Q": 3}, {"R": 21, "Q": 0}]),
        ))
        .unwrap();

    let book = store.get(&btc_eth()).unwrap();
    assert_eq!(book.nonce(), 7);
    assert_eq!(book.ask_depth(), 1);
    assert_eq!(book.quantity_at(Side::Ask, price("20")), Some(qty("3")));
}

#[test]
fn op_coded_batches_apply_like_hub_deltas() {
    let store = seeded_store();

    store
        .process_record(&json!({
            "market": "BTC-ETH",
            "deltas": [
                {"type": "BID", "nonce": 6, "R": 10, "Q": 0, "TY": 1},
                {"type": "ASK", "nonce": 6, "R": 12, "Q": 2, "TY": 0},
                {"type": "ASK", "nonce": 6, "R": 11, "Q": 5, "TY": 2}
            ]
        }))
        .unwrap();

    let book = store.get(&btc_eth()).unwrap();
    assert_eq!(book.nonce(), 6);
    assert_eq!(book.bid_depth(), 1);
    assert_eq!(book.quantity_at(Side::Ask, price("11")), Some(qty("5")));
    assert_eq!(book.quantity_at(Side::Ask, price("12")), Some(qty("2")));
}

#[test]
fn removal_of_absent_level_halts_market() {
    let store = seeded_store();

    let err = store
        .process_record(&delta_msg("BTC-ETH", 6, json!([{"R": 7, "Q": 0}]), json!([])))
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::ConsistencyFault {
            fault: ConsistencyFault::RemovalOfAbsentLevel { nonce: 6, side: Side::Bid, .. },
            ..
        }
    ));

    // Later records for the market are rejected
    let err = store
        .process_record(&delta_msg("BTC-ETH", 7, json!([{"R": 9, "Q": 1}]), json!([])))
        .unwrap_err();
    assert_eq!(err, SyncError::MarketHalted { market: btc_eth() });
    assert_eq!(store.get(&btc_eth()).unwrap().nonce(), 5);
}

#[test]
fn delta_before_snapshot_is_dropped() {
    let store = BookStore::default();
    let report = store
        .process_record(&delta_msg("BTC-ETH", 3, json!([{"R": 1, "Q": 1}]), json!([])))
        .unwrap();

    assert_eq!(
        report,
        IngestReport::Deltas(vec![(btc_eth(), DeltaOutcome::UnknownMarket)])
    );
    assert!(store.get(&btc_eth()).is_none());
    assert_eq!(store.metrics().export()["deltas_unknown_market"], 1);
}

#[test]
fn older_snapshot_after_deltas_is_stale() {
    let store = seeded_store();
    store
        .process_record(&delta_msg("BTC-ETH", 6, json!([{"R": 8, "Q": 3}]), json!([])))
        .unwrap();

    let report = store
        .process_record(&snapshot_msg("BTC-ETH", 5, json!([{"R": 1, "Q": 1}]), json!([])))
        .unwrap();
    assert_eq!(
        report,
        IngestReport::Snapshot {
            market: btc_eth(),
            outcome: SnapshotOutcome::Stale { book_nonce: 6 }
        }
    );
    assert_eq!(store.status(&btc_eth()), MarketStatus::Synced);
}

#[test]
fn newer_matching_snapshot_confirms_book() {
    let store = seeded_store();
    store
        .process_record(&delta_msg("BTC-ETH", 6, json!([{"R": 10, "Q": 0}]), json!([])))
        .unwrap();

    let report = store
        .process_record(&snapshot_msg(
            "BTC-ETH",
            6,
            json!([{"R": "9.000", "Q": 2}]),
            json!([{"R": 11, "Q": "1.0"}]),
        ))
        .unwrap();
    assert_eq!(
        report,
        IngestReport::Snapshot {
            market: btc_eth(),
            outcome: SnapshotOutcome::Verified { advanced: false }
        }
    );
}

#[test]
fn noise_and_garbage_lines_are_skipped() {
    let store = seeded_store();

    let lines = [
        r#"{"R": true, "I": "1", "responseTo": ["SubscribeToExchangeDeltas", "BTC-ETH"]}"#,
        r#"{"C": "d-2", "M": [{"M": "updateSummaryState", "A": [{"Deltas": []}]}]}"#,
        r#"{"C": "d-3", "M": []}"#,
        "not json at all",
        "",
        r#"{"M": [{"M": "uE", "A": [{"M": "BTC-ETH", "N": 6, "Z": [{"R": 9, "Q": 4}], "S": []}]}]}"#,
    ];
    for line in lines {
        store.process_line(line).unwrap();
    }

    let book = store.get(&btc_eth()).unwrap();
    assert_eq!(book.nonce(), 6);
    assert_eq!(book.quantity_at(Side::Bid, price("9")), Some(qty("4")));

    let exported = store.metrics().export();
    assert_eq!(exported["decode_failures"], 1);
    // Acks, non-book hub messages and the blank line
    assert_eq!(exported["records_ignored"], 4);
}

#[test]
fn one_message_updates_several_markets() {
    let store = seeded_store();
    store
        .process_record(&snapshot_msg("USDT-BTC", 40, json!([{"R": 8000, "Q": 1}]), json!([])))
        .unwrap();

    let report = store
        .process_record(&json!({
            "M": [{"M": "uE", "A": [
                {"M": "BTC-ETH", "N": 6, "Z": [{"R": 8, "Q": 1}], "S": []},
                {"M": "USDT-BTC", "N": 41, "Z": [{"R": 8000, "Q": 0}], "S": []}
            ]}]
        }))
        .unwrap();

    match report {
        IngestReport::Deltas(outcomes) => assert_eq!(outcomes.len(), 2),
        other => panic!("Expected Deltas, got {:?}", other),
    }
    assert_eq!(store.get(&MarketId::new("USDT-BTC")).unwrap().bid_depth(), 0);
    assert_eq!(store.get(&btc_eth()).unwrap().bid_depth(), 3);
}

#[test]
fn fault_in_one_market_does_not_block_others_in_same_message() {
    let store = BookStore::default();
    store
        .process_record(&snapshot_msg("A-B", 1, json!([{"R": 5, "Q": 1}]), json!([])))
        .unwrap();
    store
        .process_record(&snapshot_msg("C-D", 1, json!([{"R": 5, "Q": 1}]), json!([])))
        .unwrap();

    let err = store
        .process_record(&json!({
            "M": [{"M": "uE", "A": [
                {"M": "A-B", "N": 2, "Z": [{"R": 4, "Q": 0}], "S": []},
                {"M": "C-D", "N": 2, "Z": [{"R": 4, "Q": 3}], "S": []}
            ]}]
        }))
        .unwrap_err();

    let a_b = MarketId::new("A-B");
    let c_d = MarketId::new("C-D");
    assert!(matches!(
        &err,
        SyncError::ConsistencyFault { market, .. } if *market == a_b
    ));
    assert_eq!(store.status(&a_b), MarketStatus::Halted);
    assert_eq!(store.get(&a_b).unwrap().nonce(), 1);

    assert_eq!(store.status(&c_d), MarketStatus::Synced);
    let healthy = store.get(&c_d).unwrap();
    assert_eq!(healthy.nonce(), 2);
    assert_eq!(healthy.bid_depth(), 2);
    assert_eq!(store.halted_markets(), vec![a_b]);
}

#[test]
fn markets_fed_concurrently_stay_independent() {
    let store = BookStore::default();
    let markets: Vec<String> = (0..8).map(|i| format!("BTC-M{}", i)).collect();

    for market in &markets {
        store
            .process_record(&snapshot_msg(market, 0, json!([]), json!([])))
            .unwrap();
    }

    thread::scope(|scope| {
        for market in &markets {
            let store = &store;
            scope.spawn(move || {
                for nonce in 1..=200u64 {
                    store
                        .process_record(&delta_msg(
                            market,
                            nonce,
                            json!([{"R": nonce, "Q": 1}]),
                            json!([]),
                        ))
                        .unwrap();
                }
            });
        }
    });

    for market in &markets {
        let book = store.get(&MarketId::new(market.as_str())).unwrap();
        assert_eq!(book.nonce(), 200);
        assert_eq!(book.bid_depth(), 200);
        assert_eq!(book.best_bid().unwrap().price, Price::from_u64(200));
    }
    assert_eq!(store.metrics().export()["deltas_applied"], 8 * 200);
    assert!(store.halted_markets().is_empty());
}

#[test]
fn replay_of_capture_matches_later_snapshot() {
    let store = BookStore::default();
    let mut history: Vec<HistoryRecord> = Vec::new();

    let records = vec![
        snapshot_msg("BTC-ETH", 5, json!([{"R": 10, "Q": 1}, {"R": 9, "Q": 2}]), json!([{"R": 11, "Q": 1}])),
        delta_msg("BTC-ETH", 6, json!([{"R": 10, "Q": 0}]), json!([])),
        delta_msg("BTC-ETH", 7, json!([]), json!([{"R": 12, "Q": 3}])),
        delta_msg("BTC-ETH", 8, json!([{"R": 9, "Q": 2.5}]), json!([])),
        snapshot_msg("BTC-ETH", 8, json!([{"R": 9, "Q": 2.5}]), json!([{"R": 11, "Q": 1}, {"R": 12, "Q": 3}])),
    ];

    // Live path and capture see the same records
    for record in &records {
        store.process_record(record).unwrap();
        match book_sync::classify(record, store.config()) {
            book_sync::Classified::Snapshot(s) => history.push(s.into()),
            book_sync::Classified::Deltas(batches) => {
                history.extend(batches.into_iter().map(HistoryRecord::from))
            }
            book_sync::Classified::Ignorable(_) => {}
        }
    }

    let engine = ReplayEngine::new(btc_eth());
    let report = engine.audit_latest(&history).unwrap().expect("two snapshots");
    assert!(report.is_match(), "{}", report.diff.report());
    assert_eq!(report.reference_nonce, 8);

    let live = store.get(&btc_eth()).unwrap();
    let initial = engine.earliest_snapshot(&history, None, None).unwrap();
    let replayed = engine.replay(initial, &history).unwrap();
    assert_eq!(replayed.state.checksum(), live.checksum());
}
