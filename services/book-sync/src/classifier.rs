//! Message classification
//!
//! Turns one decoded feed record into a snapshot, a list of delta batches,
//! or an explicit `Ignorable`. Records are first decoded into a small wire
//! enum (query response, op-coded batch, hub message) and only then mapped
//! onto the core record types, so a message that fits none of the known
//! shapes falls out as `Ignorable` instead of raising.
//!
//! Supported shapes:
//!
//! ```text
//! snapshot  { responseTo: [query, market], R: { N, Z: [{R, Q}], S: [{R, Q}] } }
//! delta     { M: [{ M: "uE", A: [{ M: market, N, Z: [{R, Q, TY?}], S: [...] }] }] }
//! op batch  { market, deltas: [{ type: "BID"|"ASK", nonce, R, Q, TY }] }
//! ```
//!
//! `TY` opcodes: 0 = add, 1 = remove, 2 = update. Without an opcode a zero
//! quantity means removal.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use serde_json::Value;
use types::ids::MarketId;
use types::numeric::{Price, Quantity};
use types::order::Side;

use crate::config::SyncConfig;
use crate::events::{DeltaBatch, DeltaEntry, SnapshotRecord};
use crate::order_book::PriceLevel;

/// What a record turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Snapshot(SnapshotRecord),
    /// One message may carry batches for several markets.
    Deltas(Vec<DeltaBatch>),
    Ignorable(IgnoreReason),
}

/// Why a record was classified as ignorable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Matches no known message shape (acks, heartbeats, ...).
    UnrecognizedShape,
    /// A query response for a query other than the snapshot query.
    UnhandledQuery(String),
    /// Hub message without any exchange-state update.
    NoBookUpdates,
    /// Op-coded batch with no entries.
    EmptyBatch,
    /// Op-coded batch whose entries disagree on the nonce.
    MixedNonces { first: u64, other: u64 },
    UnknownOpcode(u8),
    /// Known shape, but a field could not be parsed.
    InvalidField(String),
}

impl IgnoreReason {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            IgnoreReason::UnrecognizedShape => "unrecognized_shape",
            IgnoreReason::UnhandledQuery(_) => "unhandled_query",
            IgnoreReason::NoBookUpdates => "no_book_updates",
            IgnoreReason::EmptyBatch => "empty_batch",
            IgnoreReason::MixedNonces { .. } => "mixed_nonces",
            IgnoreReason::UnknownOpcode(_) => "unknown_opcode",
            IgnoreReason::InvalidField(_) => "invalid_field",
        }
    }
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::UnhandledQuery(q) => write!(f, "unhandled query {}", q),
            IgnoreReason::MixedNonces { first, other } => {
                write!(f, "mixed nonces {} and {} in one batch", first, other)
            }
            IgnoreReason::UnknownOpcode(op) => write!(f, "unknown opcode {}", op),
            IgnoreReason::InvalidField(reason) => write!(f, "invalid field: {}", reason),
            other => f.write_str(other.label()),
        }
    }
}

// ── Wire shapes ─────────────────────────────────────────────────────

/// Numeric field that may arrive as a JSON number or a numeric string.
/// The text is kept and parsed into an exact decimal later.
#[derive(Debug, Clone)]
struct WireDecimal(String);

impl<'de> Deserialize<'de> for WireDecimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct WireDecimalVisitor;

        impl<'de> Visitor<'de> for WireDecimalVisitor {
            type Value = WireDecimal;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number or a numeric string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<WireDecimal, E> {
                Ok(WireDecimal(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<WireDecimal, E> {
                Ok(WireDecimal(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<WireDecimal, E> {
                Ok(WireDecimal(v.to_string()))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<WireDecimal, E> {
                Ok(WireDecimal(v.to_string()))
            }
        }

        deserializer.deserialize_any(WireDecimalVisitor)
    }
}

#[derive(Debug, Deserialize)]
struct WireLevel {
    #[serde(rename = "R")]
    rate: WireDecimal,
    #[serde(rename = "Q")]
    quantity: WireDecimal,
    #[serde(rename = "TY", default)]
    op_code: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(rename = "responseTo")]
    response_to: Vec<Value>,
    #[serde(rename = "R", default)]
    result: Value,
    #[serde(rename = "logTime", default)]
    log_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ExchangeState {
    #[serde(rename = "N")]
    nonce: u64,
    #[serde(rename = "Z", default)]
    buys: Vec<WireLevel>,
    #[serde(rename = "S", default)]
    sells: Vec<WireLevel>,
}

#[derive(Debug, Deserialize)]
struct HubMessage {
    #[serde(rename = "M")]
    invocations: Vec<HubInvocation>,
    #[serde(rename = "logTime", default)]
    log_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HubInvocation {
    #[serde(rename = "M", default)]
    method: String,
    #[serde(rename = "A", default)]
    args: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct MarketDelta {
    #[serde(rename = "M")]
    market: String,
    #[serde(rename = "N")]
    nonce: u64,
    #[serde(rename = "Z", default)]
    buys: Vec<WireLevel>,
    #[serde(rename = "S", default)]
    sells: Vec<WireLevel>,
}

#[derive(Debug, Deserialize)]
struct OpBatch {
    market: String,
    deltas: Vec<OpEntry>,
    #[serde(rename = "logTime", default)]
    log_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OpEntry {
    #[serde(rename = "type")]
    side: String,
    nonce: u64,
    #[serde(rename = "R")]
    rate: WireDecimal,
    #[serde(rename = "Q")]
    quantity: WireDecimal,
    #[serde(rename = "TY")]
    op_code: u8,
}

/// Known record shapes, tried in order.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireRecord {
    QueryResponse(QueryResponse),
    OpBatch(OpBatch),
    Hub(HubMessage),
}

// ── Classification ──────────────────────────────────────────────────

/// Classify one decoded record. Never fails: anything unusable is
/// `Classified::Ignorable`.
pub fn classify(record: &Value, config: &SyncConfig) -> Classified {
    let wire = match WireRecord::deserialize(record) {
        Ok(wire) => wire,
        Err(_) => return Classified::Ignorable(IgnoreReason::UnrecognizedShape),
    };

    let classified = match wire {
        WireRecord::QueryResponse(response) => classify_query_response(response, config),
        WireRecord::OpBatch(batch) => classify_op_batch(batch).map(|b| Classified::Deltas(vec![b])),
        WireRecord::Hub(message) => classify_hub_message(message, config),
    };

    classified.unwrap_or_else(Classified::Ignorable)
}

fn classify_query_response(
    response: QueryResponse,
    config: &SyncConfig,
) -> Result<Classified, IgnoreReason> {
    let query = response
        .response_to
        .first()
        .and_then(Value::as_str)
        .unwrap_or_default();
    if query != config.snapshot_query {
        return Err(IgnoreReason::UnhandledQuery(query.to_string()));
    }

    let market = response
        .response_to
        .get(1)
        .and_then(Value::as_str)
        .ok_or_else(|| IgnoreReason::InvalidField("responseTo market".to_string()))?;
    let market = parse_market(market)?;

    let state = ExchangeState::deserialize(&response.result)
        .map_err(|e| IgnoreReason::InvalidField(format!("exchange state: {}", e)))?;

    let mut record = SnapshotRecord::new(
        market,
        state.nonce,
        parse_levels(&state.buys)?,
        parse_levels(&state.sells)?,
    );
    record.captured_at = capture_nanos(response.log_time);
    Ok(Classified::Snapshot(record))
}

fn classify_hub_message(
    message: HubMessage,
    config: &SyncConfig,
) -> Result<Classified, IgnoreReason> {
    let captured_at = capture_nanos(message.log_time);
    let mut batches = Vec::new();

    for invocation in message
        .invocations
        .iter()
        .filter(|inv| inv.method == config.delta_method)
    {
        for arg in &invocation.args {
            let delta = MarketDelta::deserialize(arg)
                .map_err(|e| IgnoreReason::InvalidField(format!("market delta: {}", e)))?;

            let mut entries = Vec::with_capacity(delta.buys.len() + delta.sells.len());
            for (side, levels) in [(Side::Bid, &delta.buys), (Side::Ask, &delta.sells)] {
                for level in levels {
                    entries.push(parse_entry(side, &level.rate, &level.quantity, level.op_code)?);
                }
            }

            let mut batch = DeltaBatch::new(parse_market(&delta.market)?, delta.nonce, entries);
            batch.captured_at = captured_at;
            batches.push(batch);
        }
    }

    if batches.is_empty() {
        return Err(IgnoreReason::NoBookUpdates);
    }
    Ok(Classified::Deltas(batches))
}

fn classify_op_batch(batch: OpBatch) -> Result<DeltaBatch, IgnoreReason> {
    let first = batch.deltas.first().ok_or(IgnoreReason::EmptyBatch)?;
    let nonce = first.nonce;

    let mut entries = Vec::with_capacity(batch.deltas.len());
    for entry in &batch.deltas {
        if entry.nonce != nonce {
            return Err(IgnoreReason::MixedNonces {
                first: nonce,
                other: entry.nonce,
            });
        }
        let side: Side = entry
            .side
            .parse()
            .map_err(|e: types::errors::ValueError| IgnoreReason::InvalidField(e.to_string()))?;
        entries.push(parse_entry(side, &entry.rate, &entry.quantity, Some(entry.op_code))?);
    }

    let mut delta = DeltaBatch::new(parse_market(&batch.market)?, nonce, entries);
    delta.captured_at = capture_nanos(batch.log_time);
    Ok(delta)
}

fn parse_entry(
    side: Side,
    rate: &WireDecimal,
    quantity: &WireDecimal,
    op_code: Option<u8>,
) -> Result<DeltaEntry, IgnoreReason> {
    let (price, quantity) = parse_pair(rate, quantity)?;
    match op_code {
        None | Some(0) | Some(2) => Ok(DeltaEntry::from_level(side, price, quantity)),
        Some(1) => Ok(DeltaEntry::remove(side, price)),
        Some(other) => Err(IgnoreReason::UnknownOpcode(other)),
    }
}

fn parse_levels(levels: &[WireLevel]) -> Result<Vec<PriceLevel>, IgnoreReason> {
    levels
        .iter()
        .map(|level| {
            let (price, quantity) = parse_pair(&level.rate, &level.quantity)?;
            Ok(PriceLevel::new(price, quantity))
        })
        .collect()
}

fn parse_pair(rate: &WireDecimal, quantity: &WireDecimal) -> Result<(Price, Quantity), IgnoreReason> {
    let price: Price = rate
        .0
        .parse()
        .map_err(|e: types::errors::ValueError| IgnoreReason::InvalidField(e.to_string()))?;
    let quantity: Quantity = quantity
        .0
        .parse()
        .map_err(|e: types::errors::ValueError| IgnoreReason::InvalidField(e.to_string()))?;
    Ok((price, quantity))
}

fn parse_market(symbol: &str) -> Result<MarketId, IgnoreReason> {
    MarketId::try_new(symbol).map_err(|e| IgnoreReason::InvalidField(e.to_string()))
}

/// Float Unix seconds (as written by the capture logger) to Unix nanos.
fn capture_nanos(log_time: Option<f64>) -> Option<i64> {
    log_time
        .filter(|t| t.is_finite() && *t >= 0.0)
        .map(|t| (t * 1e9).round() as i64)
}
