//! Configuration for the book-sync core
//!
//! Every field has a default so a config file only needs to name what it
//! changes.

use serde::{Deserialize, Serialize};

/// Tunables for classification, logging cadence and store sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Query name whose responses carry full snapshots.
    pub snapshot_query: String,
    /// Hub method name of incremental exchange-state updates.
    pub delta_method: String,
    /// Log a progress line every N processed records (0 disables).
    pub progress_log_interval: u64,
    /// Expected number of markets, used to pre-size the store.
    pub initial_capacity: usize,
    /// Number of recent per-record latencies kept for percentiles.
    pub latency_window: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            snapshot_query: "QueryExchangeState".to_string(),
            delta_method: "uE".to_string(),
            progress_log_interval: 1000,
            initial_capacity: 16,
            latency_window: 1000,
        }
    }
}

impl SyncConfig {
    /// Parse a JSON config document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
