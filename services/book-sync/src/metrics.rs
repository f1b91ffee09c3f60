//! Observability counters for the book store
//!
//! Every non-fatal condition (stale records, unknown markets, ignorable
//! messages, decode failures) is absorbed by the store and only shows up
//! here. Counters are atomics so readers never block writers.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Core counters for record processing.
pub struct SyncMetrics {
    // Intake
    pub records_processed: AtomicU64,
    pub records_ignored: AtomicU64,
    pub decode_failures: AtomicU64,

    // Snapshots
    pub snapshots_created: AtomicU64,
    pub snapshots_verified: AtomicU64,
    pub snapshots_stale: AtomicU64,

    // Deltas
    pub deltas_applied: AtomicU64,
    pub deltas_stale: AtomicU64,
    pub deltas_unknown_market: AtomicU64,

    // Integrity
    pub consistency_faults: AtomicU64,
    pub records_rejected_halted: AtomicU64,

    pub processing_ns: Mutex<LatencyTracker>,
}

impl SyncMetrics {
    pub fn new(latency_window: usize) -> Self {
        Self {
            records_processed: AtomicU64::new(0),
            records_ignored: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            snapshots_created: AtomicU64::new(0),
            snapshots_verified: AtomicU64::new(0),
            snapshots_stale: AtomicU64::new(0),
            deltas_applied: AtomicU64::new(0),
            deltas_stale: AtomicU64::new(0),
            deltas_unknown_market: AtomicU64::new(0),
            consistency_faults: AtomicU64::new(0),
            records_rejected_halted: AtomicU64::new(0),
            processing_ns: Mutex::new(LatencyTracker::new(latency_window)),
        }
    }

    /// Count one record and its processing latency. Returns the new total.
    pub fn record_processed(&self, latency_ns: u64) -> u64 {
        if let Ok(mut tracker) = self.processing_ns.lock() {
            tracker.record(latency_ns);
        }
        self.records_processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// p-th percentile of recent processing latency in nanoseconds.
    pub fn latency_percentile(&self, p: usize) -> Option<u64> {
        self.processing_ns.lock().ok().and_then(|t| t.percentile(p))
    }

    /// Export counters as a sorted map for reporting.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("records_processed".to_string(), Self::get(&self.records_processed));
        m.insert("records_ignored".to_string(), Self::get(&self.records_ignored));
        m.insert("decode_failures".to_string(), Self::get(&self.decode_failures));
        m.insert("snapshots_created".to_string(), Self::get(&self.snapshots_created));
        m.insert("snapshots_verified".to_string(), Self::get(&self.snapshots_verified));
        m.insert("snapshots_stale".to_string(), Self::get(&self.snapshots_stale));
        m.insert("deltas_applied".to_string(), Self::get(&self.deltas_applied));
        m.insert("deltas_stale".to_string(), Self::get(&self.deltas_stale));
        m.insert("deltas_unknown_market".to_string(), Self::get(&self.deltas_unknown_market));
        m.insert("consistency_faults".to_string(), Self::get(&self.consistency_faults));
        m.insert(
            "records_rejected_halted".to_string(),
            Self::get(&self.records_rejected_halted),
        );
        m
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Tracks latency samples over a sliding window for percentile calculation.
pub struct LatencyTracker {
    samples: VecDeque<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record a latency sample.
    pub fn record(&mut self, value: u64) {
        if self.max_samples == 0 {
            return;
        }
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (p.min(100) as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    /// Average latency.
    pub fn average(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as u64)
    }

    /// Number of samples recorded.
    pub fn count(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = SyncMetrics::new(10);

        assert_eq!(metrics.record_processed(500), 1);
        assert_eq!(metrics.record_processed(1000), 2);
        SyncMetrics::bump(&metrics.deltas_stale);

        let exported = metrics.export();
        assert_eq!(exported["records_processed"], 2);
        assert_eq!(exported["deltas_stale"], 1);
        assert_eq!(exported["consistency_faults"], 0);
    }

    #[test]
    fn test_export_lists_every_counter() {
        let exported = SyncMetrics::default().export();
        assert_eq!(exported.len(), 11);
        assert!(exported.values().all(|v| *v == 0));
    }

    #[test]
    fn test_latency_tracker_percentile() {
        let mut tracker = LatencyTracker::new(100);

        for i in 1..=100 {
            tracker.record(i);
        }

        let p50 = tracker.percentile(50).unwrap();
        assert!((49..=51).contains(&p50));

        let p99 = tracker.percentile(99).unwrap();
        assert!((98..=100).contains(&p99));
    }

    #[test]
    fn test_latency_tracker_window_eviction() {
        let mut tracker = LatencyTracker::new(3);

        tracker.record(10);
        tracker.record(20);
        tracker.record(30);
        tracker.record(40); // Should evict 10

        assert_eq!(tracker.count(), 3);
        assert_eq!(tracker.average().unwrap(), 30); // (20+30+40)/3
    }

    #[test]
    fn test_zero_window_records_nothing() {
        let mut tracker = LatencyTracker::new(0);
        tracker.record(5);
        assert_eq!(tracker.count(), 0);
        assert!(tracker.percentile(50).is_none());
    }

    #[test]
    fn test_metrics_latency_percentile() {
        let metrics = SyncMetrics::new(4);
        assert!(metrics.latency_percentile(50).is_none());
        metrics.record_processed(100);
        assert_eq!(metrics.latency_percentile(99), Some(100));
    }
}
