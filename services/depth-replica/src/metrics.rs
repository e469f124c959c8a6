//! Sync observability
//!
//! Counters for every outcome the sync layer and supervisor can reach, plus
//! a sliding window of diff-apply latency. Shared through an `Arc` between
//! the controller, the supervisor loop and whoever exports them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Core counters for one book replica.
pub struct SyncMetrics {
    // Snapshots
    pub snapshots_loaded: AtomicU64,
    pub snapshot_failures: AtomicU64,

    // Diffs
    pub diffs_applied: AtomicU64,
    pub diffs_unchanged: AtomicU64,
    pub diffs_stale: AtomicU64,
    pub diffs_not_ready: AtomicU64,
    pub gaps_detected: AtomicU64,
    pub malformed_levels: AtomicU64,
    pub diff_apply_ns: Mutex<LatencyTracker>,

    // Connection
    pub reconnects: AtomicU64,
    pub inactivity_timeouts: AtomicU64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self {
            snapshots_loaded: AtomicU64::new(0),
            snapshot_failures: AtomicU64::new(0),
            diffs_applied: AtomicU64::new(0),
            diffs_unchanged: AtomicU64::new(0),
            diffs_stale: AtomicU64::new(0),
            diffs_not_ready: AtomicU64::new(0),
            gaps_detected: AtomicU64::new(0),
            malformed_levels: AtomicU64::new(0),
            diff_apply_ns: Mutex::new(LatencyTracker::new(1000)),
            reconnects: AtomicU64::new(0),
            inactivity_timeouts: AtomicU64::new(0),
        }
    }

    pub fn record_snapshot_loaded(&self) {
        self.snapshots_loaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_failure(&self) {
        self.snapshot_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a diff that passed the sequence checks and was folded in.
    pub fn record_diff_applied(&self, changed: bool, latency_ns: u64) {
        if changed {
            self.diffs_applied.fetch_add(1, Ordering::Relaxed);
        } else {
            self.diffs_unchanged.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut tracker) = self.diff_apply_ns.lock() {
            tracker.record(latency_ns);
        }
    }

    pub fn record_diff_stale(&self) {
        self.diffs_stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_diff_not_ready(&self) {
        self.diffs_not_ready.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gap(&self) {
        self.gaps_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self, count: usize) {
        if count > 0 {
            self.malformed_levels.fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inactivity_timeout(&self) {
        self.inactivity_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// p99 of recent diff-apply latencies, in nanoseconds.
    pub fn diff_apply_p99_ns(&self) -> Option<u64> {
        self.diff_apply_ns.lock().ok()?.percentile(99)
    }

    /// Export counters as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let counters = [
            ("snapshots_loaded", &self.snapshots_loaded),
            ("snapshot_failures", &self.snapshot_failures),
            ("diffs_applied", &self.diffs_applied),
            ("diffs_unchanged", &self.diffs_unchanged),
            ("diffs_stale", &self.diffs_stale),
            ("diffs_not_ready", &self.diffs_not_ready),
            ("gaps_detected", &self.gaps_detected),
            ("malformed_levels", &self.malformed_levels),
            ("reconnects", &self.reconnects),
            ("inactivity_timeouts", &self.inactivity_timeouts),
        ];

        counters
            .into_iter()
            .map(|(name, counter)| (name.to_string(), counter.load(Ordering::Relaxed)))
            .collect()
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: Vec<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record a latency sample, evicting the oldest once the window is full.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();

        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn average(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as u64)
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }
}
