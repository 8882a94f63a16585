//! Per-table counters
//!
//! - Counters only, monotonic
//! - Reset only when the table is constructed
//! - Relaxed atomics; values are exact once the table lock is released

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters for one table
#[derive(Debug, Default)]
pub struct TableMetrics {
    /// Bytes read from the record file
    bytes_loaded: AtomicU64,
    /// Bytes written to the record file
    bytes_saved: AtomicU64,
    /// Records written by commit (insert or rewrite)
    records_committed: AtomicU64,
    /// Records tombstoned
    records_deleted: AtomicU64,
    /// Repairs performed by fix-mode scans
    repairs: AtomicU64,
    /// Index add/remove calls issued
    index_calls: AtomicU64,
}

impl TableMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_loaded(&self, bytes: u64) {
        self.bytes_loaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_saved(&self, bytes: u64) {
        self.bytes_saved.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_committed(&self) {
        self.records_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_deleted(&self) {
        self.records_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_repairs(&self) {
        self.repairs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_index_calls(&self) {
        self.index_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all counters as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_loaded: self.bytes_loaded.load(Ordering::Relaxed),
            bytes_saved: self.bytes_saved.load(Ordering::Relaxed),
            records_committed: self.records_committed.load(Ordering::Relaxed),
            records_deleted: self.records_deleted.load(Ordering::Relaxed),
            repairs: self.repairs.load(Ordering::Relaxed),
            index_calls: self.index_calls.load(Ordering::Relaxed),
        }
    }

    /// Current snapshot as a JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_default()
    }
}

/// A point-in-time copy of [`TableMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub bytes_loaded: u64,
    pub bytes_saved: u64,
    pub records_committed: u64,
    pub records_deleted: u64,
    pub repairs: u64,
    pub index_calls: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metrics_are_zero() {
        assert_eq!(TableMetrics::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_counters_accumulate() {
        let m = TableMetrics::new();
        m.add_saved(10);
        m.add_saved(5);
        m.add_loaded(7);
        m.increment_committed();
        m.increment_index_calls();
        m.increment_index_calls();

        let s = m.snapshot();
        assert_eq!(s.bytes_saved, 15);
        assert_eq!(s.bytes_loaded, 7);
        assert_eq!(s.records_committed, 1);
        assert_eq!(s.index_calls, 2);
    }

    #[test]
    fn test_to_json_parses() {
        let m = TableMetrics::new();
        m.increment_repairs();
        let parsed: serde_json::Value = serde_json::from_str(&m.to_json()).unwrap();
        assert_eq!(parsed["repairs"], 1);
    }
}
