use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running counters for the dispatch pool, shared between submitters and the
/// health endpoint.
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    submitted: Arc<AtomicU64>,
    completed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>, // Turned away at admission (pool saturated)
    timed_out: Arc<AtomicU64>, // Admission wait or reply wait expired
    avg_latency_ms: Arc<AtomicU64>,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub avg_latency_ms: u64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a completed job and fold its latency into the moving average.
    pub fn record_completed(&self, latency_ms: u64) {
        let first = self.completed.fetch_add(1, Ordering::Relaxed) == 0;
        let updated = if first {
            latency_ms
        } else {
            let current = self.avg_latency_ms.load(Ordering::Relaxed) as f64;
            (current * 0.9 + latency_ms as f64 * 0.1) as u64 // Exponential moving average
        };
        self.avg_latency_ms.store(updated, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            avg_latency_ms: self.avg_latency_ms.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_shared_between_clones() {
        let stats = DispatchStats::new();
        let other = stats.clone();

        stats.increment_submitted();
        other.increment_submitted();
        other.increment_rejected();
        stats.increment_timed_out();
        stats.increment_failed();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.submitted, 2);
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.timed_out, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.completed, 0);
    }

    #[test]
    fn test_latency_average() {
        let stats = DispatchStats::new();
        stats.record_completed(100);
        assert_eq!(stats.snapshot().avg_latency_ms, 100);

        stats.record_completed(200);
        assert_eq!(stats.snapshot().avg_latency_ms, 110);
        assert_eq!(stats.snapshot().completed, 2);
    }
}
