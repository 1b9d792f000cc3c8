//! Per-trial measurement state shared by the client workers.
//!
//! Byte and connection counters are lock-free atomics. Latency samples go
//! into one mutex-guarded vector, locked once per append; under thousands
//! of workers this lock is a known contention point.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Shared state for one trial. A fresh instance is created per trial, so
/// nothing leaks between trials.
#[derive(Debug, Default)]
pub struct TrialStats {
    latencies: Mutex<Vec<f64>>,
    total_bytes: AtomicU64,
    connections: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    stop: AtomicBool,
}

/// Aggregate counters read once the trial has been joined.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrialTotals {
    pub total_bytes: u64,
    pub connections: usize,
    pub peak_active: usize,
}

impl TrialStats {
    /// Pre-size the sample vector.
    pub fn with_capacity(samples: usize) -> Self {
        Self {
            latencies: Mutex::new(Vec::with_capacity(samples)),
            ..Self::default()
        }
    }

    /// Record one completed round trip.
    pub fn record(&self, latency_ms: f64, bytes: u64) {
        self.lock_latencies().push(latency_ms);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Count a connected (or bound) client. The returned guard keeps it
    /// in the active count until dropped.
    pub fn connection_opened(&self) -> ActiveConnection<'_> {
        self.connections.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
        ActiveConnection { stats: self }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Sample the active count and fold it into the peak.
    ///
    /// Returns the sampled value.
    pub fn sample_peak(&self) -> usize {
        let current = self.active();
        self.peak.fetch_max(current, Ordering::Relaxed);
        current
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Raise the stop signal. Workers observe it between requests.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn request_count(&self) -> usize {
        self.lock_latencies().len()
    }

    pub fn totals(&self) -> TrialTotals {
        TrialTotals {
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            peak_active: self.peak(),
        }
    }

    /// Move the recorded samples out, leaving the vector empty.
    pub fn take_latencies(&self) -> Vec<f64> {
        std::mem::take(&mut *self.lock_latencies())
    }

    fn lock_latencies(&self) -> MutexGuard<'_, Vec<f64>> {
        // Push is the only mutation; a poisoned vector is still intact.
        self.latencies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Active-connection guard returned by [`TrialStats::connection_opened`].
#[derive(Debug)]
pub struct ActiveConnection<'a> {
    stats: &'a TrialStats,
}

impl Drop for ActiveConnection<'_> {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_record_accumulates() {
        let stats = TrialStats::default();
        stats.record(1.5, 2048);
        stats.record(0.5, 2048);

        assert_eq!(stats.request_count(), 2);
        assert_eq!(stats.totals().total_bytes, 4096);
        assert_eq!(stats.take_latencies(), vec![1.5, 0.5]);
        assert_eq!(stats.request_count(), 0);
    }

    #[test]
    fn test_active_guard() {
        let stats = TrialStats::default();
        {
            let _a = stats.connection_opened();
            let _b = stats.connection_opened();
            assert_eq!(stats.active(), 2);
            assert_eq!(stats.sample_peak(), 2);
        }
        assert_eq!(stats.active(), 0);
        assert_eq!(stats.sample_peak(), 0);

        let totals = stats.totals();
        assert_eq!(totals.connections, 2);
        assert_eq!(totals.peak_active, 2);
    }

    #[test]
    fn test_peak_never_below_sample() {
        let stats = TrialStats::default();
        let mut guards = Vec::new();
        let mut max_seen = 0;
        for _ in 0..5 {
            guards.push(stats.connection_opened());
            max_seen = max_seen.max(stats.sample_peak());
        }
        guards.truncate(1);
        let sample = stats.sample_peak();

        assert_eq!(sample, 1);
        assert!(stats.peak() >= sample);
        assert_eq!(stats.peak(), max_seen);
    }

    #[test]
    fn test_concurrent_records() {
        let stats = Arc::new(TrialStats::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        stats.record(1.0, 10);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.request_count(), 800);
        assert_eq!(stats.totals().total_bytes, 8000);
    }

    #[test]
    fn test_stop_signal() {
        let stats = TrialStats::default();
        assert!(!stats.should_stop());
        stats.stop();
        assert!(stats.should_stop());
    }
}
