//! Metrics collection for the control loop.
//!
//! Tracks cycle outcomes, actuations and lock toggles.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Point-in-time copy of the loop counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Total number of completed cycles
    pub cycles: u64,
    /// Cycles skipped while the window was filling
    pub skipped_filling: u64,
    /// Cycles skipped for lack of two peaks
    pub skipped_no_peaks: u64,
    /// Cycles with a frequency but no lock
    pub no_lock: u64,
    /// Pulses fired
    pub actuations: u64,
    /// Sum of requested pulse widths (seconds)
    pub total_pulse_sec: f64,
    /// Lock gained or lost between consecutive analysed cycles
    pub lock_toggles: u64,
    /// Uptime in seconds
    pub uptime_sec: u64,
}

/// Metrics collector shared between the loop and whoever reports on it
pub struct LoopMetrics {
    start_time: Instant,
    cycles: AtomicU64,
    skipped_filling: AtomicU64,
    skipped_no_peaks: AtomicU64,
    no_lock: AtomicU64,
    actuations: AtomicU64,
    pulse_micros: AtomicU64,
    lock_toggles: AtomicU64,
    locked: AtomicBool,
}

impl LoopMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            cycles: AtomicU64::new(0),
            skipped_filling: AtomicU64::new(0),
            skipped_no_peaks: AtomicU64::new(0),
            no_lock: AtomicU64::new(0),
            actuations: AtomicU64::new(0),
            pulse_micros: AtomicU64::new(0),
            lock_toggles: AtomicU64::new(0),
            locked: AtomicBool::new(false),
        }
    }

    pub fn record_filling(&self) {
        self.cycles.fetch_add(1, Ordering::SeqCst);
        self.skipped_filling.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_no_peaks(&self) {
        self.cycles.fetch_add(1, Ordering::SeqCst);
        self.skipped_no_peaks.fetch_add(1, Ordering::SeqCst);
        self.set_locked(false);
    }

    pub fn record_no_lock(&self) {
        self.cycles.fetch_add(1, Ordering::SeqCst);
        self.no_lock.fetch_add(1, Ordering::SeqCst);
        self.set_locked(false);
    }

    /// Record a fired pulse of the given width
    pub fn record_actuation(&self, width: Duration) {
        self.cycles.fetch_add(1, Ordering::SeqCst);
        self.actuations.fetch_add(1, Ordering::SeqCst);
        let micros = u64::try_from(width.as_micros()).unwrap_or(u64::MAX);
        self.pulse_micros.fetch_add(micros, Ordering::SeqCst);
        self.set_locked(true);
    }

    fn set_locked(&self, locked: bool) {
        if self.locked.swap(locked, Ordering::SeqCst) != locked {
            self.lock_toggles.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Get current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles: self.cycles.load(Ordering::SeqCst),
            skipped_filling: self.skipped_filling.load(Ordering::SeqCst),
            skipped_no_peaks: self.skipped_no_peaks.load(Ordering::SeqCst),
            no_lock: self.no_lock.load(Ordering::SeqCst),
            actuations: self.actuations.load(Ordering::SeqCst),
            total_pulse_sec: self.pulse_micros.load(Ordering::SeqCst) as f64 / 1_000_000.0,
            lock_toggles: self.lock_toggles.load(Ordering::SeqCst),
            uptime_sec: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for LoopMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_each_outcome() {
        let metrics = LoopMetrics::new();
        metrics.record_filling();
        metrics.record_filling();
        metrics.record_no_peaks();
        metrics.record_no_lock();
        metrics.record_actuation(Duration::from_millis(38));
        metrics.record_actuation(Duration::from_millis(12));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cycles, 6);
        assert_eq!(snapshot.skipped_filling, 2);
        assert_eq!(snapshot.skipped_no_peaks, 1);
        assert_eq!(snapshot.no_lock, 1);
        assert_eq!(snapshot.actuations, 2);
        assert!((snapshot.total_pulse_sec - 0.050).abs() < 1e-9);
    }

    #[test]
    fn test_lock_toggles_counted_at_band_edge() {
        let metrics = LoopMetrics::new();
        let pulse = Duration::from_millis(5);

        metrics.record_actuation(pulse); // on
        metrics.record_actuation(pulse);
        metrics.record_no_lock(); // off
        metrics.record_actuation(pulse); // on
        metrics.record_no_peaks(); // off
        metrics.record_filling(); // filling does not touch the lock

        assert_eq!(metrics.snapshot().lock_toggles, 4);
    }
}
