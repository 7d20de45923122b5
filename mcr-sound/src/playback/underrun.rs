//! Underrun accounting
//!
//! The mix callback only bumps an atomic counter; reporting happens on the
//! decode thread, at most once per interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

pub struct UnderrunMonitor {
    /// Total underruns since creation
    count: AtomicU64,

    /// Value of `count` at the last report
    reported: AtomicU64,

    /// Only touched by the decode thread
    last_report: Mutex<Option<Instant>>,

    interval: Duration,
}

impl UnderrunMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            count: AtomicU64::new(0),
            reported: AtomicU64::new(0),
            last_report: Mutex::new(None),
            interval,
        }
    }

    /// Count one underrun
    ///
    /// **REAL-TIME SAFE**: a single relaxed atomic increment
    pub fn record(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Total underruns recorded
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Log new underruns if the interval has elapsed since the last report
    ///
    /// Returns true if a message was logged.
    pub fn log_if_due(&self) -> bool {
        let total = self.count();
        let reported = self.reported.load(Ordering::Relaxed);
        if total == reported {
            return false;
        }

        let mut last = self
            .last_report
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();
        if last.is_some_and(|at| now.duration_since(at) < self.interval) {
            return false;
        }

        warn!(
            "Audio underrun: {} voice buffers ran dry ({} total)",
            total - reported,
            total
        );
        *last = Some(now);
        self.reported.store(total, Ordering::Relaxed);
        true
    }
}
