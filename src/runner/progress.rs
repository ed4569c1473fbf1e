//! Progress reporting through `tracing`

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::store::Status;

/// Counts finished experiments and logs a summary at most once per interval.
#[derive(Debug)]
pub struct Progress {
    label: &'static str,
    total: usize,
    done: usize,
    failed: usize,
    interval: Duration,
    last_report: Instant,
}

impl Progress {
    /// Tracker for `total` experiments.
    #[must_use]
    pub fn new(label: &'static str, total: usize, interval: Duration) -> Self {
        Self {
            label,
            total,
            done: 0,
            failed: 0,
            interval,
            last_report: Instant::now(),
        }
    }

    /// Record one finished experiment.
    pub fn advance(&mut self, status: Status) {
        self.done += 1;
        if status != Status::Ok {
            self.failed += 1;
        }
        debug!(phase = self.label, done = self.done, total = self.total, %status, "experiment recorded");
        if self.done == self.total || self.last_report.elapsed() >= self.interval {
            self.report();
        }
    }

    /// Log the current counts.
    pub fn report(&mut self) {
        self.last_report = Instant::now();
        info!(
            phase = self.label,
            done = self.done,
            total = self.total,
            failed = self.failed,
            "progress"
        );
    }

    /// Number of recorded experiments.
    #[must_use]
    pub const fn done(&self) -> usize {
        self.done
    }

    /// Whether every experiment was recorded.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.done >= self.total
    }
}
