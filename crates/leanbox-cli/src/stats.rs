//! Benchmark counters owned by the harness.
//!
//! A [`BenchStats`] is created per benchmark run and passed by `&mut` to
//! whatever records into it; nothing here is global.

use std::time::{Duration, Instant};

use serde::Serialize;

/// How often a progress line is produced.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Operations completed since the previous progress line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalReport {
    /// Successful operations in the interval.
    pub count: u64,
    /// Length of the interval.
    pub elapsed: Duration,
}

impl IntervalReport {
    /// Mean wall-clock time per operation, in milliseconds.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn latency_ms(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.elapsed.as_secs_f64() * 1000.0 / self.count as f64
    }
}

/// Counters and latency samples of one benchmark run.
#[derive(Debug)]
pub struct BenchStats {
    started: Instant,
    succeeded: u64,
    failed: u64,
    samples_ns: Vec<u64>,
    last_report_at: Duration,
    last_report_count: u64,
}

impl BenchStats {
    /// Starts the clock.
    #[must_use]
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            succeeded: 0,
            failed: 0,
            samples_ns: Vec::new(),
            last_report_at: Duration::ZERO,
            last_report_count: 0,
        }
    }

    /// Time since the run started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Records a successful operation that took `latency`.
    pub fn record_success(&mut self, latency: Duration) {
        self.succeeded += 1;
        self.samples_ns
            .push(u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX));
    }

    /// Records a failed operation.
    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    /// Successful operations so far.
    #[must_use]
    pub const fn succeeded(&self) -> u64 {
        self.succeeded
    }

    /// Failed operations so far.
    #[must_use]
    pub const fn failed(&self) -> u64 {
        self.failed
    }

    /// Returns a report once more than [`REPORT_INTERVAL`] has passed since
    /// the previous one.
    pub fn interval_report(&mut self) -> Option<IntervalReport> {
        self.interval_report_at(self.elapsed())
    }

    fn interval_report_at(&mut self, now: Duration) -> Option<IntervalReport> {
        let elapsed = now.saturating_sub(self.last_report_at);
        if elapsed <= REPORT_INTERVAL {
            return None;
        }
        let report = IntervalReport {
            count: self.succeeded - self.last_report_count,
            elapsed,
        };
        self.last_report_at = now;
        self.last_report_count = self.succeeded;
        Some(report)
    }

    /// Summarizes the run.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn summary(&self) -> BenchSummary {
        let mut sorted = self.samples_ns.clone();
        sorted.sort_unstable();
        let elapsed = self.elapsed().as_secs_f64();
        let percentile = |p: usize| {
            if sorted.is_empty() {
                0
            } else {
                sorted[(sorted.len() * p / 100).min(sorted.len() - 1)]
            }
        };
        BenchSummary {
            succeeded: self.succeeded,
            failed: self.failed,
            elapsed_secs: elapsed,
            throughput_per_sec: if elapsed > 0.0 {
                self.succeeded as f64 / elapsed
            } else {
                0.0
            },
            min_ns: sorted.first().copied().unwrap_or(0),
            median_ns: percentile(50),
            p99_ns: percentile(99),
            max_ns: sorted.last().copied().unwrap_or(0),
        }
    }
}

/// Final figures of a benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchSummary {
    /// Successful operations.
    pub succeeded: u64,
    /// Failed operations.
    pub failed: u64,
    /// Wall-clock length of the run in seconds.
    pub elapsed_secs: f64,
    /// Successful operations per second.
    pub throughput_per_sec: f64,
    /// Fastest operation.
    pub min_ns: u64,
    /// Median operation.
    pub median_ns: u64,
    /// 99th percentile operation.
    pub p99_ns: u64,
    /// Slowest operation.
    pub max_ns: u64,
}
