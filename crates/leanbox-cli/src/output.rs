//! Formatted output helpers for CLI commands.
//!
//! Benchmark progress and summaries go to stdout, one line per report, so
//! they can be piped into plotting scripts; logs go to stderr.

use nix::sys::wait::WaitStatus;

use crate::stats::{BenchSummary, IntervalReport};

/// Formats a nanosecond count with a unit that keeps it readable.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_nanos(ns: u64) -> String {
    const MICRO: u64 = 1_000;
    const MILLI: u64 = MICRO * 1_000;
    const SECOND: u64 = MILLI * 1_000;

    if ns >= SECOND {
        format!("{:.2} s", ns as f64 / SECOND as f64)
    } else if ns >= MILLI {
        format!("{:.2} ms", ns as f64 / MILLI as f64)
    } else if ns >= MICRO {
        format!("{:.1} us", ns as f64 / MICRO as f64)
    } else {
        format!("{ns} ns")
    }
}

/// One progress line of a benchmark; `verb` names the measured operation.
#[must_use]
pub fn format_interval(verb: &str, report: &IntervalReport) -> String {
    format!(
        "{verb} {} lean containers in {:.3} second(s), latency per container {:.3}ms",
        report.count,
        report.elapsed.as_secs_f64(),
        report.latency_ms()
    )
}

/// The closing line of a benchmark.
#[must_use]
pub fn format_summary(verb: &str, summary: &BenchSummary) -> String {
    format!(
        "total: {verb} {} lean containers in {:.3} second(s) ({:.1}/s, {} failed; min {}, median {}, p99 {}, max {})",
        summary.succeeded,
        summary.elapsed_secs,
        summary.throughput_per_sec,
        summary.failed,
        format_nanos(summary.min_ns),
        format_nanos(summary.median_ns),
        format_nanos(summary.p99_ns),
        format_nanos(summary.max_ns),
    )
}

/// Describes how a reaped instance ended.
#[must_use]
pub fn format_status(status: &WaitStatus) -> String {
    match status {
        WaitStatus::Exited(_, code) => format!("exited with status {code}"),
        WaitStatus::Signaled(_, signal, core) => {
            let core = if *core { " (core dumped)" } else { "" };
            format!("killed by {signal}{core}")
        }
        other => format!("{other:?}"),
    }
}

/// Prints a report line to stdout.
#[allow(clippy::print_stdout)]
pub fn report(line: &str) {
    println!("{line}");
}
