//! Run-wide counters and the shutdown summary.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tracing::info;

use crate::utils::format::{format_runtime, mib_per_sec};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Counters shared by the production controller and destination workers.
#[derive(Debug)]
pub struct RunStats {
    started_at: DateTime<Local>,
    started: Instant,
    plots_created: AtomicU64,
    plots_moved: AtomicU64,
    bytes_moved: AtomicU64,
    transfer_millis: AtomicU64,
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            started_at: Local::now(),
            started: Instant::now(),
            plots_created: AtomicU64::new(0),
            plots_moved: AtomicU64::new(0),
            bytes_moved: AtomicU64::new(0),
            transfer_millis: AtomicU64::new(0),
        }
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Count a finished generator batch.
    pub fn record_created(&self, plots: u64) {
        self.plots_created.fetch_add(plots, Ordering::Relaxed);
    }

    /// Count one successful transfer.
    pub fn record_transfer(&self, bytes: u64, duration: Duration) {
        self.plots_moved.fetch_add(1, Ordering::Relaxed);
        self.bytes_moved.fetch_add(bytes, Ordering::Relaxed);
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.transfer_millis.fetch_add(millis, Ordering::Relaxed);
    }

    pub fn plots_created(&self) -> u64 {
        self.plots_created.load(Ordering::Relaxed)
    }

    pub fn plots_moved(&self) -> u64 {
        self.plots_moved.load(Ordering::Relaxed)
    }

    pub fn bytes_moved(&self) -> u64 {
        self.bytes_moved.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> StatsSummary {
        self.summary_at(self.started.elapsed())
    }

    fn summary_at(&self, runtime: Duration) -> StatsSummary {
        StatsSummary {
            plots_created: self.plots_created(),
            plots_moved: self.plots_moved(),
            bytes_moved: self.bytes_moved(),
            transfer_time: Duration::from_millis(self.transfer_millis.load(Ordering::Relaxed)),
            runtime,
        }
    }

    /// Emit the summary to the log.
    pub fn log_summary(&self) {
        let summary = self.summary();
        for line in summary.to_string().lines() {
            info!("{}", line);
        }
    }
}

/// Frozen view of [`RunStats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSummary {
    pub plots_created: u64,
    pub plots_moved: u64,
    pub bytes_moved: u64,
    /// Time spent inside successful transfers.
    pub transfer_time: Duration,
    pub runtime: Duration,
}

impl StatsSummary {
    pub fn gib_moved(&self) -> f64 {
        self.bytes_moved as f64 / GIB
    }

    /// Bytes moved over the whole runtime.
    pub fn average_mib_per_sec(&self) -> f64 {
        mib_per_sec(self.bytes_moved, self.runtime)
    }
}

impl fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Stats:")?;
        writeln!(f, "  Plots created: {}", self.plots_created)?;
        writeln!(f, "  Plots moved: {}", self.plots_moved)?;
        writeln!(f, "  Runtime: {}", format_runtime(self.runtime))?;
        writeln!(f, "  Total data moved: {:.2} GB", self.gib_moved())?;
        writeln!(f, "  Time transferring: {}", format_runtime(self.transfer_time))?;
        write!(
            f,
            "  Average transfer speed: {:.2} MB/s",
            self.average_mib_per_sec()
        )
    }
}
