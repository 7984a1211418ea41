//! One drain pass: scan staging, fan the queue out to every destination, wait.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::probe::DestinationProbe;
use super::queue::WorkQueue;
use super::transfer::TransferExecutor;
use super::types::{Destination, PlotFile};
use super::worker::{DestinationWorker, WorkerContext, WorkerExit, WorkerReport};
use crate::Result;
use crate::stats::RunStats;
use crate::utils::fs::find_files_with_extension;

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default)]
pub struct DrainReport {
    /// Plots found by the scan.
    pub discovered: usize,
    /// Plots transferred this pass.
    pub delivered: usize,
    /// Plots no destination would take.
    pub remaining: usize,
    /// Plots left on disk after a transient fault; the next scan picks them up.
    pub deferred: usize,
    /// Plots that disappeared between scan and transfer.
    pub vanished: usize,
    /// Destinations that dropped out of rotation, with the reason.
    pub excluded_destinations: Vec<(Destination, WorkerExit)>,
    /// Plots still pending when the pass ended.
    pub pending_files: Vec<PlotFile>,
}

impl DrainReport {
    /// Nothing was left behind for lack of a destination.
    pub fn is_clear(&self) -> bool {
        self.remaining == 0
    }
}

/// Distribution settings for [`DistributionScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub sources: Vec<PathBuf>,
    pub extension: String,
    pub destinations: Vec<Destination>,
    pub shuffle: bool,
    pub unknown_backoff: Duration,
}

/// Owns the destination set and runs drain passes over it.
pub struct DistributionScheduler {
    options: SchedulerOptions,
    probe: Arc<dyn DestinationProbe>,
    executor: Arc<dyn TransferExecutor>,
    stats: Arc<RunStats>,
}

impl DistributionScheduler {
    pub fn new(
        options: SchedulerOptions,
        probe: Arc<dyn DestinationProbe>,
        executor: Arc<dyn TransferExecutor>,
        stats: Arc<RunStats>,
    ) -> Self {
        Self {
            options,
            probe,
            executor,
            stats,
        }
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.options.destinations
    }

    /// Find every eligible plot across the staging directories.
    pub async fn scan(&self) -> Result<Vec<PlotFile>> {
        let mut plots = Vec::new();
        for source in &self.options.sources {
            for path in find_files_with_extension(source, &self.options.extension).await? {
                plots.push(PlotFile::new(path));
            }
        }
        Ok(plots)
    }

    /// Scan staging and distribute everything found.
    ///
    /// Returns once every worker has stopped. Only a failed scan is an error.
    pub async fn drain(&self, cancel: &CancellationToken) -> Result<DrainReport> {
        let plots = self.scan().await?;
        let queue = Arc::new(WorkQueue::new());
        let discovered = plots
            .into_iter()
            .filter(|plot| queue.enqueue(plot.clone()))
            .count();

        if discovered == 0 {
            return Ok(DrainReport::default());
        }
        info!(count = discovered, "Found existing plots to move");

        let reports = self.run_workers(&queue, cancel).await;

        let counts = queue.counts();
        let pending_files = queue.pending_files();
        let excluded_destinations = reports
            .into_iter()
            .filter(|r| r.exit.is_excluded())
            .map(|r| (r.destination, r.exit))
            .collect();

        let report = DrainReport {
            discovered,
            delivered: counts.delivered,
            remaining: counts.pending + counts.in_transit,
            deferred: counts.deferred,
            vanished: counts.vanished,
            excluded_destinations,
            pending_files,
        };

        if report.remaining > 0 && !cancel.is_cancelled() {
            warn!(
                remaining = report.remaining,
                "Plots remaining but no destinations have space"
            );
        }
        info!(
            delivered = report.delivered,
            remaining = report.remaining,
            deferred = report.deferred,
            vanished = report.vanished,
            "Drain pass finished"
        );
        Ok(report)
    }

    async fn run_workers(
        &self,
        queue: &Arc<WorkQueue>,
        cancel: &CancellationToken,
    ) -> Vec<WorkerReport> {
        let mut order = self.options.destinations.clone();
        if self.options.shuffle {
            order.shuffle(&mut rand::rng());
        }

        let ctx = WorkerContext {
            queue: Arc::clone(queue),
            probe: Arc::clone(&self.probe),
            executor: Arc::clone(&self.executor),
            stats: Arc::clone(&self.stats),
            unknown_backoff: self.options.unknown_backoff,
            cancel: cancel.clone(),
        };

        let mut join_set = JoinSet::new();
        for destination in order {
            let worker = DestinationWorker::new(destination, ctx.clone());
            join_set.spawn(worker.run());
        }

        let mut reports = Vec::with_capacity(join_set.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                // The worker's claim guard already returned its file to the queue.
                Err(e) => error!(error = %e, "Destination worker panicked"),
            }
        }
        reports
    }
}
