//! One mover per destination.
//!
//! A worker keeps pulling files from the shared queue until the queue is empty
//! or its destination drops out of rotation. Everything that goes wrong with a
//! single file or destination ends up in the [`WorkerReport`]; nothing here
//! returns an error to the scheduler.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::probe::DestinationProbe;
use super::queue::{Completion, WorkQueue};
use super::transfer::TransferExecutor;
use super::types::{Destination, FreeSpace, TransferOutcome};
use crate::stats::RunStats;
use crate::utils::format::format_bytes;
use crate::utils::fs::{file_size, remove_file_if_exists};

/// Why a worker stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Nothing left to take.
    QueueDrained,
    /// Shutdown requested.
    Cancelled,
    /// The connection test failed.
    Unreachable,
    /// Free space could not be determined.
    SpaceUnavailable,
    /// The next file does not fit.
    InsufficientSpace { free: u64, needed: u64 },
    /// The transfer tool reported a destination-side failure.
    TransferFailed(TransferOutcome),
}

impl WorkerExit {
    /// Whether the destination left rotation for the rest of the pass.
    pub fn is_excluded(&self) -> bool {
        !matches!(self, WorkerExit::QueueDrained | WorkerExit::Cancelled)
    }
}

/// What one worker did during a pass.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub destination: Destination,
    pub delivered: usize,
    pub bytes: u64,
    pub exit: WorkerExit,
}

/// Shared collaborators handed to every worker of a pass.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<WorkQueue>,
    pub probe: Arc<dyn DestinationProbe>,
    pub executor: Arc<dyn TransferExecutor>,
    pub stats: Arc<RunStats>,
    /// Sleep after an unrecognised transfer failure.
    pub unknown_backoff: Duration,
    pub cancel: CancellationToken,
}

pub struct DestinationWorker {
    destination: Destination,
    ctx: WorkerContext,
}

impl DestinationWorker {
    pub fn new(destination: Destination, ctx: WorkerContext) -> Self {
        Self { destination, ctx }
    }

    pub async fn run(self) -> WorkerReport {
        let mut delivered = 0;
        let mut bytes = 0;
        let exit = self.drive(&mut delivered, &mut bytes).await;

        match &exit {
            WorkerExit::QueueDrained | WorkerExit::Cancelled => debug!(
                destination = %self.destination,
                delivered,
                "Worker finished"
            ),
            excluded => info!(
                destination = %self.destination,
                delivered,
                reason = ?excluded,
                "Destination out of rotation for this pass"
            ),
        }

        WorkerReport {
            destination: self.destination,
            delivered,
            bytes,
            exit,
        }
    }

    async fn drive(&self, delivered: &mut usize, moved: &mut u64) -> WorkerExit {
        let ctx = &self.ctx;
        let destination = &self.destination;

        loop {
            let Some(claim) = ctx.queue.next_claim(&ctx.cancel).await else {
                return if ctx.cancel.is_cancelled() {
                    WorkerExit::Cancelled
                } else {
                    WorkerExit::QueueDrained
                };
            };
            let plot = claim.file().clone();

            let size = match file_size(plot.path()).await {
                Ok(Some(size)) => size,
                Ok(None) => {
                    debug!(plot = %plot, "Plot vanished before transfer");
                    claim.settle(Completion::Vanished);
                    continue;
                }
                Err(e) => {
                    warn!(plot = %plot, error = %e, "Cannot read plot, leaving it for the next scan");
                    claim.settle(Completion::Deferred);
                    continue;
                }
            };

            if !ctx.probe.reachable(destination).await {
                warn!(destination = %destination, "Destination not accessible, skipping");
                claim.requeue();
                return WorkerExit::Unreachable;
            }

            match ctx.probe.free_space(destination).await {
                FreeSpace::Unavailable => {
                    warn!(destination = %destination, "Free space unavailable, skipping");
                    claim.requeue();
                    return WorkerExit::SpaceUnavailable;
                }
                FreeSpace::Available(free) if free < size => {
                    info!(
                        destination = %destination,
                        free = %format_bytes(free),
                        needed = %format_bytes(size),
                        "Destination is full"
                    );
                    claim.requeue();
                    return WorkerExit::InsufficientSpace { free, needed: size };
                }
                FreeSpace::Available(_) => {}
            }

            let outcome = ctx.executor.transfer(&plot, size, destination).await;
            match outcome {
                TransferOutcome::Success { bytes, duration } => {
                    // rsync already moved it; only a copying tool leaves the source behind
                    if let Err(e) = remove_file_if_exists(plot.path()).await {
                        warn!(plot = %plot, error = %e, "Transferred but could not remove source");
                    }
                    ctx.stats.record_transfer(bytes, duration);
                    *delivered += 1;
                    *moved += bytes;
                    claim.settle(Completion::Delivered);
                }
                TransferOutcome::RetryableIoFault { code } => {
                    warn!(plot = %plot, destination = %destination, code, "Transfer interrupted, plot left for the next scan");
                    claim.settle(Completion::Deferred);
                }
                TransferOutcome::DestinationExhausted { .. } => {
                    claim.requeue();
                    return WorkerExit::TransferFailed(outcome);
                }
                TransferOutcome::Unknown(_) => {
                    claim.requeue();
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => {}
                        _ = tokio::time::sleep(ctx.unknown_backoff) => {}
                    }
                    return WorkerExit::TransferFailed(outcome);
                }
            }
        }
    }
}
