//! The main loop: drain, then produce, then drain again.
//!
//! The loop is an explicit state machine. Each state performs one step and
//! reports a [`LoopEvent`]; [`next_state`] maps that event to the next state
//! without doing any I/O, so every transition can be tested directly.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{AppConfig, TimingConfig};
use crate::distribution::{
    DistributionScheduler, DrainReport, RsyncExecutor, RsyncProbe, SchedulerOptions,
};
use crate::production::{BladebitGenerator, ProductionController};
use crate::resource::{SpaceQuery, SystemDisks};
use crate::stats::RunStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Draining,
    Producing,
    Waiting(Duration),
    Terminated(TerminationReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Plots are left over and no destination will take them.
    AllDestinationsExhausted { remaining: usize },
    /// Interrupted from outside.
    Shutdown,
    /// A single pass was requested and has finished.
    SinglePass,
}

/// What a step observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    Drained { remaining: usize },
    DrainFailed,
    NoRoom,
    BatchCreated,
    BatchFailed,
    GeneratorDisabled,
    WaitElapsed,
    Interrupted,
}

/// Loop parameters that shape transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopPolicy {
    pub short_backoff: Duration,
    pub long_backoff: Duration,
    pub settle_delay: Duration,
    /// Stop after the first drain instead of producing.
    pub single_pass: bool,
}

impl LoopPolicy {
    pub fn from_timing(timing: &TimingConfig, single_pass: bool) -> Self {
        Self {
            short_backoff: timing.short_backoff(),
            long_backoff: timing.long_backoff(),
            settle_delay: timing.settle_delay(),
            single_pass,
        }
    }
}

/// Pure transition function.
pub fn next_state(event: LoopEvent, policy: &LoopPolicy) -> LoopState {
    match event {
        LoopEvent::Interrupted => LoopState::Terminated(TerminationReason::Shutdown),
        LoopEvent::Drained { remaining } if remaining > 0 => {
            LoopState::Terminated(TerminationReason::AllDestinationsExhausted { remaining })
        }
        LoopEvent::Drained { .. } if policy.single_pass => {
            LoopState::Terminated(TerminationReason::SinglePass)
        }
        LoopEvent::Drained { .. } => LoopState::Producing,
        LoopEvent::DrainFailed => LoopState::Waiting(policy.long_backoff),
        LoopEvent::NoRoom | LoopEvent::BatchFailed | LoopEvent::GeneratorDisabled => {
            LoopState::Waiting(policy.short_backoff)
        }
        LoopEvent::BatchCreated => LoopState::Waiting(policy.settle_delay),
        LoopEvent::WaitElapsed => LoopState::Draining,
    }
}

/// How the loop ended.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub reason: TerminationReason,
    /// The last completed drain pass, if any.
    pub last_drain: Option<DrainReport>,
}

pub struct Runner {
    scheduler: DistributionScheduler,
    production: ProductionController,
    policy: LoopPolicy,
    stats: Arc<RunStats>,
}

impl Runner {
    pub fn new(
        scheduler: DistributionScheduler,
        production: ProductionController,
        policy: LoopPolicy,
        stats: Arc<RunStats>,
    ) -> Self {
        Self {
            scheduler,
            production,
            policy,
            stats,
        }
    }

    /// Wire up the real rsync, sysinfo and bladebit collaborators.
    pub fn from_config(config: &AppConfig, single_pass: bool, stats: Arc<RunStats>) -> Self {
        let space: Arc<dyn SpaceQuery> = Arc::new(SystemDisks::new());
        let probe = Arc::new(RsyncProbe::new(
            config.transfer.clone(),
            Arc::clone(&space),
            config.require_mount,
        ));
        let executor = Arc::new(RsyncExecutor::new(config.transfer.clone()));

        let scheduler = DistributionScheduler::new(
            SchedulerOptions {
                sources: config.sources.clone(),
                extension: config.plot_extension.clone(),
                destinations: config.destination_list(),
                shuffle: config.shuffle_destinations,
                unknown_backoff: config.timing.long_backoff(),
            },
            probe,
            executor,
            Arc::clone(&stats),
        );
        let production = ProductionController::new(
            config.generator.clone(),
            Arc::new(BladebitGenerator::new(config.generator.clone())),
            space,
            config.require_mount,
            Arc::clone(&stats),
        );

        Self::new(
            scheduler,
            production,
            LoopPolicy::from_timing(&config.timing, single_pass),
            stats,
        )
    }

    pub fn stats(&self) -> &Arc<RunStats> {
        &self.stats
    }

    /// Run until every destination is exhausted, a single pass ends, or `cancel` fires.
    pub async fn run(&self, cancel: &CancellationToken) -> RunOutcome {
        let mut state = LoopState::Draining;
        let mut last_drain = None;

        let reason = loop {
            let event = match state {
                LoopState::Terminated(reason) => break reason,
                _ if cancel.is_cancelled() => LoopEvent::Interrupted,
                LoopState::Draining => {
                    let event = self.drain_step(cancel, &mut last_drain).await;
                    if cancel.is_cancelled() {
                        LoopEvent::Interrupted
                    } else {
                        event
                    }
                }
                LoopState::Producing => self.produce_step().await,
                LoopState::Waiting(delay) => {
                    tokio::select! {
                        _ = cancel.cancelled() => LoopEvent::Interrupted,
                        _ = tokio::time::sleep(delay) => LoopEvent::WaitElapsed,
                    }
                }
            };
            state = next_state(event, &self.policy);
            if let LoopState::Waiting(delay) = state {
                info!("Waiting {:?} before next pass", delay);
            }
        };

        match reason {
            TerminationReason::AllDestinationsExhausted { remaining } => {
                warn!(remaining, "All destinations are full or unreachable, stopping");
            }
            TerminationReason::Shutdown => info!("Shutting down"),
            TerminationReason::SinglePass => info!("Single pass complete"),
        }
        if let Some(report) = &last_drain {
            for plot in &report.pending_files {
                warn!(plot = %plot, "Plot remaining in queue");
            }
        }

        RunOutcome { reason, last_drain }
    }

    async fn drain_step(
        &self,
        cancel: &CancellationToken,
        last_drain: &mut Option<DrainReport>,
    ) -> LoopEvent {
        match self.scheduler.drain(cancel).await {
            Ok(report) => {
                let remaining = report.remaining;
                *last_drain = Some(report);
                LoopEvent::Drained { remaining }
            }
            Err(e) => {
                error!(error = %e, "Error scanning for plots");
                LoopEvent::DrainFailed
            }
        }
    }

    async fn produce_step(&self) -> LoopEvent {
        if !self.production.enabled() {
            return LoopEvent::GeneratorDisabled;
        }
        if !self.production.has_room().await {
            return LoopEvent::NoRoom;
        }
        // An in-flight batch is allowed to finish even during shutdown.
        if self.production.produce().await {
            LoopEvent::BatchCreated
        } else {
            warn!("Plot creation failed, waiting before retry");
            LoopEvent::BatchFailed
        }
    }
}
