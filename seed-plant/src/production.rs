//! Plot generation on the staging volume.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::config::GeneratorConfig;
use crate::distribution::FreeSpace;
use crate::distribution::probe::query_free_space;
use crate::resource::SpaceQuery;
use crate::stats::RunStats;
use crate::utils::command::{describe, run_captured};
use crate::utils::format::format_bytes;

/// Result of one generator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Completed { duration: Duration },
    Failed { exit_code: Option<i32> },
}

/// Something that writes a batch of plots into staging.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn run_batch(&self) -> BatchOutcome;
}

/// [`Generator`] backed by the `bladebit_cuda` executable.
#[derive(Debug, Clone)]
pub struct BladebitGenerator {
    config: GeneratorConfig,
}

impl BladebitGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    fn command(&self) -> Command {
        let config = &self.config;
        let mut cmd = process_utils::tokio_command(&config.program);
        cmd.arg("-f")
            .arg(&config.farmer_key)
            .arg("-c")
            .arg(&config.contract_key)
            .arg("-n")
            .arg(config.batch_size.to_string())
            .arg("--compress")
            .arg(config.compression_level.to_string())
            .args(&config.extra_args)
            .arg(&config.mode)
            .arg(&config.output_dir);
        cmd
    }
}

#[async_trait]
impl Generator for BladebitGenerator {
    async fn run_batch(&self) -> BatchOutcome {
        let mut cmd = self.command();
        match run_captured(&mut cmd).await {
            Ok(output) if output.success() => BatchOutcome::Completed {
                duration: output.duration,
            },
            Ok(output) => {
                if let Some(line) = output.last_error_line() {
                    error!(program = %self.config.program, "Generator error: {}", line);
                }
                BatchOutcome::Failed {
                    exit_code: output.exit_code,
                }
            }
            Err(e) => {
                error!(command = %describe(&cmd), error = %e, "Generator could not run");
                BatchOutcome::Failed { exit_code: None }
            }
        }
    }
}

/// Decides when to generate and keeps the created-plot count.
pub struct ProductionController {
    config: GeneratorConfig,
    generator: Arc<dyn Generator>,
    space: Arc<dyn SpaceQuery>,
    require_mount: bool,
    stats: Arc<RunStats>,
}

impl ProductionController {
    pub fn new(
        config: GeneratorConfig,
        generator: Arc<dyn Generator>,
        space: Arc<dyn SpaceQuery>,
        require_mount: bool,
        stats: Arc<RunStats>,
    ) -> Self {
        Self {
            config,
            generator,
            space,
            require_mount,
            stats,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Whether staging can hold another full batch.
    pub async fn has_room(&self) -> bool {
        let required = self.config.required_staging_bytes();
        let output_dir = &self.config.output_dir;

        match query_free_space(Arc::clone(&self.space), output_dir, self.require_mount).await {
            FreeSpace::Available(free) if free >= required => true,
            FreeSpace::Available(free) => {
                info!(
                    free = %format_bytes(free),
                    required = %format_bytes(required),
                    "Not enough space for plotting"
                );
                false
            }
            FreeSpace::Unavailable => {
                warn!(path = %output_dir.display(), "Plotting destination is not available");
                false
            }
        }
    }

    /// Run one batch. Counts `batch_size` plots on success.
    pub async fn produce(&self) -> bool {
        info!(
            count = self.config.batch_size,
            path = %self.config.output_dir.display(),
            "Creating plots"
        );
        match self.generator.run_batch().await {
            BatchOutcome::Completed { duration } => {
                // The generator's own count is trusted, not re-checked against the disk.
                self.stats.record_created(u64::from(self.config.batch_size));
                info!("Plot creation completed in {:.1?}", duration);
                true
            }
            BatchOutcome::Failed { exit_code } => {
                error!(code = ?exit_code, "Plot creation failed");
                false
            }
        }
    }
}
