//! Moving one plot to one destination with rsync.

use std::ffi::OsString;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info, warn};

use super::types::{Destination, PlotFile, TransferOutcome};
use crate::config::TransferConfig;
use crate::utils::command::{describe, run_captured};
use crate::utils::format::{format_bytes, mib_per_sec};

/// How an exit code of the transfer tool is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    Success,
    /// Network trouble; try again later.
    Retryable,
    /// File I/O failure at the destination, usually a full drive.
    Exhausted,
    /// Anything else, including death by signal.
    Unknown,
}

/// Classify an rsync exit code.
pub fn classify_exit(code: Option<i32>) -> ExitClass {
    match code {
        Some(0) => ExitClass::Success,
        // socket I/O, protocol data stream, data send/receive timeout, daemon connect timeout
        Some(10 | 12 | 30 | 35) => ExitClass::Retryable,
        // file I/O, partial transfer
        Some(11 | 23) => ExitClass::Exhausted,
        _ => ExitClass::Unknown,
    }
}

/// Executes a single transfer.
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    /// Transfer `file` (whose size at claim time was `bytes`) to `destination`.
    async fn transfer(&self, file: &PlotFile, bytes: u64, destination: &Destination)
    -> TransferOutcome;
}

/// Build the rsync invocation shared by transfers and reachability probes.
pub(crate) fn rsync_command(config: &TransferConfig) -> Command {
    process_utils::prioritized_command(&config.program, config.io_priority())
}

/// [`TransferExecutor`] that shells out to rsync in move mode.
#[derive(Debug, Clone)]
pub struct RsyncExecutor {
    config: TransferConfig,
}

impl RsyncExecutor {
    pub fn new(config: TransferConfig) -> Self {
        Self { config }
    }

    /// Flags placed before the source path.
    fn flags(&self) -> Vec<OsString> {
        let config = &self.config;
        let mut flags: Vec<OsString> = vec!["--remove-source-files".into()];
        if config.preallocate {
            flags.push("--preallocate".into());
        }
        if config.whole_file {
            flags.push("--whole-file".into());
        }
        if let Some(limit) = config.bwlimit {
            flags.push(format!("--bwlimit={}", limit).into());
        }
        if config.show_progress() {
            flags.push("--progress".into());
            flags.push("-h".into());
        }
        flags.extend(config.extra_args.iter().map(OsString::from));
        flags
    }

    fn command(&self, file: &PlotFile, destination: &Destination) -> Command {
        let mut cmd = rsync_command(&self.config);
        cmd.args(self.flags());
        cmd.arg(file.path());
        cmd.arg(destination.address());
        cmd
    }
}

#[async_trait]
impl TransferExecutor for RsyncExecutor {
    async fn transfer(
        &self,
        file: &PlotFile,
        bytes: u64,
        destination: &Destination,
    ) -> TransferOutcome {
        let mut cmd = self.command(file, destination);
        let command_line = describe(&cmd);
        info!(
            plot = %file,
            destination = %destination,
            size = %format_bytes(bytes),
            "Transferring plot"
        );

        let output = match run_captured(&mut cmd).await {
            Ok(output) => output,
            Err(e) => {
                error!(destination = %destination, error = %e, "Could not start transfer");
                return TransferOutcome::Unknown(None);
            }
        };

        let detail = output.last_error_line().unwrap_or_default();
        match (classify_exit(output.exit_code), output.exit_code) {
            (ExitClass::Success, _) => {
                info!(
                    plot = %file,
                    destination = %destination,
                    "Transfer complete: {:.2} MiB/s ({:.1?})",
                    mib_per_sec(bytes, output.duration),
                    output.duration
                );
                TransferOutcome::Success {
                    bytes,
                    duration: output.duration,
                }
            }
            (ExitClass::Retryable, Some(code)) => {
                warn!(
                    destination = %destination,
                    code,
                    detail,
                    "'{}' hit a network fault, will retry later",
                    command_line
                );
                TransferOutcome::RetryableIoFault { code }
            }
            (ExitClass::Exhausted, Some(code)) => {
                warn!(
                    destination = %destination,
                    code,
                    detail,
                    "'{}' hit a file I/O fault, destination is likely full",
                    command_line
                );
                TransferOutcome::DestinationExhausted { code }
            }
            (_, code) => {
                error!(
                    destination = %destination,
                    code = ?code,
                    detail,
                    "'{}' exited unexpectedly",
                    command_line
                );
                TransferOutcome::Unknown(code)
            }
        }
    }
}
