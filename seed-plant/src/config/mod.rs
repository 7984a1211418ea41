//! Static configuration, loaded once at startup.
//!
//! The configuration is a TOML document. Every component receives the parts it
//! needs by reference; nothing reads process-wide mutable state.

mod validate;

use std::path::{Path, PathBuf};
use std::time::Duration;

use process_utils::IoPriority;
use serde::{Deserialize, Serialize};

use crate::distribution::Destination;
use crate::utils::fs::io_error;
use crate::{Error, Result};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "seed-plant.toml";

fn default_true() -> bool {
    true
}

fn default_plot_extension() -> String {
    "plot".to_string()
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Staging directories scanned for finished plots.
    pub sources: Vec<PathBuf>,

    /// Extension of eligible plot files.
    #[serde(default = "default_plot_extension")]
    pub plot_extension: String,

    /// Transfer destinations.
    pub destinations: Vec<DestinationEntry>,

    /// Shuffle destination order on every drain pass.
    #[serde(default = "default_true")]
    pub shuffle_destinations: bool,

    /// Require local destinations (and the staging volume) to be mount points.
    #[serde(default = "default_true")]
    pub require_mount: bool,

    #[serde(default)]
    pub transfer: TransferConfig,

    pub generator: GeneratorConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub logging: LoggingSection,
}

/// A destination, either as a bare address or with extra settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DestinationEntry {
    Address(String),
    Detailed {
        address: String,
        /// Local path whose free space stands in for the destination.
        #[serde(default)]
        stat_path: Option<PathBuf>,
        /// Display name used in logs.
        #[serde(default)]
        name: Option<String>,
    },
}

impl DestinationEntry {
    pub fn address(&self) -> &str {
        match self {
            DestinationEntry::Address(address) => address,
            DestinationEntry::Detailed { address, .. } => address,
        }
    }

    pub fn to_destination(&self) -> Destination {
        match self {
            DestinationEntry::Address(address) => Destination::new(address.clone()),
            DestinationEntry::Detailed {
                address,
                stat_path,
                name,
            } => {
                let mut destination = Destination::new(address.clone());
                if let Some(path) = stat_path {
                    destination = destination.with_stat_path(path.clone());
                }
                if let Some(name) = name {
                    destination = destination.with_name(name.clone());
                }
                destination
            }
        }
    }
}

/// Settings for the external transfer tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Transfer program (rsync-compatible).
    #[serde(default = "default_transfer_program")]
    pub program: String,
    /// Bandwidth limit in KiB/s.
    #[serde(default)]
    pub bwlimit: Option<u64>,
    /// Pass `--preallocate`. Remove for FAT/NTFS destinations.
    #[serde(default = "default_true")]
    pub preallocate: bool,
    /// Pass `--whole-file`.
    #[serde(default = "default_true")]
    pub whole_file: bool,
    /// Pass `--progress -h`. Ignored when a bandwidth limit is set.
    #[serde(default = "default_true")]
    pub progress: bool,
    /// Extra arguments placed before the source path.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Small local file sent to check a destination is reachable.
    #[serde(default = "default_probe_artifact")]
    pub probe_artifact: PathBuf,
    /// Wrap transfer processes in `ionice`.
    #[serde(default = "default_true")]
    pub use_ionice: bool,
    /// I/O priority applied when `use_ionice` is set.
    #[serde(default)]
    pub ionice: IoPriority,
}

impl TransferConfig {
    /// Priority to apply to transfer processes, if any.
    pub fn io_priority(&self) -> Option<&IoPriority> {
        self.use_ionice.then_some(&self.ionice)
    }

    /// Progress output is suppressed while a bandwidth limit is in force.
    pub fn show_progress(&self) -> bool {
        self.progress && self.bwlimit.is_none()
    }
}

fn default_transfer_program() -> String {
    "rsync".to_string()
}

fn default_probe_artifact() -> PathBuf {
    PathBuf::from("/etc/hostname")
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            program: default_transfer_program(),
            bwlimit: None,
            preallocate: true,
            whole_file: true,
            progress: true,
            extra_args: Vec::new(),
            probe_artifact: default_probe_artifact(),
            use_ionice: true,
            ionice: IoPriority::idle(),
        }
    }
}

/// Settings for the plot generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Run the generator at all. When false the process only distributes.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_generator_program")]
    pub program: String,
    #[serde(default)]
    pub farmer_key: String,
    #[serde(default)]
    pub contract_key: String,
    /// Plots per generator invocation.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_compression_level")]
    pub compression_level: u8,
    /// Generator sub-command, e.g. `cudaplot`.
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Directory the generator writes plots into.
    pub output_dir: PathBuf,
    /// Expected size of one plot, used for the staging room check.
    #[serde(default = "default_plot_size_estimate")]
    pub plot_size_estimate_bytes: u64,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_generator_program() -> String {
    "./bladebit_cuda".to_string()
}

fn default_batch_size() -> u32 {
    20
}

fn default_compression_level() -> u8 {
    7
}

fn default_mode() -> String {
    "cudaplot".to_string()
}

fn default_plot_size_estimate() -> u64 {
    84_000_000_000
}

impl GeneratorConfig {
    /// Free bytes the staging volume needs before a batch may start.
    pub fn required_staging_bytes(&self) -> u64 {
        self.plot_size_estimate_bytes
            .saturating_mul(u64::from(self.batch_size))
    }
}

/// Sleep durations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Wait after a failed generator run or when staging has no room.
    #[serde(default = "default_short_backoff")]
    pub short_backoff_secs: u64,
    /// Wait after an unexpected transfer exit code or a loop-level error.
    #[serde(default = "default_long_backoff")]
    pub long_backoff_secs: u64,
    /// Pause after a successful generator run.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,
}

fn default_short_backoff() -> u64 {
    60
}

fn default_long_backoff() -> u64 {
    180
}

fn default_settle_delay() -> u64 {
    5
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            short_backoff_secs: default_short_backoff(),
            long_backoff_secs: default_long_backoff(),
            settle_delay_secs: default_settle_delay(),
        }
    }
}

impl TimingConfig {
    pub fn short_backoff(&self) -> Duration {
        Duration::from_secs(self.short_backoff_secs)
    }

    pub fn long_backoff(&self) -> Duration {
        Duration::from_secs(self.long_backoff_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Directory for rolling log files; console only when absent.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_log_filter() -> String {
    crate::logging::DEFAULT_LOG_FILTER.to_string()
}

fn default_retention_days() -> i64 {
    7
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            dir: None,
            filter: default_log_filter(),
            retention_days: default_retention_days(),
        }
    }
}

impl AppConfig {
    /// Parse a configuration document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::config(format!("Invalid configuration: {}", e)))
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| io_error("reading configuration", path, e))?;
        Self::from_toml_str(&raw)
    }

    /// Destinations in configured order.
    pub fn destination_list(&self) -> Vec<Destination> {
        self.destinations
            .iter()
            .map(DestinationEntry::to_destination)
            .collect()
    }
}
