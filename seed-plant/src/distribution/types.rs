//! Plot files, destinations and transfer outcomes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A generated plot waiting on the staging volume.
///
/// The size is deliberately not stored: it is read from disk when a worker
/// claims the file, so it always reflects the final on-disk state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlotFile {
    path: PathBuf,
}

impl PlotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for PlotFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// A configured transfer target.
///
/// `address` is whatever the transfer tool accepts: a local directory or a
/// remote `host::module` address. Reachability and fullness are never stored
/// here; they are probed before every attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    address: String,
    stat_path: Option<PathBuf>,
    name: Option<String>,
}

impl Destination {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            stat_path: None,
            name: None,
        }
    }

    /// Local path whose free space stands in for this destination.
    pub fn with_stat_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stat_path = Some(path.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn stat_path(&self) -> Option<&Path> {
        self.stat_path.as_deref()
    }

    /// Name used in logs; defaults to the address.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }

    /// Whether the address names a remote endpoint rather than a local path.
    pub fn is_remote(&self) -> bool {
        if self.address.contains("::") || self.address.starts_with("rsync://") {
            return true;
        }
        // `host:path`, but not a bare local path that merely contains a colon
        match self.address.split_once(':') {
            Some((host, _)) => !host.is_empty() && !host.contains('/'),
            None => false,
        }
    }

    /// Local path to stat for free space, if any.
    pub fn space_path(&self) -> Option<&Path> {
        match self.stat_path() {
            Some(path) => Some(path),
            None if !self.is_remote() => Some(Path::new(&self.address)),
            None => None,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of a destination free-space probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeSpace {
    /// Free bytes reported by the destination.
    Available(u64),
    /// The destination could not be statted right now. This is not "full".
    Unavailable,
}

/// Classified result of one transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Success { bytes: u64, duration: Duration },
    /// Transient fault; the file may be retried later.
    RetryableIoFault { code: i32 },
    /// The destination cannot take more data this run.
    DestinationExhausted { code: i32 },
    /// Unrecognised exit (or none at all); handled like exhaustion.
    Unknown(Option<i32>),
}
