//! Free space and mount status for local volumes.
//!
//! Queries are synchronous OS calls; async callers run them on the blocking pool.

use std::path::{Path, PathBuf};

use sysinfo::Disks;
use tracing::debug;

use crate::utils::fs::io_error;
use crate::{Error, Result};

/// Mount status and free space of the volume holding a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpace {
    /// Whether the path itself is a mount point.
    pub mounted: bool,
    /// Bytes available to unprivileged writers on the containing volume.
    pub available_bytes: u64,
}

/// Source of disk space information.
pub trait SpaceQuery: Send + Sync {
    fn query(&self, path: &Path) -> Result<DiskSpace>;
}

/// `SpaceQuery` backed by the host's mounted disks.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDisks;

impl SystemDisks {
    pub fn new() -> Self {
        Self
    }
}

impl SpaceQuery for SystemDisks {
    fn query(&self, path: &Path) -> Result<DiskSpace> {
        let resolved = std::fs::canonicalize(path).map_err(|e| io_error("resolving", path, e))?;

        // Mounts change while we run, so the list is rebuilt on every query.
        let disks = Disks::new_with_refreshed_list();
        let mounts = disks
            .list()
            .iter()
            .map(|disk| (disk.mount_point().to_path_buf(), disk.available_space()));

        let space = lookup(&resolved, mounts).ok_or_else(|| {
            Error::Other(format!("No mounted volume contains {}", resolved.display()))
        })?;
        debug!(
            path = %resolved.display(),
            mounted = space.mounted,
            available_bytes = space.available_bytes,
            "Disk space query"
        );
        Ok(space)
    }
}

/// Pick the most specific mount point containing `path`.
fn lookup(path: &Path, mounts: impl IntoIterator<Item = (PathBuf, u64)>) -> Option<DiskSpace> {
    let mut best: Option<(PathBuf, u64)> = None;

    for (mount_point, available) in mounts {
        if !path.starts_with(&mount_point) {
            continue;
        }
        let depth = mount_point.components().count();
        if best
            .as_ref()
            .is_none_or(|(current, _)| depth > current.components().count())
        {
            best = Some((mount_point, available));
        }
    }

    best.map(|(mount_point, available_bytes)| DiskSpace {
        mounted: mount_point == path,
        available_bytes,
    })
}
