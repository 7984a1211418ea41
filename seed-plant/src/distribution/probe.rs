//! Reachability and free-space checks for destinations.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::transfer::rsync_command;
use super::types::{Destination, FreeSpace};
use crate::config::TransferConfig;
use crate::resource::SpaceQuery;
use crate::utils::command::run_captured;

/// Read-only questions about a destination's current state.
#[async_trait]
pub trait DestinationProbe: Send + Sync {
    /// Whether the transfer tool can currently complete a round trip.
    async fn reachable(&self, destination: &Destination) -> bool;

    /// Free bytes at the destination, or `Unavailable` if it cannot be statted.
    async fn free_space(&self, destination: &Destination) -> FreeSpace;
}

/// Probe that sends a small artifact with rsync and stats local paths.
pub struct RsyncProbe {
    transfer: TransferConfig,
    space: Arc<dyn SpaceQuery>,
    require_mount: bool,
}

impl RsyncProbe {
    pub fn new(transfer: TransferConfig, space: Arc<dyn SpaceQuery>, require_mount: bool) -> Self {
        Self {
            transfer,
            space,
            require_mount,
        }
    }
}

#[async_trait]
impl DestinationProbe for RsyncProbe {
    async fn reachable(&self, destination: &Destination) -> bool {
        let mut cmd = rsync_command(&self.transfer);
        cmd.arg(&self.transfer.probe_artifact);
        cmd.arg(destination.address());

        match run_captured(&mut cmd).await {
            Ok(output) if output.success() => true,
            Ok(output) => {
                warn!(
                    destination = %destination,
                    code = ?output.exit_code,
                    detail = output.last_error_line().unwrap_or_default(),
                    "Connection test failed"
                );
                false
            }
            Err(e) => {
                warn!(destination = %destination, error = %e, "Connection test could not run");
                false
            }
        }
    }

    async fn free_space(&self, destination: &Destination) -> FreeSpace {
        let Some(path) = destination.space_path() else {
            debug!(destination = %destination, "No local path to stat for remote destination");
            return FreeSpace::Unavailable;
        };
        // A stat proxy may be any directory on the volume; only the address itself must be a mount.
        let must_be_mount = self.require_mount && destination.stat_path().is_none();
        query_free_space(Arc::clone(&self.space), path, must_be_mount).await
    }
}

/// Run a space query on the blocking pool and fold every failure into `Unavailable`.
pub async fn query_free_space(
    space: Arc<dyn SpaceQuery>,
    path: &Path,
    require_mount: bool,
) -> FreeSpace {
    let owned = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || space.query(&owned)).await;

    match result {
        Ok(Ok(disk)) if require_mount && !disk.mounted => {
            warn!(path = %path.display(), "Not a mount point");
            FreeSpace::Unavailable
        }
        Ok(Ok(disk)) => FreeSpace::Available(disk.available_bytes),
        Ok(Err(e)) => {
            warn!(path = %path.display(), error = %e, "Free space query failed");
            FreeSpace::Unavailable
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Free space query panicked");
            FreeSpace::Unavailable
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::resource::DiskSpace;
    use crate::{Error, Result};

    struct FixedSpace(Option<DiskSpace>);

    impl SpaceQuery for FixedSpace {
        fn query(&self, path: &Path) -> Result<DiskSpace> {
            self.0
                .ok_or_else(|| Error::Other(format!("no volume for {}", path.display())))
        }
    }

    fn probe(space: Option<DiskSpace>, require_mount: bool) -> RsyncProbe {
        RsyncProbe::new(
            TransferConfig::default(),
            Arc::new(FixedSpace(space)),
            require_mount,
        )
    }

    const MOUNTED: DiskSpace = DiskSpace {
        mounted: true,
        available_bytes: 500,
    };
    const UNMOUNTED: DiskSpace = DiskSpace {
        mounted: false,
        available_bytes: 500,
    };

    #[tokio::test]
    async fn test_local_mount_reports_free_space() {
        let free = probe(Some(MOUNTED), true)
            .free_space(&Destination::new("/mnt/hdd1"))
            .await;
        assert_eq!(free, FreeSpace::Available(500));
    }

    #[tokio::test]
    async fn test_unmounted_destination_is_unavailable() {
        let dest = Destination::new("/mnt/hdd1");
        assert_eq!(
            probe(Some(UNMOUNTED), true).free_space(&dest).await,
            FreeSpace::Unavailable
        );
        assert_eq!(
            probe(Some(UNMOUNTED), false).free_space(&dest).await,
            FreeSpace::Available(500)
        );
    }

    #[tokio::test]
    async fn test_stat_path_skips_mount_requirement() {
        let dest = Destination::new("10.0.0.5::farm").with_stat_path(PathBuf::from("/mnt/nfs/x"));
        assert_eq!(
            probe(Some(UNMOUNTED), true).free_space(&dest).await,
            FreeSpace::Available(500)
        );
    }

    #[tokio::test]
    async fn test_remote_without_stat_path_is_unavailable() {
        let free = probe(Some(MOUNTED), true)
            .free_space(&Destination::new("10.0.0.5::farm"))
            .await;
        assert_eq!(free, FreeSpace::Unavailable);
    }

    #[tokio::test]
    async fn test_query_error_is_unavailable() {
        let free = probe(None, false)
            .free_space(&Destination::new("/mnt/hdd1"))
            .await;
        assert_eq!(free, FreeSpace::Unavailable);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reachable_follows_exit_status() {
        let mut transfer = TransferConfig {
            program: "true".to_string(),
            use_ionice: false,
            ..TransferConfig::default()
        };
        let ok = RsyncProbe::new(transfer.clone(), Arc::new(FixedSpace(None)), true);
        assert!(ok.reachable(&Destination::new("/mnt/hdd1")).await);

        transfer.program = "false".to_string();
        let down = RsyncProbe::new(transfer, Arc::new(FixedSpace(None)), true);
        assert!(!down.reachable(&Destination::new("/mnt/hdd1")).await);
    }
}
