//! Fake destinations, transfers and generators shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use seed_plant::distribution::{
    Destination, DestinationProbe, DistributionScheduler, FreeSpace, PlotFile, SchedulerOptions,
    TransferExecutor, TransferOutcome,
};
use seed_plant::production::{BatchOutcome, Generator};
use seed_plant::resource::{DiskSpace, SpaceQuery};
use seed_plant::stats::RunStats;

/// Scripted result for the next transfer to a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scripted {
    Retryable,
    Exhausted,
    Unknown,
}

#[derive(Debug)]
struct FakeDestination {
    reachable: bool,
    /// `None` means the destination cannot be statted.
    free: Option<u64>,
    script: VecDeque<Scripted>,
}

/// One successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub plot: PathBuf,
    pub destination: String,
    pub bytes: u64,
}

/// In-memory farm of destinations, acting as both probe and transfer tool.
///
/// Successful transfers delete the source file and consume free space, the
/// way `rsync --remove-source-files` into a real disk would.
#[derive(Debug, Default)]
pub struct FakeFarm {
    destinations: Mutex<HashMap<String, FakeDestination>>,
    deliveries: Mutex<Vec<Delivery>>,
    attempts: Mutex<Vec<(PathBuf, String)>>,
    /// Transfers whose size exceeded the free space at the time.
    overfills: AtomicUsize,
    /// When set, every transfer stays in flight until this token fires.
    release: Mutex<Option<CancellationToken>>,
}

impl FakeFarm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, address: &str, free: Option<u64>, reachable: bool) {
        self.destinations.lock().insert(
            address.to_string(),
            FakeDestination {
                reachable,
                free,
                script: VecDeque::new(),
            },
        );
    }

    pub fn script(&self, address: &str, outcomes: &[Scripted]) {
        if let Some(dest) = self.destinations.lock().get_mut(address) {
            dest.script.extend(outcomes.iter().copied());
        }
    }

    /// Keep transfers in flight until `release` fires.
    pub fn hold_transfers_until(&self, release: CancellationToken) {
        *self.release.lock() = Some(release);
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    pub fn delivered_to(&self, address: &str) -> usize {
        self.deliveries
            .lock()
            .iter()
            .filter(|d| d.destination == address)
            .count()
    }

    pub fn attempts_to(&self, address: &str) -> usize {
        self.attempts
            .lock()
            .iter()
            .filter(|(_, dest)| dest == address)
            .count()
    }

    pub fn overfills(&self) -> usize {
        self.overfills.load(Ordering::SeqCst)
    }

    pub fn destinations(&self) -> Vec<Destination> {
        let mut names: Vec<_> = self.destinations.lock().keys().cloned().collect();
        names.sort();
        names.into_iter().map(Destination::new).collect()
    }
}

#[async_trait]
impl DestinationProbe for FakeFarm {
    async fn reachable(&self, destination: &Destination) -> bool {
        self.destinations
            .lock()
            .get(destination.address())
            .is_some_and(|d| d.reachable)
    }

    async fn free_space(&self, destination: &Destination) -> FreeSpace {
        match self
            .destinations
            .lock()
            .get(destination.address())
            .and_then(|d| d.free)
        {
            Some(free) => FreeSpace::Available(free),
            None => FreeSpace::Unavailable,
        }
    }
}

#[async_trait]
impl TransferExecutor for FakeFarm {
    async fn transfer(
        &self,
        file: &PlotFile,
        bytes: u64,
        destination: &Destination,
    ) -> TransferOutcome {
        let address = destination.address().to_string();
        self.attempts
            .lock()
            .push((file.path().to_path_buf(), address.clone()));

        // Let other workers interleave.
        tokio::time::sleep(Duration::from_millis(2)).await;
        let release = self.release.lock().clone();
        if let Some(release) = release {
            release.cancelled().await;
        }

        let scripted = {
            let mut destinations = self.destinations.lock();
            let Some(dest) = destinations.get_mut(&address) else {
                return TransferOutcome::Unknown(None);
            };
            match dest.script.pop_front() {
                Some(outcome) => Some(outcome),
                None => {
                    if let Some(free) = dest.free.as_mut() {
                        if bytes > *free {
                            self.overfills.fetch_add(1, Ordering::SeqCst);
                        }
                        *free = free.saturating_sub(bytes);
                    }
                    None
                }
            }
        };

        match scripted {
            Some(Scripted::Retryable) => TransferOutcome::RetryableIoFault { code: 10 },
            Some(Scripted::Exhausted) => TransferOutcome::DestinationExhausted { code: 11 },
            Some(Scripted::Unknown) => TransferOutcome::Unknown(Some(1)),
            None => {
                std::fs::remove_file(file.path()).ok();
                self.deliveries.lock().push(Delivery {
                    plot: file.path().to_path_buf(),
                    destination: address,
                    bytes,
                });
                TransferOutcome::Success {
                    bytes,
                    duration: Duration::from_millis(2),
                }
            }
        }
    }
}

/// Staging directory populated with plot files of a given size.
pub struct Staging {
    pub dir: TempDir,
}

impl Staging {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn add_plots(&self, count: usize, size: u64) -> Vec<PathBuf> {
        write_plots(self.path(), count, size)
    }

    pub fn plots_on_disk(&self) -> usize {
        std::fs::read_dir(self.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "plot"))
            .count()
    }
}

static PLOT_SEQ: AtomicUsize = AtomicUsize::new(0);

pub fn write_plots(dir: &Path, count: usize, size: u64) -> Vec<PathBuf> {
    (0..count)
        .map(|_| {
            let n = PLOT_SEQ.fetch_add(1, Ordering::SeqCst);
            let path = dir.join(format!("plot-k32-{n:05}.plot"));
            let file = std::fs::File::create(&path).unwrap();
            file.set_len(size).unwrap();
            path
        })
        .collect()
}

pub fn scheduler(
    staging: &Staging,
    farm: &Arc<FakeFarm>,
    stats: &Arc<RunStats>,
) -> DistributionScheduler {
    DistributionScheduler::new(
        SchedulerOptions {
            sources: vec![staging.path().to_path_buf()],
            extension: "plot".to_string(),
            destinations: farm.destinations(),
            shuffle: false,
            unknown_backoff: Duration::from_millis(10),
        },
        Arc::clone(farm) as Arc<dyn DestinationProbe>,
        Arc::clone(farm) as Arc<dyn TransferExecutor>,
        Arc::clone(stats),
    )
}

/// Staging volume with a fixed answer, counting queries.
pub struct FakeSpace {
    pub space: Mutex<Option<DiskSpace>>,
    pub queries: AtomicUsize,
}

impl FakeSpace {
    pub fn with_free(available_bytes: u64) -> Arc<Self> {
        Arc::new(Self {
            space: Mutex::new(Some(DiskSpace {
                mounted: true,
                available_bytes,
            })),
            queries: AtomicUsize::new(0),
        })
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl SpaceQuery for FakeSpace {
    fn query(&self, path: &Path) -> seed_plant::Result<DiskSpace> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        (*self.space.lock()).ok_or_else(|| {
            seed_plant::Error::Other(format!("no volume for {}", path.display()))
        })
    }
}

/// Generator that either fails or writes a batch of small plots.
pub struct FakeGenerator {
    pub output_dir: Option<PathBuf>,
    pub batch: usize,
    pub plot_size: u64,
    pub calls: AtomicUsize,
    /// When set, a batch only finishes after this token fires.
    pub release: Option<CancellationToken>,
}

impl FakeGenerator {
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            output_dir: None,
            batch: 0,
            plot_size: 0,
            calls: AtomicUsize::new(0),
            release: None,
        })
    }

    pub fn writing(output_dir: &Path, batch: usize, plot_size: u64) -> Arc<Self> {
        Arc::new(Self {
            output_dir: Some(output_dir.to_path_buf()),
            batch,
            plot_size,
            calls: AtomicUsize::new(0),
            release: None,
        })
    }

    /// Writing generator whose batch runs until `release` fires.
    pub fn writing_until(
        output_dir: &Path,
        batch: usize,
        plot_size: u64,
        release: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            output_dir: Some(output_dir.to_path_buf()),
            batch,
            plot_size,
            calls: AtomicUsize::new(0),
            release: Some(release),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn run_batch(&self) -> BatchOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(release) = &self.release {
            release.cancelled().await;
        }
        match &self.output_dir {
            Some(dir) => {
                write_plots(dir, self.batch, self.plot_size);
                BatchOutcome::Completed {
                    duration: Duration::from_millis(1),
                }
            }
            None => BatchOutcome::Failed { exit_code: Some(1) },
        }
    }
}
