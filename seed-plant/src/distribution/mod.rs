//! Moving finished plots from staging to destinations.
//!
//! A drain pass scans the staging directories into a [`WorkQueue`] and runs one
//! [`DestinationWorker`] per destination against it. Workers probe their
//! destination before each file and drop out of rotation when it is unreachable
//! or full; the pass ends when every worker has stopped.

pub mod probe;
pub mod queue;
pub mod scheduler;
pub mod transfer;
pub mod types;
pub mod worker;

pub use probe::{DestinationProbe, RsyncProbe};
pub use queue::{Claim, Completion, QueueCounts, WorkQueue};
pub use scheduler::{DistributionScheduler, DrainReport, SchedulerOptions};
pub use transfer::{ExitClass, RsyncExecutor, TransferExecutor, classify_exit};
pub use types::{Destination, FreeSpace, PlotFile, TransferOutcome};
pub use worker::{DestinationWorker, WorkerContext, WorkerExit, WorkerReport};
