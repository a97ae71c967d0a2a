pub mod backoff;
pub mod registry;
pub mod scheduler;

pub use backoff::RetryPolicy;
pub use registry::{Registration, RegistryError, SyncRegistry};
pub use scheduler::{DispatchOutcome, SyncScheduler};

/// Tag the queue manager registers when it puts a file in the queue.
pub const SYNC_TAG: &str = "upload-queue";
