pub mod manager;
pub mod store;

pub use manager::{FlushReport, ManagerError, QueueManager, QueueReason, SubmitOutcome};
pub use store::{
    AttemptFailure, EntrySummary, NewEntry, QueueEntry, QueueStore, StoreError, StoreOutcome,
    StoreSlot,
};
