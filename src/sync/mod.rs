pub mod collection;
pub mod config;
pub mod conflict;
pub mod queue;
pub mod scheduler;

mod coordinator;
mod service;

pub use collection::{compute_checksum, SnapshotError, Tab, TabGroup};
pub use config::{
    generate_client_id, CoordinatorConfig, QueueStatus, RetryPolicy, ServiceConfig, SyncEvent,
    SyncOutcome,
};
pub use conflict::{
    detect, reconcile, resolve, ConflictCheck, ConflictError, ConflictRecord, Difference,
    MergeStrategy, ReconcileOutcome, Resolution, ResolvePolicy,
};
pub use coordinator::SyncCoordinator;
pub use queue::{OperationKind, PendingQueue, SyncOperation, MIN_PRIORITY, URGENT_PRIORITY};
pub use scheduler::{start_sync_scheduler, SyncScheduler, SyncSchedulerMessage};
pub use service::SyncService;
