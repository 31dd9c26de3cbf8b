//! Synchronization coordinator and conflict-resolution engine for saved tab
//! groups.
//!
//! Keeps a user's collections of saved browser tabs consistent between a
//! local device store and a remote cloud store, across devices that edit
//! independently and offline. The coordinator serializes sync work (at most
//! one operation in flight), orders it by priority, retries transient
//! failures with bounded backoff, and delegates reconciliation of divergent
//! group versions to a pure, deterministic resolver.
//!
//! Store transports are external collaborators behind the [`store`] traits;
//! higher-level code drives everything through [`sync::SyncService`].

pub mod store;
pub mod sync;

pub use store::{
    AuthProvider, FaultKind, LocalStore, MemoryLocalStore, MemoryRemoteStore, RemoteStore,
    StaticAuth, StoreError,
};
pub use sync::{
    ConflictRecord, CoordinatorConfig, MergeStrategy, OperationKind, QueueStatus, ResolvePolicy,
    RetryPolicy, ServiceConfig, SyncCoordinator, SyncEvent, SyncOperation, SyncOutcome,
    SyncService, Tab, TabGroup,
};
