use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::conflict::{ConflictRecord, ResolvePolicy};
use super::queue::{SyncOperation, URGENT_PRIORITY};

/// Bounded retry policy for failed operations
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total executions allowed per operation (initial attempt included)
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `base_delay * n` (linear backoff)
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay before re-inserting after the `attempt`-th failed execution
    /// (1-based): 1s, 2s, 3s with the default base.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt.max(1)
    }
}

/// Configuration for a coordinator instance
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub retry: RetryPolicy,
    /// Priorities above this evict queued (never running) work at or below it
    pub urgent_threshold: u8,
    /// Per-execution I/O timeout; elapse enters the retry path
    pub io_timeout: Duration,
    /// How merge operations treat divergent pairs
    pub resolve_policy: ResolvePolicy,
    /// Identifies this device in logs and events
    pub client_id: String,
    /// When set, the pending queue is persisted here across restarts
    pub queue_path: Option<PathBuf>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            urgent_threshold: URGENT_PRIORITY,
            io_timeout: Duration::from_secs(30),
            resolve_policy: ResolvePolicy::default(),
            client_id: generate_client_id(),
            queue_path: None,
        }
    }
}

/// Configuration for the orchestration service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub coordinator: CoordinatorConfig,
    /// Priority for user-initiated operations — above the urgent threshold,
    /// so foreground work evicts stale queued background work
    pub foreground_priority: u8,
    /// Priority for scheduler-driven background merges
    pub background_priority: u8,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            foreground_priority: URGENT_PRIORITY + 1,
            background_priority: 3,
        }
    }
}

/// Terminal result of a sync operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    /// Whether the operation completed successfully
    pub success: bool,
    /// Number of groups pulled from remote
    pub groups_pulled: usize,
    /// Number of groups pushed to remote
    pub groups_pushed: usize,
    /// Number of conflicts resolved automatically
    pub conflicts_resolved: usize,
    /// Divergent pairs awaiting user input — a distinct terminal state,
    /// not a failure; resolved later via `manual_conflict_sync`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_conflicts: Vec<ConflictRecord>,
    /// Error message if failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the bounded retry policy was exhausted
    #[serde(default)]
    pub retries_exhausted: bool,
    /// Whether the operation was cancelled or evicted before running
    #[serde(default)]
    pub cancelled: bool,
    /// Completion timestamp for successful syncs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_time: Option<DateTime<Utc>>,
    /// Duration of the operation in milliseconds
    pub duration_ms: u64,
}

impl SyncOutcome {
    pub fn success(
        groups_pulled: usize,
        groups_pushed: usize,
        conflicts_resolved: usize,
        duration_ms: u64,
    ) -> Self {
        Self {
            success: true,
            groups_pulled,
            groups_pushed,
            conflicts_resolved,
            pending_conflicts: Vec::new(),
            error: None,
            retries_exhausted: false,
            cancelled: false,
            sync_time: Some(Utc::now()),
            duration_ms,
        }
    }

    pub fn failure(message: impl Into<String>, retries_exhausted: bool) -> Self {
        Self {
            success: false,
            groups_pulled: 0,
            groups_pushed: 0,
            conflicts_resolved: 0,
            pending_conflicts: Vec::new(),
            error: Some(message.into()),
            retries_exhausted,
            cancelled: false,
            sync_time: None,
            duration_ms: 0,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            success: false,
            groups_pulled: 0,
            groups_pushed: 0,
            conflicts_resolved: 0,
            pending_conflicts: Vec::new(),
            error: None,
            retries_exhausted: false,
            cancelled: true,
            sync_time: None,
            duration_ms: 0,
        }
    }

    /// Parked on unresolved conflicts — waiting for `manual_conflict_sync`
    pub fn requires_input(&self) -> bool {
        !self.pending_conflicts.is_empty()
    }
}

/// Read-only snapshot of the coordinator's queue
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub queue_length: usize,
    pub is_processing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_operation: Option<SyncOperation>,
}

/// Events emitted on the coordinator's broadcast stream
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// An operation reached a terminal state
    OperationFinished {
        operation_id: Uuid,
        outcome: SyncOutcome,
    },
    /// A divergent pair was detected (resolved or pending)
    ConflictDetected { record: ConflictRecord },
    /// A failed operation was scheduled for another attempt
    RetryScheduled {
        operation_id: Uuid,
        attempt: u32,
        delay_ms: u64,
    },
}

/// Generate a unique client ID for this device
pub fn generate_client_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", host, &suffix[..8])
}
