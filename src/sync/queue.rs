use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use super::collection::TabGroup;
use super::conflict::MergeStrategy;

/// Priority above which a queued operation evicts queued background work.
/// Preserved from the source behavior; tunable via `CoordinatorConfig`.
pub const URGENT_PRIORITY: u8 = 5;

/// Lowest priority a retried operation can decay to
pub const MIN_PRIORITY: u8 = 1;

/// The kind of sync work an operation performs, with its payload.
///
/// A closed enum so every handler match is exhaustive — adding a kind is a
/// compile-time-checked change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OperationKind {
    /// Push the local collection list to the remote store
    Upload { overwrite: bool },
    /// Pull the remote collection list into the local store
    Download { force_remote: bool },
    /// Reconcile both stores; optionally carries a user-resolved snapshot
    Merge {
        /// Strategy override; `None` uses the coordinator's resolve policy
        #[serde(skip_serializing_if = "Option::is_none")]
        strategy: Option<MergeStrategy>,
        /// A resolved snapshot from `manual_conflict_sync` to splice in
        #[serde(skip_serializing_if = "Option::is_none")]
        resolved: Option<Box<TabGroup>>,
    },
}

impl OperationKind {
    pub fn merge() -> Self {
        Self::Merge {
            strategy: None,
            resolved: None,
        }
    }

    pub fn merge_with(strategy: MergeStrategy) -> Self {
        Self::Merge {
            strategy: Some(strategy),
            resolved: None,
        }
    }

    pub fn apply_resolution(merged: TabGroup) -> Self {
        Self::Merge {
            strategy: None,
            resolved: Some(Box::new(merged)),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Upload { .. } => "upload",
            Self::Download { .. } => "download",
            Self::Merge { .. } => "merge",
        }
    }
}

/// A single queued sync operation.
///
/// Owned exclusively by the coordinator once queued; never mutated from
/// outside the worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    /// Unique ID for this operation — stable across retries
    pub id: Uuid,
    /// The work to perform
    pub kind: OperationKind,
    /// Higher wins; decremented on each retry (floor `MIN_PRIORITY`)
    pub priority: u8,
    /// When this operation was submitted
    pub submitted_at: DateTime<Utc>,
    /// Submission sequence — FIFO tie-break within equal priority
    pub seq: u64,
    /// Number of completed execution attempts
    pub retries: u32,
    /// Last handler error, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SyncOperation {
    pub fn new(kind: OperationKind, priority: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            priority,
            submitted_at: Utc::now(),
            seq: 0,
            retries: 0,
            last_error: None,
        }
    }
}

/// Queue of pending sync operations.
///
/// Pure data — selection, eviction and persistence only. All scheduling
/// decisions live in the coordinator's worker.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PendingQueue {
    items: Vec<SyncOperation>,
    next_seq: u64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Add an operation. If its priority exceeds `urgent_threshold`, all
    /// queued operations at or below the threshold are evicted and returned
    /// so the caller can report them as cancelled.
    pub fn enqueue(
        &mut self,
        mut op: SyncOperation,
        urgent_threshold: u8,
    ) -> Vec<SyncOperation> {
        let mut evicted = Vec::new();
        if op.priority > urgent_threshold {
            let mut kept = Vec::with_capacity(self.items.len());
            for item in self.items.drain(..) {
                if item.priority <= urgent_threshold {
                    evicted.push(item);
                } else {
                    kept.push(item);
                }
            }
            self.items = kept;
        }

        op.seq = self.next_seq;
        self.next_seq += 1;
        self.items.push(op);
        evicted
    }

    /// Re-insert a retried operation without triggering eviction — retries
    /// re-enter at reduced priority and must not discard other work.
    pub fn requeue(&mut self, mut op: SyncOperation) {
        op.seq = self.next_seq;
        self.next_seq += 1;
        self.items.push(op);
    }

    /// Remove and return the next operation to run: highest priority,
    /// ties broken by earliest submission (lowest `seq`).
    pub fn pop_next(&mut self) -> Option<SyncOperation> {
        let best = self
            .items
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.priority.cmp(&b.priority).then(b.seq.cmp(&a.seq)))
            .map(|(i, _)| i)?;
        Some(self.items.remove(best))
    }

    /// Remove a still-queued operation by id
    pub fn remove(&mut self, id: Uuid) -> Option<SyncOperation> {
        let index = self.items.iter().position(|op| op.id == id)?;
        Some(self.items.remove(index))
    }

    /// Drop everything, returning the dropped operations
    pub fn clear(&mut self) -> Vec<SyncOperation> {
        self.items.drain(..).collect()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.items.iter().any(|op| op.id == id)
    }

    /// Load queue from file
    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save queue to file
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(priority: u8) -> SyncOperation {
        SyncOperation::new(OperationKind::merge(), priority)
    }

    #[test]
    fn test_pop_orders_by_priority() {
        let mut queue = PendingQueue::new();
        let low = op(2);
        let high = op(4);
        queue.enqueue(low.clone(), URGENT_PRIORITY);
        queue.enqueue(high.clone(), URGENT_PRIORITY);

        assert_eq!(queue.pop_next().unwrap().id, high.id);
        assert_eq!(queue.pop_next().unwrap().id, low.id);
        assert!(queue.pop_next().is_none());
    }

    #[test]
    fn test_fifo_within_equal_priority() {
        let mut queue = PendingQueue::new();
        let a = op(3);
        let b = op(3);
        queue.enqueue(a.clone(), URGENT_PRIORITY);
        queue.enqueue(b.clone(), URGENT_PRIORITY);

        assert_eq!(queue.pop_next().unwrap().id, a.id);
        assert_eq!(queue.pop_next().unwrap().id, b.id);
    }

    #[test]
    fn test_urgent_enqueue_evicts_background_work() {
        let mut queue = PendingQueue::new();
        let other_urgent = op(6);
        let background = op(3);
        queue.enqueue(other_urgent.clone(), URGENT_PRIORITY);
        queue.enqueue(background.clone(), URGENT_PRIORITY);

        let urgent = op(7);
        let evicted = queue.enqueue(urgent.clone(), URGENT_PRIORITY);

        let evicted_ids: Vec<Uuid> = evicted.iter().map(|o| o.id).collect();
        assert_eq!(evicted_ids, vec![background.id]);
        // Urgent work above the threshold survives
        assert!(queue.contains(other_urgent.id));
        assert!(queue.contains(urgent.id));
    }

    #[test]
    fn test_requeue_does_not_evict() {
        let mut queue = PendingQueue::new();
        let background = op(3);
        queue.enqueue(background.clone(), URGENT_PRIORITY);

        queue.requeue(op(7));

        assert!(queue.contains(background.id));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_remove_cancels_queued_operation() {
        let mut queue = PendingQueue::new();
        let a = op(3);
        queue.enqueue(a.clone(), URGENT_PRIORITY);

        assert_eq!(queue.remove(a.id).map(|o| o.id), Some(a.id));
        assert!(queue.is_empty());
        assert!(queue.remove(a.id).is_none());
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");

        let mut queue = PendingQueue::new();
        queue.enqueue(
            SyncOperation::new(OperationKind::Upload { overwrite: true }, 4),
            URGENT_PRIORITY,
        );
        queue.enqueue(op(6), URGENT_PRIORITY);
        queue.save(&path).unwrap();

        let loaded = PendingQueue::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.items, queue.items);
        assert_eq!(loaded.next_seq, queue.next_seq);
    }

    #[test]
    fn test_load_missing_file_is_empty_queue() {
        let dir = tempfile::tempdir().unwrap();
        let queue = PendingQueue::load(&dir.path().join("absent.json")).unwrap();
        assert!(queue.is_empty());
    }
}
