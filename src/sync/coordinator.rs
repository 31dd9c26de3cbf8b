//! The sync operation queue.
//!
//! One worker task owns the pending queue, the retry bookkeeping and the
//! single execution slot; everything reaches it through an mpsc control
//! channel, so no lock is shared with callers and no mutation path exists
//! outside the worker. Handlers run in a spawned task so the worker keeps
//! answering cancel/status requests mid-operation, but a new handler only
//! starts once the previous one has reported back — at most one operation is
//! ever in flight.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

use crate::store::{LocalStore, RemoteStore, StoreError};

use super::config::{CoordinatorConfig, QueueStatus, SyncEvent, SyncOutcome};
use super::conflict::{self, ConflictError, ConflictRecord, ResolvePolicy};
use super::queue::{OperationKind, PendingQueue, SyncOperation, MIN_PRIORITY};

/// Control messages for the coordinator worker
enum CoordinatorMessage {
    Submit {
        op: SyncOperation,
        done: Option<oneshot::Sender<SyncOutcome>>,
    },
    Cancel {
        id: Uuid,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<QueueStatus>,
    },
    Clear,
    /// Re-insertion of a retried operation after its backoff delay
    Requeue { op: SyncOperation },
    /// A spawned handler reported back
    Finished {
        op: SyncOperation,
        result: Result<HandlerReport, HandlerError>,
    },
    Shutdown,
}

/// What a handler produced on the happy path
struct HandlerReport {
    pulled: usize,
    pushed: usize,
    resolved: Vec<ConflictRecord>,
    pending: Vec<ConflictRecord>,
}

impl HandlerReport {
    fn transfer(pulled: usize, pushed: usize) -> Self {
        Self {
            pulled,
            pushed,
            resolved: Vec::new(),
            pending: Vec::new(),
        }
    }
}

#[derive(Error, Debug)]
enum HandlerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Conflict(#[from] ConflictError),
}

impl HandlerError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            // Validation failures indicate a data bug, not a transient condition
            Self::Conflict(_) => false,
        }
    }
}

/// Handle to a running coordinator.
///
/// Cheap to clone; all clones drive the same worker. Dropping every clone
/// does not stop the worker — call `shutdown` for an orderly stop.
#[derive(Clone)]
pub struct SyncCoordinator {
    sender: mpsc::Sender<CoordinatorMessage>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncCoordinator {
    /// Spawn the worker and return a handle to it.
    ///
    /// Each call constructs a fully isolated instance with its own queue and
    /// retry bookkeeping — tests never share state between coordinators.
    pub fn start(
        config: CoordinatorConfig,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let (events, _) = broadcast::channel(64);

        log::info!(
            "Coordinator: starting (client_id={}, urgent_threshold={}, max_attempts={})",
            config.client_id,
            config.urgent_threshold,
            config.retry.max_attempts,
        );

        let worker = Worker {
            config,
            local,
            remote,
            queue: PendingQueue::new(),
            retry_counts: HashMap::new(),
            waiters: HashMap::new(),
            current: None,
            started_at: None,
            events: events.clone(),
            tx: tx.clone(),
            shutting_down: false,
        };
        tokio::spawn(worker.run(rx));

        Self { sender: tx, events }
    }

    /// Enqueue work. Returns the operation id immediately; the operation runs
    /// when it reaches the head of the queue.
    pub async fn queue_sync(&self, kind: OperationKind, priority: u8) -> Uuid {
        let op = SyncOperation::new(kind, priority);
        let id = op.id;
        let _ = self
            .sender
            .send(CoordinatorMessage::Submit { op, done: None })
            .await;
        id
    }

    /// Enqueue work and get a receiver for its terminal outcome.
    ///
    /// The receiver resolves exactly once: success, failure after retries,
    /// cancellation/eviction, or conflict-pending.
    pub async fn queue_sync_watched(
        &self,
        kind: OperationKind,
        priority: u8,
    ) -> (Uuid, oneshot::Receiver<SyncOutcome>) {
        let (done_tx, done_rx) = oneshot::channel();
        let op = SyncOperation::new(kind, priority);
        let id = op.id;
        let _ = self
            .sender
            .send(CoordinatorMessage::Submit {
                op,
                done: Some(done_tx),
            })
            .await;
        (id, done_rx)
    }

    /// Remove a still-queued operation. Returns `false` if it is already
    /// running or finished — a running operation is never interrupted.
    pub async fn cancel_sync(&self, id: Uuid) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .sender
            .send(CoordinatorMessage::Cancel { id, reply: reply_tx })
            .await
            .is_err()
        {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Read-only snapshot of the queue
    pub async fn queue_status(&self) -> QueueStatus {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .sender
            .send(CoordinatorMessage::Status { reply: reply_tx })
            .await
            .is_err()
        {
            return QueueStatus {
                queue_length: 0,
                is_processing: false,
                current_operation: None,
            };
        }
        reply_rx.await.unwrap_or(QueueStatus {
            queue_length: 0,
            is_processing: false,
            current_operation: None,
        })
    }

    /// Drop all queued (non-running) operations and reset retry bookkeeping
    pub async fn clear_queue(&self) {
        let _ = self.sender.send(CoordinatorMessage::Clear).await;
    }

    /// Subscribe to terminal results, conflict records and retry notices
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Stop the worker. The in-flight operation, if any, runs to completion
    /// first; queued operations are abandoned.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(CoordinatorMessage::Shutdown).await;
    }
}

struct Worker {
    config: CoordinatorConfig,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    queue: PendingQueue,
    /// operationId -> completed executions; confined to this task
    retry_counts: HashMap<Uuid, u32>,
    waiters: HashMap<Uuid, oneshot::Sender<SyncOutcome>>,
    current: Option<SyncOperation>,
    started_at: Option<Instant>,
    events: broadcast::Sender<SyncEvent>,
    tx: mpsc::Sender<CoordinatorMessage>,
    shutting_down: bool,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<CoordinatorMessage>) {
        if let Some(path) = self.config.queue_path.clone() {
            match PendingQueue::load(&path) {
                Ok(restored) if !restored.is_empty() => {
                    log::info!(
                        "Coordinator: restored {} pending operation(s) from {}",
                        restored.len(),
                        path.display(),
                    );
                    self.queue = restored;
                    self.maybe_start();
                }
                Ok(_) => {}
                Err(e) => log::warn!("Coordinator: failed to load queue: {}", e),
            }
        }

        while let Some(msg) = rx.recv().await {
            match msg {
                CoordinatorMessage::Submit { op, done } => {
                    log::debug!(
                        "Coordinator: queued {} op {} (priority {})",
                        op.kind.label(),
                        op.id,
                        op.priority,
                    );
                    if let Some(done) = done {
                        self.waiters.insert(op.id, done);
                    }
                    let evicted = self.queue.enqueue(op, self.config.urgent_threshold);
                    for stale in evicted {
                        log::info!(
                            "Coordinator: evicted queued {} op {} for urgent work",
                            stale.kind.label(),
                            stale.id,
                        );
                        self.finish_without_run(stale);
                    }
                    self.persist();
                    self.maybe_start();
                }
                CoordinatorMessage::Cancel { id, reply } => {
                    let cancelled = if self.current.as_ref().map(|c| c.id) == Some(id) {
                        false
                    } else if let Some(op) = self.queue.remove(id) {
                        self.finish_without_run(op);
                        self.persist();
                        true
                    } else {
                        false
                    };
                    let _ = reply.send(cancelled);
                }
                CoordinatorMessage::Status { reply } => {
                    let _ = reply.send(QueueStatus {
                        queue_length: self.queue.len(),
                        is_processing: self.current.is_some(),
                        current_operation: self.current.clone(),
                    });
                }
                CoordinatorMessage::Clear => {
                    let dropped = self.queue.clear();
                    log::info!("Coordinator: cleared {} queued operation(s)", dropped.len());
                    for op in dropped {
                        self.finish_without_run(op);
                    }
                    self.retry_counts.clear();
                    self.persist();
                }
                CoordinatorMessage::Requeue { op } => {
                    log::debug!(
                        "Coordinator: re-queued {} op {} (attempt {}, priority {})",
                        op.kind.label(),
                        op.id,
                        op.retries + 1,
                        op.priority,
                    );
                    self.queue.requeue(op);
                    self.persist();
                    self.maybe_start();
                }
                CoordinatorMessage::Finished { op, result } => {
                    self.current = None;
                    self.on_finished(op, result);
                    if self.shutting_down && self.current.is_none() {
                        break;
                    }
                    self.maybe_start();
                }
                CoordinatorMessage::Shutdown => {
                    if self.current.is_none() {
                        break;
                    }
                    // Let the in-flight operation finish, then exit
                    self.shutting_down = true;
                }
            }
        }

        log::info!("Coordinator: stopped");
    }

    /// Start the next operation if the execution slot is free
    fn maybe_start(&mut self) {
        if self.current.is_some() || self.shutting_down {
            return;
        }
        let Some(op) = self.queue.pop_next() else {
            return;
        };
        self.persist();

        log::info!(
            "Coordinator: running {} op {} (priority {}, attempt {})",
            op.kind.label(),
            op.id,
            op.priority,
            op.retries + 1,
        );

        self.current = Some(op.clone());
        self.started_at = Some(Instant::now());

        let local = Arc::clone(&self.local);
        let remote = Arc::clone(&self.remote);
        let policy = self.config.resolve_policy;
        let io_timeout = self.config.io_timeout;
        let tx = self.tx.clone();
        let kind = op.kind.clone();

        tokio::spawn(async move {
            let result =
                match tokio::time::timeout(io_timeout, execute(local, remote, policy, kind)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(HandlerError::Store(StoreError::Timeout(io_timeout))),
                };
            let _ = tx.send(CoordinatorMessage::Finished { op, result }).await;
        });
    }

    fn on_finished(&mut self, mut op: SyncOperation, result: Result<HandlerReport, HandlerError>) {
        let elapsed = self
            .started_at
            .take()
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        match result {
            Ok(report) => {
                self.retry_counts.remove(&op.id);
                for record in report.resolved.iter().chain(report.pending.iter()) {
                    let _ = self.events.send(SyncEvent::ConflictDetected {
                        record: record.clone(),
                    });
                }

                let mut outcome = SyncOutcome::success(
                    report.pulled,
                    report.pushed,
                    report.resolved.len(),
                    elapsed,
                );
                if !report.pending.is_empty() {
                    // Parked on user input — a distinct terminal state, not a
                    // failure; never retried
                    outcome.success = false;
                    outcome.sync_time = None;
                    outcome.pending_conflicts = report.pending;
                    log::info!(
                        "Coordinator: {} op {} parked on {} conflict(s)",
                        op.kind.label(),
                        op.id,
                        outcome.pending_conflicts.len(),
                    );
                } else {
                    log::info!(
                        "Coordinator: {} op {} complete — pulled={}, pushed={}, resolved={} ({}ms)",
                        op.kind.label(),
                        op.id,
                        outcome.groups_pulled,
                        outcome.groups_pushed,
                        outcome.conflicts_resolved,
                        elapsed,
                    );
                }
                self.deliver(op.id, outcome);
            }
            Err(err) => {
                let executions = self.retry_counts.get(&op.id).copied().unwrap_or(0) + 1;
                let transient = err.is_transient();

                if transient && executions < self.config.retry.max_attempts {
                    self.retry_counts.insert(op.id, executions);
                    op.retries = executions;
                    op.last_error = Some(err.to_string());
                    // Failing work yields to healthy work
                    op.priority = op.priority.saturating_sub(1).max(MIN_PRIORITY);

                    let delay = self.config.retry.delay_for(executions);
                    log::warn!(
                        "Coordinator: {} op {} failed (attempt {}/{}): {} — retrying in {:?}",
                        op.kind.label(),
                        op.id,
                        executions,
                        self.config.retry.max_attempts,
                        err,
                        delay,
                    );
                    let _ = self.events.send(SyncEvent::RetryScheduled {
                        operation_id: op.id,
                        attempt: executions + 1,
                        delay_ms: delay.as_millis() as u64,
                    });

                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(CoordinatorMessage::Requeue { op }).await;
                    });
                } else {
                    self.retry_counts.remove(&op.id);
                    log::error!(
                        "Coordinator: {} op {} failed terminally after {} attempt(s): {}",
                        op.kind.label(),
                        op.id,
                        executions,
                        err,
                    );
                    let outcome = SyncOutcome {
                        duration_ms: elapsed,
                        ..SyncOutcome::failure(err.to_string(), transient)
                    };
                    self.deliver(op.id, outcome);
                }
            }
        }
    }

    /// Terminal delivery for an operation that never ran (cancel/evict/clear)
    fn finish_without_run(&mut self, op: SyncOperation) {
        self.retry_counts.remove(&op.id);
        self.deliver(op.id, SyncOutcome::cancelled());
    }

    fn deliver(&mut self, id: Uuid, outcome: SyncOutcome) {
        if let Some(done) = self.waiters.remove(&id) {
            let _ = done.send(outcome.clone());
        }
        let _ = self.events.send(SyncEvent::OperationFinished {
            operation_id: id,
            outcome,
        });
    }

    fn persist(&self) {
        if let Some(path) = &self.config.queue_path {
            if let Err(e) = self.queue.save(path) {
                log::warn!("Coordinator: failed to persist queue: {}", e);
            }
        }
    }
}

/// Kind-specific operation handlers. Store calls are the only suspension
/// points, and only one handler runs at a time, so each store sees a single
/// writer.
async fn execute(
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    default_policy: ResolvePolicy,
    kind: OperationKind,
) -> Result<HandlerReport, HandlerError> {
    match kind {
        OperationKind::Upload { overwrite } => {
            let groups = local.get_collections().await?;
            let pushed = groups.len();
            remote.upload_collections(groups, overwrite).await?;
            Ok(HandlerReport::transfer(0, pushed))
        }

        OperationKind::Download { force_remote } => {
            let remote_groups = remote.download_collections().await?;
            let local_groups = local.get_collections().await?;

            if force_remote {
                // Adopt the remote list wholesale — except locked local
                // groups, which sync never mutates
                let mut adopted = remote_groups;
                let pulled = adopted.len();
                for locked in local_groups.into_iter().filter(|g| g.is_locked) {
                    match adopted.iter_mut().find(|g| g.id == locked.id) {
                        Some(slot) => *slot = locked,
                        None => adopted.push(locked),
                    }
                }
                local.set_collections(adopted).await?;
                Ok(HandlerReport::transfer(pulled, 0))
            } else {
                // Pull-side reconcile: newest wins per pair, local-only
                // groups survive, nothing is written to remote
                let outcome =
                    conflict::reconcile(&local_groups, &remote_groups, default_policy)?;
                local.set_collections(outcome.groups).await?;
                Ok(HandlerReport {
                    pulled: outcome.pulled,
                    pushed: 0,
                    resolved: outcome.resolved,
                    pending: outcome.pending,
                })
            }
        }

        OperationKind::Merge { strategy, resolved } => {
            if let Some(resolved) = resolved {
                // A user-chosen resolution from manual_conflict_sync: splice
                // it into the local list and push just that group
                let merged = *resolved;
                merged.validate().map_err(ConflictError::from)?;

                let mut local_groups = local.get_collections().await?;
                match local_groups.iter_mut().find(|g| g.id == merged.id) {
                    Some(slot) => *slot = merged.clone(),
                    None => local_groups.push(merged.clone()),
                }
                local.set_collections(local_groups).await?;
                remote.upload_collections(vec![merged], false).await?;
                return Ok(HandlerReport::transfer(0, 1));
            }

            let policy = strategy.map(ResolvePolicy::Auto).unwrap_or(default_policy);
            let local_groups = local.get_collections().await?;
            let remote_groups = remote.download_collections().await?;
            let outcome = conflict::reconcile(&local_groups, &remote_groups, policy)?;

            local.set_collections(outcome.groups.clone()).await?;
            if outcome.pending.is_empty() {
                remote.upload_collections(outcome.groups, true).await?;
            } else {
                // Leave the remote copies of conflicted groups untouched so
                // no data is lost before the user chooses
                let pending_ids: HashSet<Uuid> =
                    outcome.pending.iter().map(|r| r.group_id).collect();
                let safe: Vec<_> = outcome
                    .groups
                    .iter()
                    .filter(|g| !pending_ids.contains(&g.id))
                    .cloned()
                    .collect();
                remote.upload_collections(safe, false).await?;
            }

            Ok(HandlerReport {
                pulled: outcome.pulled,
                pushed: outcome.pushed,
                resolved: outcome.resolved,
                pending: outcome.pending,
            })
        }
    }
}
