use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::service::SyncService;

/// Messages to control the sync scheduler
#[derive(Debug)]
pub enum SyncSchedulerMessage {
    /// Interval changed, restart the timer
    Reload { interval: Duration },
    /// Trigger an immediate background sync
    TriggerNow,
    /// App closing
    Shutdown,
}

/// Handle for the periodic sync scheduler
pub struct SyncScheduler {
    sender: mpsc::Sender<SyncSchedulerMessage>,
}

impl SyncScheduler {
    /// Notify scheduler that the configured interval has changed
    pub fn reload(&self, interval: Duration) {
        let _ = self
            .sender
            .try_send(SyncSchedulerMessage::Reload { interval });
    }

    /// Request an immediate background sync
    pub fn trigger_now(&self) {
        let _ = self.sender.try_send(SyncSchedulerMessage::TriggerNow);
    }

    /// Shut down the scheduler
    pub fn shutdown(&self) {
        let _ = self.sender.try_send(SyncSchedulerMessage::Shutdown);
    }

    /// Get a clone of the internal sender for external message producers
    pub fn sender_clone(&self) -> mpsc::Sender<SyncSchedulerMessage> {
        self.sender.clone()
    }
}

/// Minimum sync interval (prevents runaway syncing)
const MIN_INTERVAL: Duration = Duration::from_secs(60);

/// Start the periodic sync scheduler.
///
/// Spawns an async loop that queues a background merge every `interval`,
/// clamped to `MIN_INTERVAL`. Unauthenticated ticks are skipped silently —
/// the service gates every enqueue.
pub fn start_sync_scheduler(service: Arc<SyncService>, interval: Duration) -> SyncScheduler {
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(scheduler_loop(service, interval, rx));

    SyncScheduler { sender: tx }
}

async fn scheduler_loop(
    service: Arc<SyncService>,
    interval: Duration,
    mut receiver: mpsc::Receiver<SyncSchedulerMessage>,
) {
    let mut interval = interval.max(MIN_INTERVAL);
    log::info!(
        "Sync scheduler: started (interval {:.0}s)",
        interval.as_secs_f64(),
    );

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match service.background_sync().await {
                    Some(id) => log::debug!("Sync scheduler: queued periodic sync {}", id),
                    None => log::debug!("Sync scheduler: skipped tick (not authenticated)"),
                }
            }

            msg = receiver.recv() => {
                match msg {
                    Some(SyncSchedulerMessage::Reload { interval: new_interval }) => {
                        interval = new_interval.max(MIN_INTERVAL);
                        log::info!(
                            "Sync scheduler: interval changed to {:.0}s",
                            interval.as_secs_f64(),
                        );
                        continue;
                    }
                    Some(SyncSchedulerMessage::TriggerNow) => {
                        log::info!("Sync scheduler: immediate sync requested");
                        match service.background_sync().await {
                            Some(id) => log::debug!("Sync scheduler: queued sync {}", id),
                            None => log::debug!("Sync scheduler: skipped (not authenticated)"),
                        }
                    }
                    Some(SyncSchedulerMessage::Shutdown) | None => {
                        log::info!("Sync scheduler: shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::store::memory::{MemoryLocalStore, MemoryRemoteStore, StaticAuth};
    use crate::sync::config::SyncEvent;

    fn test_service() -> Arc<SyncService> {
        Arc::new(SyncService::new(
            Arc::new(MemoryLocalStore::new()),
            Arc::new(MemoryRemoteStore::new()),
            Arc::new(StaticAuth::authenticated()),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_tick_queues_background_sync() {
        let service = test_service();
        let mut events = service.subscribe();

        let start = tokio::time::Instant::now();
        let _scheduler = start_sync_scheduler(Arc::clone(&service), Duration::from_millis(1));

        loop {
            if let SyncEvent::OperationFinished { outcome, .. } = events.recv().await.unwrap() {
                assert!(outcome.success);
                break;
            }
        }
        // The 1ms request was clamped to the minimum interval
        assert!(start.elapsed() >= MIN_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_now_runs_immediately() {
        let service = test_service();
        let mut events = service.subscribe();

        let scheduler = start_sync_scheduler(Arc::clone(&service), Duration::from_secs(3600));
        scheduler.trigger_now();

        let start = tokio::time::Instant::now();
        loop {
            if let SyncEvent::OperationFinished { outcome, .. } = events.recv().await.unwrap() {
                assert!(outcome.success);
                break;
            }
        }
        assert!(start.elapsed() < Duration::from_secs(3600));
    }
}
