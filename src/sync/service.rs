//! High-level sync intents for the rest of the application.
//!
//! The service translates user-facing operations into coordinator work and
//! surfaces terminal results as plain `SyncOutcome` values — errors never
//! cross this boundary as panics or `Err`s.

use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::store::{AuthProvider, LocalStore, RemoteStore};

use super::config::{ServiceConfig, SyncEvent, SyncOutcome};
use super::conflict::{self, ConflictRecord, MergeStrategy};
use super::coordinator::SyncCoordinator;
use super::queue::OperationKind;

/// Orchestration façade composing the coordinator with the store adapters
/// and an authentication gate.
pub struct SyncService {
    coordinator: SyncCoordinator,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    auth: Arc<dyn AuthProvider>,
    config: ServiceConfig,
}

impl SyncService {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        Self::with_config(local, remote, auth, ServiceConfig::default())
    }

    pub fn with_config(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
        config: ServiceConfig,
    ) -> Self {
        let coordinator = SyncCoordinator::start(
            config.coordinator.clone(),
            Arc::clone(&local),
            Arc::clone(&remote),
        );
        Self {
            coordinator,
            local,
            remote,
            auth,
            config,
        }
    }

    /// Pick the right sync direction from the state of both stores.
    ///
    /// Both empty: nothing to do. Only local empty: adopt remote. Only remote
    /// empty: seed it from local. Both populated: bidirectional merge.
    pub async fn smart_sync(&self) -> SyncOutcome {
        if let Err(outcome) = self.check_auth() {
            return outcome;
        }

        // Emptiness inspection is read-only; all writing goes through the
        // coordinator so the stores never see a second writer.
        let local_empty = match self.local.get_collections().await {
            Ok(groups) => groups.is_empty(),
            Err(e) => return SyncOutcome::failure(format!("local store unavailable: {}", e), false),
        };
        let remote_empty = match self.remote.download_collections().await {
            Ok(groups) => groups.is_empty(),
            Err(e) => {
                return SyncOutcome::failure(format!("remote store unavailable: {}", e), false)
            }
        };

        match (local_empty, remote_empty) {
            (true, true) => {
                log::info!("Sync: both stores empty — nothing to do");
                SyncOutcome::success(0, 0, 0, 0)
            }
            (true, false) => {
                log::info!("Sync: local empty — downloading remote collections");
                self.run_foreground(OperationKind::Download { force_remote: true })
                    .await
            }
            (false, true) => {
                log::info!("Sync: remote empty — seeding it from local");
                self.run_foreground(OperationKind::Upload { overwrite: true })
                    .await
            }
            (false, false) => {
                log::info!("Sync: both stores populated — merging");
                self.run_foreground(OperationKind::merge()).await
            }
        }
    }

    /// Push local collections to the cloud at foreground priority
    pub async fn upload_to_cloud(&self, overwrite: bool) -> SyncOutcome {
        if let Err(outcome) = self.check_auth() {
            return outcome;
        }
        self.run_foreground(OperationKind::Upload { overwrite })
            .await
    }

    /// Pull cloud collections into the local store at foreground priority
    pub async fn download_from_cloud(&self, force_remote: bool) -> SyncOutcome {
        if let Err(outcome) = self.check_auth() {
            return outcome;
        }
        self.run_foreground(OperationKind::Download { force_remote })
            .await
    }

    /// Enqueue a background merge without waiting for it.
    ///
    /// Returns the operation id, or `None` when the user is not
    /// authenticated (nothing is enqueued).
    pub async fn background_sync(&self) -> Option<Uuid> {
        if self.check_auth().is_err() {
            return None;
        }
        let id = self
            .coordinator
            .queue_sync(OperationKind::merge(), self.config.background_priority)
            .await;
        log::debug!("Sync: queued background merge {}", id);
        Some(id)
    }

    /// Apply the user's explicit resolution choice to a surfaced conflict
    /// and push the result.
    pub async fn manual_conflict_sync(
        &self,
        record: &ConflictRecord,
        choice: MergeStrategy,
    ) -> SyncOutcome {
        if let Err(outcome) = self.check_auth() {
            return outcome;
        }

        let merged = match conflict::resolve(&record.local, &record.remote, choice) {
            Ok(merged) => merged,
            Err(e) => {
                log::error!(
                    "Sync: manual resolution for group {} rejected: {}",
                    record.group_id,
                    e,
                );
                return SyncOutcome::failure(format!("cannot apply resolution: {}", e), false);
            }
        };

        log::info!(
            "Sync: applying manual {:?} resolution for group {}",
            choice,
            record.group_id,
        );
        self.run_foreground(OperationKind::apply_resolution(merged))
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.coordinator.subscribe()
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
    }

    fn check_auth(&self) -> Result<(), SyncOutcome> {
        if self.auth.is_authenticated() {
            Ok(())
        } else {
            log::warn!("Sync: rejected — user is not authenticated");
            Err(SyncOutcome::failure("not authenticated", false))
        }
    }

    async fn run_foreground(&self, kind: OperationKind) -> SyncOutcome {
        let (_, done) = self
            .coordinator
            .queue_sync_watched(kind, self.config.foreground_priority)
            .await;
        match done.await {
            Ok(outcome) => outcome,
            Err(_) => SyncOutcome::failure("coordinator stopped before completion", false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use chrono::Duration;

    use crate::store::memory::{MemoryLocalStore, MemoryRemoteStore, StaticAuth};
    use crate::sync::collection::{Tab, TabGroup};
    use crate::sync::conflict::ResolvePolicy;
    use crate::sync::config::CoordinatorConfig;

    fn group(name: &str, url: &str) -> TabGroup {
        TabGroup::with_tabs(name, vec![Tab::new(url, name)])
    }

    /// A shared group edited on both sides so that neither snapshot
    /// dominates: local has the higher version, remote the newer timestamp.
    fn divergent_pair() -> (TabGroup, TabGroup) {
        let local = group("shared", "https://local.example");
        let mut remote = local.clone();
        remote.tabs = vec![Tab::new("https://remote.example", "shared")];
        remote.refresh_checksum();

        let mut local = local;
        local.version += 2;
        remote.version += 1;
        remote.updated_at = local.updated_at + Duration::seconds(30);
        (local, remote)
    }

    fn service(
        local: Arc<MemoryLocalStore>,
        remote: Arc<MemoryRemoteStore>,
        auth: Arc<StaticAuth>,
    ) -> SyncService {
        SyncService::new(local, remote, auth)
    }

    #[tokio::test(start_paused = true)]
    async fn test_smart_sync_both_empty_is_noop() {
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let service = service(local, remote.clone(), Arc::new(StaticAuth::authenticated()));

        let outcome = service.smart_sync().await;

        assert!(outcome.success);
        assert_eq!(outcome.groups_pulled + outcome.groups_pushed, 0);
        // Only the emptiness probe touched the remote — nothing was enqueued
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.coordinator().queue_status().await.queue_length, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_smart_sync_local_empty_downloads() {
        let seeded = group("remote", "https://r.example");
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteStore::with_groups(vec![seeded.clone()]));
        let service = service(local.clone(), remote, Arc::new(StaticAuth::authenticated()));

        let outcome = service.smart_sync().await;

        assert!(outcome.success);
        assert_eq!(outcome.groups_pulled, 1);
        assert_eq!(local.snapshot(), vec![seeded]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_smart_sync_remote_empty_uploads() {
        let seeded = group("local", "https://l.example");
        let local = Arc::new(MemoryLocalStore::with_groups(vec![seeded.clone()]));
        let remote = Arc::new(MemoryRemoteStore::new());
        let service = service(local, remote.clone(), Arc::new(StaticAuth::authenticated()));

        let outcome = service.smart_sync().await;

        assert!(outcome.success);
        assert_eq!(outcome.groups_pushed, 1);
        assert_eq!(remote.snapshot(), vec![seeded]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_smart_sync_both_populated_merges() {
        let (shared_local, shared_remote) = divergent_pair();
        let local_only = group("local-only", "https://lo.example");

        let local = Arc::new(MemoryLocalStore::with_groups(vec![
            shared_local.clone(),
            local_only.clone(),
        ]));
        let remote = Arc::new(MemoryRemoteStore::with_groups(vec![shared_remote]));
        let service = service(local.clone(), remote.clone(), Arc::new(StaticAuth::authenticated()));

        let outcome = service.smart_sync().await;

        assert!(outcome.success);
        assert_eq!(outcome.conflicts_resolved, 1);

        // Both stores converged on the merged list
        assert_eq!(local.snapshot(), remote.snapshot());
        let merged = local
            .snapshot()
            .into_iter()
            .find(|g| g.id == shared_local.id)
            .unwrap();
        let urls: Vec<String> = merged.tabs.iter().map(|t| t.url.clone()).collect();
        assert_eq!(urls, vec!["https://local.example", "https://remote.example"]);
        assert!(local.snapshot().iter().any(|g| g.id == local_only.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthenticated_fails_fast_without_enqueue() {
        let local = Arc::new(MemoryLocalStore::with_groups(vec![group(
            "a",
            "https://a.example",
        )]));
        let remote = Arc::new(MemoryRemoteStore::new());
        let service = service(local, remote.clone(), Arc::new(StaticAuth::unauthenticated()));

        let outcome = service.smart_sync().await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("not authenticated"));

        assert!(service.background_sync().await.is_none());
        assert!(!service.upload_to_cloud(true).await.success);

        // The remote was never touched and nothing reached the queue
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
        assert_eq!(service.coordinator().queue_status().await.queue_length, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_conflict_flow() {
        let (shared_local, shared_remote) = divergent_pair();
        let local = Arc::new(MemoryLocalStore::with_groups(vec![shared_local.clone()]));
        let remote = Arc::new(MemoryRemoteStore::with_groups(vec![shared_remote.clone()]));

        let config = ServiceConfig {
            coordinator: CoordinatorConfig {
                resolve_policy: ResolvePolicy::Manual,
                client_id: "test-client".to_string(),
                ..CoordinatorConfig::default()
            },
            ..ServiceConfig::default()
        };
        let service = SyncService::with_config(
            local.clone(),
            remote.clone(),
            Arc::new(StaticAuth::authenticated()),
            config,
        );

        // The merge parks on the divergent pair instead of completing
        let outcome = service.smart_sync().await;
        assert!(!outcome.success);
        assert!(outcome.requires_input());
        assert_eq!(outcome.pending_conflicts.len(), 1);

        // Neither side lost its version of the conflicted group
        assert_eq!(local.snapshot(), vec![shared_local.clone()]);
        assert_eq!(remote.snapshot(), vec![shared_remote.clone()]);

        // The user picks remote-wins; both sides converge on it
        let record = &outcome.pending_conflicts[0];
        let resolved = service
            .manual_conflict_sync(record, MergeStrategy::RemoteWins)
            .await;
        assert!(resolved.success);

        let local_group = &local.snapshot()[0];
        assert_eq!(local_group.tabs, shared_remote.tabs);
        assert_eq!(remote.snapshot()[0].tabs, shared_remote.tabs);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_preserves_locked_groups() {
        let mut locked = group("locked", "https://keep.example");
        locked.is_locked = true;
        let mut remote_version = locked.clone();
        remote_version.tabs = vec![Tab::new("https://clobber.example", "clobber")];
        remote_version.touch();

        let local = Arc::new(MemoryLocalStore::with_groups(vec![locked.clone()]));
        let remote = Arc::new(MemoryRemoteStore::with_groups(vec![remote_version]));
        let service = service(local.clone(), remote, Arc::new(StaticAuth::authenticated()));

        let outcome = service.download_from_cloud(true).await;

        assert!(outcome.success);
        // The locked group kept its local contents despite force_remote
        assert_eq!(local.snapshot(), vec![locked]);
    }
}
