//! In-memory store adapters.
//!
//! Reference implementations of the adapter traits, also used throughout the
//! test suite. `MemoryRemoteStore` supports deterministic fault injection —
//! fail the next N calls with a scripted error — so retry paths can be
//! exercised without randomness in the coordinator.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{AuthProvider, LocalStore, RemoteStore, StoreError};
use crate::sync::collection::TabGroup;

/// In-memory local store
#[derive(Default)]
pub struct MemoryLocalStore {
    groups: Mutex<Vec<TabGroup>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_groups(groups: Vec<TabGroup>) -> Self {
        Self {
            groups: Mutex::new(groups),
        }
    }

    /// Snapshot of the current contents, for assertions
    pub fn snapshot(&self) -> Vec<TabGroup> {
        self.groups.lock().unwrap().clone()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get_collections(&self) -> Result<Vec<TabGroup>, StoreError> {
        Ok(self.groups.lock().unwrap().clone())
    }

    async fn set_collections(&self, groups: Vec<TabGroup>) -> Result<(), StoreError> {
        *self.groups.lock().unwrap() = groups;
        Ok(())
    }
}

/// What an injected fault looks like to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Transient transport failure — enters the retry path
    Transport,
    /// Transient timeout
    Timeout,
    /// Fatal authentication failure — never retried
    Unauthenticated,
}

impl FaultKind {
    fn to_error(self) -> StoreError {
        match self {
            Self::Transport => StoreError::Transport("injected transport failure".to_string()),
            Self::Timeout => StoreError::Timeout(Duration::from_secs(0)),
            Self::Unauthenticated => StoreError::Unauthenticated,
        }
    }
}

/// In-memory remote store with scripted fault injection
pub struct MemoryRemoteStore {
    groups: Mutex<Vec<TabGroup>>,
    fail_remaining: AtomicU32,
    fault: Mutex<FaultKind>,
    /// Total adapter calls, successful or not
    pub calls: AtomicUsize,
    /// Upload calls that reached the store
    pub uploads: AtomicUsize,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self {
            groups: Mutex::new(Vec::new()),
            fail_remaining: AtomicU32::new(0),
            fault: Mutex::new(FaultKind::Transport),
            calls: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
        }
    }
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_groups(groups: Vec<TabGroup>) -> Self {
        Self {
            groups: Mutex::new(groups),
            ..Self::default()
        }
    }

    /// Fail the next `count` adapter calls with `fault`
    pub fn inject_faults(&self, count: u32, fault: FaultKind) {
        *self.fault.lock().unwrap() = fault;
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> Vec<TabGroup> {
        self.groups.lock().unwrap().clone()
    }

    fn check_fault(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(self.fault.lock().unwrap().to_error());
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn download_collections(&self) -> Result<Vec<TabGroup>, StoreError> {
        self.check_fault()?;
        Ok(self.groups.lock().unwrap().clone())
    }

    async fn upload_collections(
        &self,
        groups: Vec<TabGroup>,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        self.check_fault()?;
        self.uploads.fetch_add(1, Ordering::SeqCst);

        let mut stored = self.groups.lock().unwrap();
        if overwrite {
            *stored = groups;
        } else {
            for group in groups {
                match stored.iter_mut().find(|g| g.id == group.id) {
                    Some(existing) => *existing = group,
                    None => stored.push(group),
                }
            }
        }
        Ok(())
    }
}

/// Fixed-answer authentication gate
pub struct StaticAuth(pub AtomicBool);

impl StaticAuth {
    pub fn authenticated() -> Self {
        Self(AtomicBool::new(true))
    }

    pub fn unauthenticated() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn set(&self, authenticated: bool) {
        self.0.store(authenticated, Ordering::SeqCst);
    }
}

impl AuthProvider for StaticAuth {
    fn is_authenticated(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::collection::{Tab, TabGroup};

    fn group(name: &str) -> TabGroup {
        TabGroup::with_tabs(name, vec![Tab::new("https://example.com", name)])
    }

    #[tokio::test]
    async fn test_injected_faults_fail_then_recover() {
        let remote = MemoryRemoteStore::new();
        remote.inject_faults(2, FaultKind::Transport);

        assert!(remote.download_collections().await.is_err());
        assert!(remote.download_collections().await.is_err());
        assert!(remote.download_collections().await.is_ok());
        assert_eq!(remote.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_upload_without_overwrite_upserts() {
        let existing = group("existing");
        let remote = MemoryRemoteStore::with_groups(vec![existing.clone()]);

        let mut updated = existing.clone();
        updated.name = "renamed".to_string();
        updated.touch();
        let incoming = group("incoming");

        remote
            .upload_collections(vec![updated.clone(), incoming.clone()], false)
            .await
            .unwrap();

        let stored = remote.snapshot();
        assert_eq!(stored.len(), 2);
        assert_eq!(
            stored.iter().find(|g| g.id == existing.id).unwrap().name,
            "renamed"
        );
        assert!(stored.iter().any(|g| g.id == incoming.id));
    }

    #[tokio::test]
    async fn test_upload_with_overwrite_replaces() {
        let remote = MemoryRemoteStore::with_groups(vec![group("old")]);
        let fresh = group("fresh");

        remote
            .upload_collections(vec![fresh.clone()], true)
            .await
            .unwrap();

        assert_eq!(remote.snapshot(), vec![fresh]);
    }
}
