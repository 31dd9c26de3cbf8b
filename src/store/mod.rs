//! Store adapter boundaries.
//!
//! The coordinator is the only writer to either store, and it only ever runs
//! one operation at a time — adapters are not required to support concurrent
//! writers. Transport, auth and on-disk formats live behind these traits.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::sync::collection::TabGroup;

pub use memory::{FaultKind, MemoryLocalStore, MemoryRemoteStore, StaticAuth};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("not authenticated")]
    Unauthenticated,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Transient errors enter the coordinator's retry path; everything else
    /// is fatal to the operation and surfaced immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) | Self::Io(_) => true,
            Self::Unauthenticated => false,
        }
    }
}

/// The device-local persistent store of tab groups
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get_collections(&self) -> Result<Vec<TabGroup>, StoreError>;
    async fn set_collections(&self, groups: Vec<TabGroup>) -> Result<(), StoreError>;
}

/// The remote cloud store of tab groups.
///
/// `overwrite = true` replaces the remote list wholesale; `false` upserts the
/// given groups by id, keeping remote groups not present in the payload.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn download_collections(&self) -> Result<Vec<TabGroup>, StoreError>;
    async fn upload_collections(
        &self,
        groups: Vec<TabGroup>,
        overwrite: bool,
    ) -> Result<(), StoreError>;
}

/// Authentication gate consulted before any upload/download is enqueued
pub trait AuthProvider: Send + Sync {
    fn is_authenticated(&self) -> bool;
}
