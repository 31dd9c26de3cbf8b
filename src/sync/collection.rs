use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

/// A single saved tab
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    /// Unique ID for this tab
    pub id: Uuid,
    /// The tab's URL — identity for merge/dedup purposes
    pub url: String,
    /// Page title at capture time
    pub title: String,
    /// Reference to a cached favicon, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon_ref: Option<String>,
    /// When this tab was saved
    pub created_at: DateTime<Utc>,
}

impl Tab {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            title: title.into(),
            favicon_ref: None,
            created_at: Utc::now(),
        }
    }
}

/// A named group of saved tabs — the unit of synchronization.
///
/// Two groups with equal `id` and equal `checksum` are equivalent regardless
/// of `version` skew; the checksum covers tab content and order, not
/// timestamps, so the same logical tab saved on two devices compares equal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TabGroup {
    /// Stable, globally unique ID
    pub id: Uuid,
    /// User-visible group name
    pub name: String,
    /// Ordered list of tabs
    pub tabs: Vec<Tab>,
    /// Monotonic version — incremented on every persisted mutation
    pub version: u64,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
    /// User-set flag blocking mutation by sync
    #[serde(default)]
    pub is_locked: bool,
    /// Content hash over `tabs`, used to detect no-op version bumps
    pub checksum: String,
}

impl TabGroup {
    pub fn new(name: impl Into<String>) -> Self {
        let tabs = Vec::new();
        let checksum = compute_checksum(&tabs);
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            tabs,
            version: 1,
            updated_at: Utc::now(),
            is_locked: false,
            checksum,
        }
    }

    pub fn with_tabs(name: impl Into<String>, tabs: Vec<Tab>) -> Self {
        let mut group = Self::new(name);
        group.tabs = tabs;
        group.checksum = compute_checksum(&group.tabs);
        group
    }

    /// Record a persisted mutation: bump version, refresh timestamp + checksum
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
        self.checksum = compute_checksum(&self.tabs);
    }

    /// Recompute the checksum without bumping the version
    pub fn refresh_checksum(&mut self) {
        self.checksum = compute_checksum(&self.tabs);
    }

    /// Content equivalence: equal checksums, regardless of version skew
    pub fn same_content(&self, other: &TabGroup) -> bool {
        self.checksum == other.checksum
    }

    /// Structural validation of a snapshot before sync touches it
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.id.is_nil() {
            return Err(SnapshotError::MissingGroupId);
        }
        for (index, tab) in self.tabs.iter().enumerate() {
            if tab.id.is_nil() {
                return Err(SnapshotError::MissingTabId {
                    group: self.id,
                    index,
                });
            }
            if tab.url.trim().is_empty() {
                return Err(SnapshotError::EmptyTabUrl {
                    group: self.id,
                    index,
                });
            }
        }
        Ok(())
    }
}

/// Content hash over a tab list: url, title and favicon of each tab, in order.
///
/// Timestamps are deliberately excluded — two devices saving the same URL
/// independently produce content-identical tabs.
pub fn compute_checksum(tabs: &[Tab]) -> String {
    let mut hasher = Sha256::new();
    for tab in tabs {
        hasher.update(tab.url.as_bytes());
        hasher.update([0u8]);
        hasher.update(tab.title.as_bytes());
        hasher.update([0u8]);
        if let Some(favicon) = &tab.favicon_ref {
            hasher.update(favicon.as_bytes());
        }
        hasher.update([0xff]);
    }
    hex::encode(hasher.finalize())
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SnapshotError {
    #[error("snapshot has no group id")]
    MissingGroupId,
    #[error("tab {index} in group {group} has no id")]
    MissingTabId { group: Uuid, index: usize },
    #[error("tab {index} in group {group} has an empty url")]
    EmptyTabUrl { group: Uuid, index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_ignores_timestamps() {
        let mut a = Tab::new("https://example.com", "Example");
        let mut b = a.clone();
        b.id = Uuid::new_v4();
        b.created_at = Utc::now();
        a.created_at = Utc::now();

        assert_eq!(compute_checksum(&[a]), compute_checksum(&[b]));
    }

    #[test]
    fn test_checksum_depends_on_order() {
        let a = Tab::new("https://a.example", "A");
        let b = Tab::new("https://b.example", "B");

        assert_ne!(
            compute_checksum(&[a.clone(), b.clone()]),
            compute_checksum(&[b, a]),
        );
    }

    #[test]
    fn test_touch_bumps_version_and_checksum() {
        let mut group = TabGroup::new("Reading list");
        let before = group.version;

        group.tabs.push(Tab::new("https://example.com", "Example"));
        group.touch();

        assert_eq!(group.version, before + 1);
        assert_eq!(group.checksum, compute_checksum(&group.tabs));
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        let mut group = TabGroup::new("Work");
        group.tabs.push(Tab::new("  ", "blank"));

        assert!(matches!(
            group.validate(),
            Err(SnapshotError::EmptyTabUrl { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_nil_group_id() {
        let mut group = TabGroup::new("Work");
        group.id = Uuid::nil();

        assert_eq!(group.validate(), Err(SnapshotError::MissingGroupId));
    }
}
