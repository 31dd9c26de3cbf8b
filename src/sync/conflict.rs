//! Conflict detection and resolution for tab-group snapshots.
//!
//! The resolver is stateless: `detect` and `resolve` are pure functions of
//! two snapshots, so retries and re-merges are idempotent and everything here
//! is testable without a coordinator.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::collection::{compute_checksum, SnapshotError, Tab, TabGroup};

/// Resolution strategy for a divergent pair of snapshots
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// Adopt the local snapshot verbatim; discard remote changes
    LocalWins,
    /// Adopt the remote snapshot verbatim; discard local changes
    RemoteWins,
    /// Deduplicating union of both snapshots (recommended default)
    Merge,
}

/// How the merge handler treats divergent pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvePolicy {
    /// Resolve automatically with the given strategy
    Auto(MergeStrategy),
    /// Park divergent pairs as pending conflicts for the user to resolve
    Manual,
}

impl Default for ResolvePolicy {
    fn default() -> Self {
        Self::Auto(MergeStrategy::Merge)
    }
}

/// A single field-level difference between two snapshots
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Difference {
    pub field: String,
    pub local_value: String,
    pub remote_value: String,
}

/// The chosen resolution for a conflict, once one exists
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub strategy: MergeStrategy,
    pub merged: TabGroup,
    /// Whether the resolution was applied without user input
    pub automatic: bool,
}

/// Produced when local and remote versions of the same group have diverged
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub group_id: Uuid,
    pub local: TabGroup,
    pub remote: TabGroup,
    pub differences: Vec<Difference>,
    pub suggested: MergeStrategy,
    pub detected_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConflictError {
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(#[from] SnapshotError),
    #[error("snapshot id mismatch: local {local}, remote {remote}")]
    IdMismatch { local: Uuid, remote: Uuid },
}

/// Outcome of comparing two snapshots of the same group
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictCheck {
    /// Equal content — version skew alone is not a conflict
    Equivalent,
    /// Local is a strict successor of remote; local wins without input
    LocalNewer,
    /// Remote is a strict successor of local; remote wins without input
    RemoteNewer,
    /// Content differs and neither side dominates
    Diverged(Box<ConflictRecord>),
}

/// Compare two snapshots of the same group and classify the difference.
///
/// Two snapshots conflict iff their checksums differ AND neither strictly
/// dominates the other on (`version`, `updated_at`). Equal checksums are
/// never a conflict, no matter how far the versions have drifted.
pub fn detect(local: &TabGroup, remote: &TabGroup) -> Result<ConflictCheck, ConflictError> {
    local.validate()?;
    remote.validate()?;
    if local.id != remote.id {
        return Err(ConflictError::IdMismatch {
            local: local.id,
            remote: remote.id,
        });
    }

    if local.same_content(remote) {
        return Ok(ConflictCheck::Equivalent);
    }

    if dominates(local, remote) {
        return Ok(ConflictCheck::LocalNewer);
    }
    if dominates(remote, local) {
        return Ok(ConflictCheck::RemoteNewer);
    }

    Ok(ConflictCheck::Diverged(Box::new(build_record(
        local, remote,
    ))))
}

/// `a` strictly dominates `b` when it is at least as new on both axes and
/// newer on at least one — i.e. a pure successor, not a concurrent edit.
fn dominates(a: &TabGroup, b: &TabGroup) -> bool {
    a.version >= b.version
        && a.updated_at >= b.updated_at
        && (a.version > b.version || a.updated_at > b.updated_at)
}

fn build_record(local: &TabGroup, remote: &TabGroup) -> ConflictRecord {
    let mut differences = Vec::new();

    if local.name != remote.name {
        differences.push(Difference {
            field: "name".to_string(),
            local_value: local.name.clone(),
            remote_value: remote.name.clone(),
        });
    }

    let local_by_url: HashMap<&str, &Tab> =
        local.tabs.iter().map(|t| (t.url.as_str(), t)).collect();
    let remote_by_url: HashMap<&str, &Tab> =
        remote.tabs.iter().map(|t| (t.url.as_str(), t)).collect();

    for tab in &local.tabs {
        match remote_by_url.get(tab.url.as_str()) {
            None => differences.push(Difference {
                field: format!("tabs[{}]", tab.url),
                local_value: tab.title.clone(),
                remote_value: String::new(),
            }),
            Some(remote_tab) if remote_tab.title != tab.title => {
                differences.push(Difference {
                    field: format!("tabs[{}].title", tab.url),
                    local_value: tab.title.clone(),
                    remote_value: remote_tab.title.clone(),
                });
            }
            Some(_) => {}
        }
    }
    for tab in &remote.tabs {
        if !local_by_url.contains_key(tab.url.as_str()) {
            differences.push(Difference {
                field: format!("tabs[{}]", tab.url),
                local_value: String::new(),
                remote_value: tab.title.clone(),
            });
        }
    }

    let suggested = if local.is_locked {
        MergeStrategy::LocalWins
    } else {
        MergeStrategy::Merge
    };

    ConflictRecord {
        group_id: local.id,
        local: local.clone(),
        remote: remote.clone(),
        differences,
        suggested,
        detected_at: Utc::now(),
        resolution: None,
    }
}

/// Produce the resolved snapshot for a local/remote pair under `strategy`.
///
/// Pure and deterministic on the tab set: the same inputs and strategy always
/// yield the same tabs, name and version. Inputs are never mutated.
pub fn resolve(
    local: &TabGroup,
    remote: &TabGroup,
    strategy: MergeStrategy,
) -> Result<TabGroup, ConflictError> {
    local.validate()?;
    remote.validate()?;
    if local.id != remote.id {
        return Err(ConflictError::IdMismatch {
            local: local.id,
            remote: remote.id,
        });
    }

    let merged = match strategy {
        MergeStrategy::LocalWins => local.clone(),
        MergeStrategy::RemoteWins => remote.clone(),
        MergeStrategy::Merge => smart_merge(local, remote),
    };
    Ok(merged)
}

/// Deduplicating union: local tabs first in order, remote-only tabs appended.
/// When both sides carry a URL, the tab with the newer `created_at` wins;
/// an exact tie keeps the local tab.
fn smart_merge(local: &TabGroup, remote: &TabGroup) -> TabGroup {
    let mut tabs: Vec<Tab> = Vec::with_capacity(local.tabs.len() + remote.tabs.len());
    let mut index_by_url: HashMap<String, usize> = HashMap::new();

    for tab in local.tabs.iter().chain(remote.tabs.iter()) {
        match index_by_url.get(&tab.url) {
            Some(&i) => {
                if tab.created_at > tabs[i].created_at {
                    tabs[i] = tab.clone();
                }
            }
            None => {
                index_by_url.insert(tab.url.clone(), tabs.len());
                tabs.push(tab.clone());
            }
        }
    }

    let checksum = compute_checksum(&tabs);
    TabGroup {
        id: local.id,
        name: local.name.clone(),
        tabs,
        version: local.version.max(remote.version) + 1,
        updated_at: Utc::now(),
        is_locked: local.is_locked,
        checksum,
    }
}

/// Result of reconciling the full local and remote collection lists
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// The merged collection list to persist on both sides
    pub groups: Vec<TabGroup>,
    /// Groups where the remote version was adopted or folded in
    pub pulled: usize,
    /// Groups where the local version will overwrite or extend remote
    pub pushed: usize,
    /// Conflicts resolved automatically, with their resolutions
    pub resolved: Vec<ConflictRecord>,
    /// Divergent pairs awaiting user input (policy `Manual`)
    pub pending: Vec<ConflictRecord>,
}

/// Reconcile two full collection lists, pairing groups by id.
///
/// Local-only groups pass through, remote-only groups are adopted, and each
/// divergent pair goes through `detect`/`resolve` under `policy`. Locked
/// local groups are never mutated, whatever the remote side says.
pub fn reconcile(
    local_groups: &[TabGroup],
    remote_groups: &[TabGroup],
    policy: ResolvePolicy,
) -> Result<ReconcileOutcome, ConflictError> {
    let mut outcome = ReconcileOutcome::default();
    let remote_by_id: HashMap<Uuid, &TabGroup> =
        remote_groups.iter().map(|g| (g.id, g)).collect();

    for local in local_groups {
        let remote = match remote_by_id.get(&local.id) {
            Some(remote) => *remote,
            None => {
                // New on this device — remote gets it on the next upload
                outcome.groups.push(local.clone());
                outcome.pushed += 1;
                continue;
            }
        };

        if local.is_locked {
            local.validate()?;
            outcome.groups.push(local.clone());
            if !local.same_content(remote) {
                outcome.pushed += 1;
            }
            continue;
        }

        match detect(local, remote)? {
            ConflictCheck::Equivalent => {
                // Same content — keep whichever carries the higher version so
                // the monotonic-version invariant survives the write-back
                if remote.version > local.version {
                    outcome.groups.push(remote.clone());
                } else {
                    outcome.groups.push(local.clone());
                }
            }
            ConflictCheck::LocalNewer => {
                outcome.groups.push(local.clone());
                outcome.pushed += 1;
            }
            ConflictCheck::RemoteNewer => {
                outcome.groups.push(remote.clone());
                outcome.pulled += 1;
            }
            ConflictCheck::Diverged(record) => match policy {
                ResolvePolicy::Auto(strategy) => {
                    let merged = resolve(local, remote, strategy)?;
                    let mut record = *record;
                    record.resolution = Some(Resolution {
                        strategy,
                        merged: merged.clone(),
                        automatic: true,
                    });
                    outcome.groups.push(merged);
                    outcome.resolved.push(record);
                    outcome.pulled += 1;
                    outcome.pushed += 1;
                }
                ResolvePolicy::Manual => {
                    // Keep local until the user chooses
                    outcome.groups.push(local.clone());
                    outcome.pending.push(*record);
                }
            },
        }
    }

    let local_ids: std::collections::HashSet<Uuid> =
        local_groups.iter().map(|g| g.id).collect();
    for remote in remote_groups {
        if !local_ids.contains(&remote.id) {
            remote.validate()?;
            outcome.groups.push(remote.clone());
            outcome.pulled += 1;
        }
    }

    Ok(outcome)
}
