//! Change-tracking state shared by every cached entity kind.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Local edit state of a cached record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ChangeStatus {
    /// Mirrors the server; nothing pending.
    #[default]
    NoChange,
    /// Created locally; the server has never seen it.
    Created,
    /// Edited locally on top of previously synced data.
    Modified,
    /// Tombstoned locally; the delete has not been confirmed yet.
    Deleted,
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeStatus::NoChange => "NoChange",
            ChangeStatus::Created => "Created",
            ChangeStatus::Modified => "Modified",
            ChangeStatus::Deleted => "Deleted",
        };
        f.write_str(s)
    }
}

/// Opaque caller-defined sync marker carried on each pending change.
///
/// The cache never interprets values other than [`SyncStatus::READY`],
/// which the change manager uses for its ready-only change listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct SyncStatus(pub u32);

impl SyncStatus {
    /// The conventional "ready to be sent" marker.
    pub const READY: SyncStatus = SyncStatus(0);

    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

/// Per-record change bookkeeping shared by object, relationship and file
/// metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChangeInfo {
    pub status: ChangeStatus,
    pub sync_status: SyncStatus,
    /// Value from the single global change sequence; 0 = unassigned.
    /// Immutable once assigned until the record returns to NoChange.
    pub change_number: u64,
    /// Monotonic per-record counter, bumped on every accepted local
    /// mutation; compared against in-flight sync snapshots at commit.
    pub revision: u64,
}

impl ChangeInfo {
    /// True while a change is pending.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        self.status != ChangeStatus::NoChange
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_no_change_with_unassigned_number() {
        let info = ChangeInfo::default();
        assert_eq!(info.status, ChangeStatus::NoChange);
        assert_eq!(info.change_number, 0);
        assert_eq!(info.revision, 0);
        assert!(!info.is_changed());
    }

    #[test]
    fn ready_is_the_default_sync_status() {
        assert_eq!(SyncStatus::default(), SyncStatus::READY);
    }
}
