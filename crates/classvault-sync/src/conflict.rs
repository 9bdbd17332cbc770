//! Per-key last-writer-wins decision.
//!
//! Conflicts are resolved at whole-key granularity: the replica with the later
//! timestamp overwrites the other entirely. Equal timestamps mean both sides
//! already hold the same version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What one `sync_all` pass does with a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Local is newer, or the remote has no row.
    Upload,
    /// Remote is newer, or the ledger has no entry.
    Download,
    /// Same timestamp on both sides.
    UpToDate,
    /// Neither side has ever written the key.
    Skip,
}

/// Compare the ledger entry against the remote `updated_at` for one key.
pub fn resolve(local: Option<DateTime<Utc>>, remote: Option<DateTime<Utc>>) -> SyncDirection {
    match (local, remote) {
        (None, None) => SyncDirection::Skip,
        (Some(_), None) => SyncDirection::Upload,
        (None, Some(_)) => SyncDirection::Download,
        (Some(l), Some(r)) if l > r => SyncDirection::Upload,
        (Some(l), Some(r)) if l < r => SyncDirection::Download,
        (Some(_), Some(_)) => SyncDirection::UpToDate,
    }
}
