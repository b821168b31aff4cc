//! Sync state tracking for incremental Gmail sync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted history cursor for the authenticated account
///
/// Stored separately from emails so a restarted process can resume
/// incremental sync. Only one SyncState per account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Account email address
    pub account_id: String,
    /// Gmail historyId used as the incremental sync cursor
    pub history_id: String,
    /// When the cursor last advanced
    pub last_sync_at: DateTime<Utc>,
    /// Schema version for migrations
    pub sync_version: u32,
    /// Whether a full sync has completed for this cursor
    #[serde(default = "default_true")]
    pub initial_sync_complete: bool,
}

fn default_true() -> bool {
    true
}

impl SyncState {
    /// Create a SyncState after a completed full sync
    pub fn new(account_id: impl Into<String>, history_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            history_id: history_id.into(),
            last_sync_at: Utc::now(),
            sync_version: 1,
            initial_sync_complete: true,
        }
    }

    /// Update with a new history_id after a successful sync
    pub fn updated(mut self, history_id: impl Into<String>) -> Self {
        self.history_id = history_id.into();
        self.last_sync_at = Utc::now();
        self
    }
}
