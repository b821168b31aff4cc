//! Full and incremental sync against a remote mailbox
//!
//! Full sync is idempotent: it upserts by remote id, so running it again
//! inserts nothing and only reconciles read/star state. Incremental sync
//! returns new inbox emails without writing them; the caller decides whether
//! the result is still wanted before storing it.

use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::error::RemoteError;
use crate::gmail::api::GmailMessage;
use crate::gmail::{RemoteMailbox, normalize_message};
use crate::models::{Email, Folder, LabelState, RemoteId};
use crate::storage::{MailStore, UpsertOutcome};

/// Statistics from syncing one folder
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// Message IDs returned by the listing
    pub listed: usize,
    pub inserted: usize,
    /// Existing records whose read/star state changed
    pub updated: usize,
    pub unchanged: usize,
    /// Messages skipped after a fetch or store failure
    pub errors: usize,
    /// Stopped early because the session went away
    pub cancelled: bool,
    pub duration_ms: u64,
}

/// Result of syncing every folder
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FullSyncReport {
    pub inbox: SyncStats,
    pub sent: SyncStats,
    /// History cursor captured before listing; `None` unless the sync completed
    pub cursor: Option<String>,
    /// Why the sync stopped short, if it did
    pub failure: Option<RemoteError>,
}

impl FullSyncReport {
    pub fn is_complete(&self) -> bool {
        self.cursor.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncrementalOutcome {
    /// History was read; `next_cursor` is the new position
    Completed,
    /// The cursor is too old; a full resync is needed
    CursorExpired,
    /// The remote could not be reached; retry on the next tick
    Unavailable(String),
    /// The session's grant was rejected
    GrantRevoked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncrementalResult {
    /// New inbox emails, not yet stored
    pub new_emails: Vec<Email>,
    pub next_cursor: String,
    pub outcome: IncrementalOutcome,
    /// Added messages that could not be fetched
    pub errors: usize,
}

impl IncrementalResult {
    fn unchanged(cursor: &str, outcome: IncrementalOutcome) -> Self {
        Self {
            new_emails: Vec::new(),
            next_cursor: cursor.to_string(),
            outcome,
            errors: 0,
        }
    }
}

/// Fetched messages of one folder, not yet stored
#[derive(Debug, Clone)]
pub struct FolderSnapshot {
    pub folder: Folder,
    pub listed: usize,
    pub emails: Vec<Email>,
    /// Messages that failed to fetch
    pub errors: usize,
}

pub struct SyncEngine {
    store: Arc<dyn MailStore>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn MailStore>) -> Self {
        Self { store }
    }

    /// Mirror up to `max` messages of `folder`
    ///
    /// `live` is checked between writes; once it returns false the sync stops
    /// and the stats are marked cancelled. A listing failure aborts the folder.
    pub fn full_sync(
        &self,
        remote: &dyn RemoteMailbox,
        folder: Folder,
        max: usize,
        live: &dyn Fn() -> bool,
    ) -> Result<SyncStats, RemoteError> {
        let start = Instant::now();
        let snapshot = self.fetch_folder(remote, folder, max)?;
        let mut stats = self.store_snapshot(snapshot, live);
        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Synced {}: {} listed, {} new, {} updated, {} errors in {}ms",
            folder, stats.listed, stats.inserted, stats.updated, stats.errors, stats.duration_ms
        );
        Ok(stats)
    }

    /// List and fetch up to `max` messages of `folder` without storing them
    ///
    /// Messages that fail to fetch are skipped and counted. A listing failure
    /// or a revoked grant fails the whole folder.
    pub fn fetch_folder(
        &self,
        remote: &dyn RemoteMailbox,
        folder: Folder,
        max: usize,
    ) -> Result<FolderSnapshot, RemoteError> {
        let ids = remote.list_message_ids(folder, max)?;
        debug!("Listed {} messages in {}", ids.len(), folder);

        let fetched = fetch_all(remote, &ids);
        if let Some(e) = fetched.iter().find_map(|r| r.as_ref().err().filter(|e| is_fatal(e))) {
            return Err(e.clone());
        }

        let mut snapshot = FolderSnapshot {
            folder,
            listed: ids.len(),
            emails: Vec::with_capacity(ids.len()),
            errors: 0,
        };
        for (id, result) in ids.iter().zip(fetched) {
            match result {
                Ok(message) => {
                    let labels = LabelState::from(message.label_ids.as_ref());
                    snapshot.emails.push(normalize_message(&message, &labels));
                }
                Err(e) => {
                    warn!("Failed to fetch message {}: {}", id, e);
                    snapshot.errors += 1;
                }
            }
        }
        Ok(snapshot)
    }

    /// Upsert a fetched folder, stopping once `live` returns false
    pub fn store_snapshot(&self, snapshot: FolderSnapshot, live: &dyn Fn() -> bool) -> SyncStats {
        let mut stats = SyncStats {
            listed: snapshot.listed,
            errors: snapshot.errors,
            ..SyncStats::default()
        };

        for email in snapshot.emails {
            if !live() {
                info!("Sync of {} stopped: session changed", snapshot.folder);
                stats.cancelled = true;
                break;
            }

            let remote_id = email.remote_id.clone();
            match self.store.upsert_email(email) {
                Ok(UpsertOutcome::Inserted(_)) => stats.inserted += 1,
                Ok(UpsertOutcome::Updated(_)) => stats.updated += 1,
                Ok(UpsertOutcome::Unchanged(_)) => stats.unchanged += 1,
                Err(e) => {
                    warn!("Failed to store message {:?}: {:#}", remote_id, e);
                    stats.errors += 1;
                }
            }
        }
        stats
    }

    /// Full sync of inbox then sent
    ///
    /// The cursor is read from the profile before listing so that anything
    /// arriving during the sync is picked up by the next incremental pass.
    pub fn full_sync_all(
        &self,
        remote: &dyn RemoteMailbox,
        inbox_max: usize,
        sent_max: usize,
        live: &dyn Fn() -> bool,
    ) -> FullSyncReport {
        let mut report = FullSyncReport::default();

        let cursor = match remote.get_profile() {
            Ok(profile) => profile.history_id,
            Err(e) => {
                warn!("Full sync aborted, profile unavailable: {}", e);
                report.failure = Some(e);
                return report;
            }
        };

        for (folder, max) in [(Folder::Inbox, inbox_max), (Folder::Sent, sent_max)] {
            match self.full_sync(remote, folder, max, live) {
                Ok(stats) => {
                    let cancelled = stats.cancelled;
                    match folder {
                        Folder::Inbox => report.inbox = stats,
                        Folder::Sent => report.sent = stats,
                    }
                    if cancelled {
                        return report;
                    }
                }
                Err(e) => {
                    warn!("Full sync of {} aborted: {}", folder, e);
                    report.failure = Some(e);
                    return report;
                }
            }
        }

        report.cursor = Some(cursor);
        report
    }

    /// New inbox emails since `cursor`
    ///
    /// Remote failures become outcomes with the cursor unchanged.
    pub fn incremental_sync(&self, remote: &dyn RemoteMailbox, cursor: &str) -> IncrementalResult {
        let delta = match remote.get_history_since(cursor) {
            Ok(delta) => delta,
            Err(RemoteError::CursorExpired) => {
                info!("History cursor {} expired", cursor);
                return IncrementalResult::unchanged(cursor, IncrementalOutcome::CursorExpired);
            }
            Err(RemoteError::GrantRevoked) => {
                return IncrementalResult::unchanged(cursor, IncrementalOutcome::GrantRevoked);
            }
            Err(RemoteError::Unavailable(reason)) => {
                warn!("History unavailable: {}", reason);
                return IncrementalResult::unchanged(
                    cursor,
                    IncrementalOutcome::Unavailable(reason),
                );
            }
        };

        // Pass-scoped dedup; the store's unique remote id covers later passes
        let mut seen = HashSet::new();
        let mut candidates: Vec<RemoteId> = Vec::new();
        let mut errors = 0;
        for id in delta.added {
            if !seen.insert(id.clone()) {
                continue;
            }
            match self.store.has_remote_id(&id) {
                Ok(true) => {}
                Ok(false) => candidates.push(id),
                Err(e) => {
                    warn!("Failed to check message {}: {:#}", id, e);
                    errors += 1;
                }
            }
        }

        let fetched = fetch_all(remote, &candidates);
        if fetched
            .iter()
            .any(|r| matches!(r, Err(RemoteError::GrantRevoked)))
        {
            return IncrementalResult::unchanged(cursor, IncrementalOutcome::GrantRevoked);
        }

        let mut new_emails = Vec::new();
        for (id, result) in candidates.iter().zip(fetched) {
            match result {
                Ok(message) => {
                    let labels = LabelState::from(message.label_ids.as_ref());
                    if !labels.is_inbox() {
                        debug!("Skipping {}: not in inbox", id);
                        continue;
                    }
                    new_emails.push(normalize_message(&message, &labels));
                }
                Err(e) => {
                    warn!("Failed to fetch new message {}: {}", id, e);
                    errors += 1;
                }
            }
        }

        debug!(
            "History since {}: {} new, next cursor {}",
            cursor,
            new_emails.len(),
            delta.next_cursor
        );
        IncrementalResult {
            new_emails,
            next_cursor: delta.next_cursor,
            outcome: IncrementalOutcome::Completed,
            errors,
        }
    }
}

fn fetch_all(remote: &dyn RemoteMailbox, ids: &[RemoteId]) -> Vec<Result<GmailMessage, RemoteError>> {
    ids.par_iter().map(|id| remote.get_message(id)).collect()
}

/// Failures that end the whole sync rather than skipping one message
fn is_fatal(e: &RemoteError) -> bool {
    matches!(e, RemoteError::GrantRevoked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::labels;
    use crate::storage::InMemoryMailStore;
    use crate::testing::FakeRemote;

    fn engine() -> (SyncEngine, Arc<InMemoryMailStore>) {
        let store = Arc::new(InMemoryMailStore::new());
        (SyncEngine::new(store.clone()), store)
    }

    fn always() -> bool {
        true
    }

    #[test]
    fn test_full_sync_inserts_then_is_idempotent() {
        let (engine, store) = engine();
        let remote = FakeRemote::new("me@gmail.com");
        remote.add_message("m1", &[labels::INBOX, labels::UNREAD]);
        remote.add_message("m2", &[labels::INBOX]);
        remote.add_message("m3", &[labels::INBOX]);

        let stats = engine.full_sync(&remote, Folder::Inbox, 50, &always).unwrap();
        assert_eq!(stats.listed, 3);
        assert_eq!(stats.inserted, 3);
        assert_eq!(store.count_emails().unwrap(), 3);

        let again = engine.full_sync(&remote, Folder::Inbox, 50, &always).unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(again.updated, 0);
        assert_eq!(again.unchanged, 3);
    }

    #[test]
    fn test_full_sync_reconciles_flags() {
        let (engine, store) = engine();
        let remote = FakeRemote::new("me@gmail.com");
        remote.add_message("m1", &[labels::INBOX, labels::UNREAD]);
        engine.full_sync(&remote, Folder::Inbox, 50, &always).unwrap();

        remote.set_message_labels("m1", &[labels::INBOX, labels::STARRED]);
        let stats = engine.full_sync(&remote, Folder::Inbox, 50, &always).unwrap();
        assert_eq!(stats.updated, 1);

        let email = store.get_by_remote_id(&RemoteId::new("m1")).unwrap().unwrap();
        assert!(email.is_read);
        assert!(email.is_starred);
    }

    #[test]
    fn test_full_sync_skips_failed_fetches() {
        let (engine, store) = engine();
        let remote = FakeRemote::new("me@gmail.com");
        remote.add_message("m1", &[labels::INBOX]);
        remote.add_message("m2", &[labels::INBOX]);
        remote.fail_fetch("m2");

        let stats = engine.full_sync(&remote, Folder::Inbox, 50, &always).unwrap();
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(store.count_emails().unwrap(), 1);
    }

    #[test]
    fn test_fetch_folder_does_not_store() {
        let (engine, store) = engine();
        let remote = FakeRemote::new("me@gmail.com");
        remote.add_message("m1", &[labels::INBOX]);
        remote.add_message("s1", &[labels::SENT]);

        let snapshot = engine.fetch_folder(&remote, Folder::Inbox, 50).unwrap();
        assert_eq!(snapshot.listed, 1);
        assert_eq!(snapshot.emails.len(), 1);
        assert_eq!(store.count_emails().unwrap(), 0);

        let stats = engine.store_snapshot(snapshot, &always);
        assert_eq!(stats.inserted, 1);
        assert_eq!(store.count_emails().unwrap(), 1);
    }

    #[test]
    fn test_listing_failure_aborts() {
        let (engine, _) = engine();
        let remote = FakeRemote::new("me@gmail.com");
        remote.set_offline(true);

        let result = engine.full_sync(&remote, Folder::Inbox, 50, &always);
        assert!(matches!(result, Err(RemoteError::Unavailable(_))));
    }

    #[test]
    fn test_full_sync_stops_when_not_live() {
        let (engine, store) = engine();
        let remote = FakeRemote::new("me@gmail.com");
        remote.add_message("m1", &[labels::INBOX]);
        remote.add_message("m2", &[labels::INBOX]);

        let stats = engine.full_sync(&remote, Folder::Inbox, 50, &|| false).unwrap();
        assert!(stats.cancelled);
        assert_eq!(store.count_emails().unwrap(), 0);
    }

    #[test]
    fn test_full_sync_all_captures_cursor() {
        let (engine, store) = engine();
        let remote = FakeRemote::new("me@gmail.com");
        remote.add_message("m1", &[labels::INBOX]);
        remote.add_message("s1", &[labels::SENT]);
        remote.set_history_id("500");

        let report = engine.full_sync_all(&remote, 50, 50, &always);
        assert!(report.is_complete());
        assert_eq!(report.cursor.as_deref(), Some("500"));
        assert_eq!(report.inbox.inserted, 1);
        assert_eq!(report.sent.inserted, 1);

        let sent = store.get_by_remote_id(&RemoteId::new("s1")).unwrap().unwrap();
        assert_eq!(sent.folder, Folder::Sent);
    }

    #[test]
    fn test_full_sync_all_without_profile() {
        let (engine, _) = engine();
        let remote = FakeRemote::new("me@gmail.com");
        remote.set_offline(true);

        let report = engine.full_sync_all(&remote, 50, 50, &always);
        assert!(!report.is_complete());
        assert!(report.failure.is_some());
    }

    #[test]
    fn test_incremental_dedups_within_pass_and_against_store() {
        let (engine, store) = engine();
        let remote = FakeRemote::new("me@gmail.com");
        remote.add_message("old", &[labels::INBOX]);
        engine.full_sync(&remote, Folder::Inbox, 50, &always).unwrap();

        remote.add_message("new", &[labels::INBOX, labels::UNREAD]);
        remote.push_history(&["old", "new", "new"], "20");

        let result = engine.incremental_sync(&remote, "10");
        assert_eq!(result.outcome, IncrementalOutcome::Completed);
        assert_eq!(result.next_cursor, "20");
        assert_eq!(result.new_emails.len(), 1);
        assert_eq!(result.new_emails[0].remote_id, Some(RemoteId::new("new")));
        // Nothing is written by the incremental pass itself
        assert_eq!(store.count_emails().unwrap(), 1);
    }

    #[test]
    fn test_incremental_keeps_inbox_only() {
        let (engine, _) = engine();
        let remote = FakeRemote::new("me@gmail.com");
        remote.add_message("draft", &["DRAFT"]);
        remote.add_message("inbox", &[labels::INBOX]);
        remote.push_history(&["draft", "inbox"], "2");

        let result = engine.incremental_sync(&remote, "1");
        assert_eq!(result.new_emails.len(), 1);
        assert_eq!(result.new_emails[0].remote_id, Some(RemoteId::new("inbox")));
    }

    #[test]
    fn test_incremental_expired_cursor() {
        let (engine, _) = engine();
        let remote = FakeRemote::new("me@gmail.com");
        remote.expire_cursor();

        let result = engine.incremental_sync(&remote, "10");
        assert_eq!(result.outcome, IncrementalOutcome::CursorExpired);
        assert_eq!(result.next_cursor, "10");
        assert!(result.new_emails.is_empty());
    }

    #[test]
    fn test_incremental_unavailable() {
        let (engine, _) = engine();
        let remote = FakeRemote::new("me@gmail.com");
        remote.set_offline(true);

        let result = engine.incremental_sync(&remote, "10");
        assert!(matches!(result.outcome, IncrementalOutcome::Unavailable(_)));
        assert_eq!(result.next_cursor, "10");
    }

    #[test]
    fn test_incremental_grant_revoked() {
        let (engine, _) = engine();
        let remote = FakeRemote::new("me@gmail.com");
        remote.revoke_grant();

        let result = engine.incremental_sync(&remote, "10");
        assert_eq!(result.outcome, IncrementalOutcome::GrantRevoked);
        assert_eq!(result.next_cursor, "10");
    }
}
