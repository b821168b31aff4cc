//! Storage trait definitions

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{Account, Email, EmailId, RemoteId, SyncState, ThreadId};
use crate::query::EmailQuery;

/// Result of upserting an email by remote id
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// New record; carries the stored email
    Inserted(Email),
    /// Existing record whose read/star state changed
    Updated(Email),
    /// Existing record, nothing to change
    Unchanged(Email),
}

impl UpsertOutcome {
    pub fn email(&self) -> &Email {
        match self {
            UpsertOutcome::Inserted(e) | UpsertOutcome::Updated(e) | UpsertOutcome::Unchanged(e) => e,
        }
    }

    pub fn into_email(self) -> Email {
        match self {
            UpsertOutcome::Inserted(e) | UpsertOutcome::Updated(e) | UpsertOutcome::Unchanged(e) => e,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted(_))
    }
}

/// Trait for mirror storage operations
///
/// Every method is atomic per record: an upsert or flag update is a single
/// critical section (one lock or one transaction), so concurrent sync and
/// client mutations never interleave inside a record.
pub trait MailStore: Send + Sync {
    // === Emails ===

    /// Insert or update an email keyed by `remote_id`
    ///
    /// An unknown remote id is inserted. A known one only has `is_read` and
    /// `is_starred` updated; every other field of the stored record is kept.
    /// An email without a remote id is always inserted.
    fn upsert_email(&self, email: Email) -> Result<UpsertOutcome>;

    fn get_email(&self, id: &EmailId) -> Result<Option<Email>>;

    fn get_by_remote_id(&self, id: &RemoteId) -> Result<Option<Email>>;

    fn has_remote_id(&self, id: &RemoteId) -> Result<bool>;

    /// Find by local id, then by remote id
    fn find_email(&self, key: &str) -> Result<Option<Email>> {
        if let Some(email) = self.get_email(&EmailId::new(key))? {
            return Ok(Some(email));
        }
        self.get_by_remote_id(&RemoteId::new(key))
    }

    /// Emails matching `query`, ordered by `sent_at` descending then insertion order
    fn query_emails(&self, query: &EmailQuery) -> Result<Vec<Email>>;

    /// Emails in a thread, ordered by `sent_at` ascending
    fn list_thread(&self, thread_id: &ThreadId) -> Result<Vec<Email>>;

    /// Set the read flag; `None` if no such email
    fn set_read(&self, id: &EmailId, is_read: bool) -> Result<Option<Email>>;

    /// Flip the starred flag; `None` if no such email
    fn toggle_starred(&self, id: &EmailId) -> Result<Option<Email>>;

    fn count_emails(&self) -> Result<usize>;

    /// Delete every mirrored email, keeping account, sync state and revocations
    fn clear_mail_data(&self) -> Result<()>;

    // === Sync State ===

    fn get_sync_state(&self, account_id: &str) -> Result<Option<SyncState>>;

    /// Save sync state (upsert)
    fn save_sync_state(&self, state: SyncState) -> Result<()>;

    fn delete_sync_state(&self, account_id: &str) -> Result<()>;

    // === Account ===

    /// The single persisted account, if any
    fn load_account(&self) -> Result<Option<Account>>;

    /// Persist the account, replacing any previous one
    fn save_account(&self, account: &Account) -> Result<()>;

    fn delete_account(&self) -> Result<()>;

    // === Session token revocations ===

    /// Add a token id to the revocation set until its natural expiry
    fn revoke_token(&self, token_id: &str, expires_at: DateTime<Utc>) -> Result<()>;

    fn is_token_revoked(&self, token_id: &str) -> Result<bool>;

    /// Drop revocations whose token has expired anyway; returns how many
    fn purge_expired_revocations(&self, now: DateTime<Utc>) -> Result<usize>;
}
