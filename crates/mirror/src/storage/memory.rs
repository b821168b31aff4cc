//! In-memory storage implementation
//!
//! Used by tests and as a scratch store. Emails live in one vector guarded by
//! a single lock together with their id indexes, so every upsert or flag
//! change is one critical section.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{MailStore, UpsertOutcome};
use crate::models::{Account, Email, EmailId, RemoteId, SyncState, ThreadId};
use crate::query::EmailQuery;

/// Emails in insertion order plus unique indexes
#[derive(Default)]
struct MirrorData {
    emails: Vec<Email>,
    by_id: HashMap<String, usize>,
    /// Unique index on remote id
    by_remote: HashMap<String, usize>,
}

impl MirrorData {
    fn update<F>(&mut self, id: &EmailId, f: F) -> Option<Email>
    where
        F: FnOnce(&mut Email),
    {
        let idx = *self.by_id.get(id.as_str())?;
        let email = &mut self.emails[idx];
        f(email);
        Some(email.clone())
    }
}

/// In-memory implementation of MailStore
pub struct InMemoryMailStore {
    mirror: RwLock<MirrorData>,
    sync_states: RwLock<HashMap<String, SyncState>>,
    account: RwLock<Option<Account>>,
    /// Revoked token id -> natural expiry
    revoked: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryMailStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            mirror: RwLock::new(MirrorData::default()),
            sync_states: RwLock::new(HashMap::new()),
            account: RwLock::new(None),
            revoked: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryMailStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MailStore for InMemoryMailStore {
    fn upsert_email(&self, email: Email) -> Result<UpsertOutcome> {
        let mut guard = self.mirror.write().unwrap();
        let mirror = &mut *guard;

        if let Some(remote_id) = &email.remote_id
            && let Some(&idx) = mirror.by_remote.get(remote_id.as_str())
        {
            let existing = &mut mirror.emails[idx];
            if existing.is_read == email.is_read && existing.is_starred == email.is_starred {
                return Ok(UpsertOutcome::Unchanged(existing.clone()));
            }
            existing.is_read = email.is_read;
            existing.is_starred = email.is_starred;
            return Ok(UpsertOutcome::Updated(existing.clone()));
        }

        let idx = mirror.emails.len();
        mirror.by_id.insert(email.id.as_str().to_string(), idx);
        if let Some(remote_id) = &email.remote_id {
            mirror.by_remote.insert(remote_id.as_str().to_string(), idx);
        }
        mirror.emails.push(email.clone());
        Ok(UpsertOutcome::Inserted(email))
    }

    fn get_email(&self, id: &EmailId) -> Result<Option<Email>> {
        let mirror = self.mirror.read().unwrap();
        Ok(mirror
            .by_id
            .get(id.as_str())
            .map(|&idx| mirror.emails[idx].clone()))
    }

    fn get_by_remote_id(&self, id: &RemoteId) -> Result<Option<Email>> {
        let mirror = self.mirror.read().unwrap();
        Ok(mirror
            .by_remote
            .get(id.as_str())
            .map(|&idx| mirror.emails[idx].clone()))
    }

    fn has_remote_id(&self, id: &RemoteId) -> Result<bool> {
        Ok(self.mirror.read().unwrap().by_remote.contains_key(id.as_str()))
    }

    fn query_emails(&self, query: &EmailQuery) -> Result<Vec<Email>> {
        let mirror = self.mirror.read().unwrap();
        let mut matches: Vec<&Email> = mirror.emails.iter().filter(|e| query.matches(e)).collect();
        // Stable sort keeps insertion order for equal timestamps
        matches.sort_by_key(|e| Reverse(e.sent_at));
        Ok(matches
            .into_iter()
            .take(query.effective_limit())
            .cloned()
            .collect())
    }

    fn list_thread(&self, thread_id: &ThreadId) -> Result<Vec<Email>> {
        let mirror = self.mirror.read().unwrap();
        let mut emails: Vec<Email> = mirror
            .emails
            .iter()
            .filter(|e| &e.thread_id == thread_id)
            .cloned()
            .collect();
        emails.sort_by_key(|e| e.sent_at);
        Ok(emails)
    }

    fn set_read(&self, id: &EmailId, is_read: bool) -> Result<Option<Email>> {
        Ok(self.mirror.write().unwrap().update(id, |e| e.is_read = is_read))
    }

    fn toggle_starred(&self, id: &EmailId) -> Result<Option<Email>> {
        Ok(self
            .mirror
            .write()
            .unwrap()
            .update(id, |e| e.is_starred = !e.is_starred))
    }

    fn count_emails(&self) -> Result<usize> {
        Ok(self.mirror.read().unwrap().emails.len())
    }

    fn clear_mail_data(&self) -> Result<()> {
        *self.mirror.write().unwrap() = MirrorData::default();
        Ok(())
    }

    fn get_sync_state(&self, account_id: &str) -> Result<Option<SyncState>> {
        Ok(self.sync_states.read().unwrap().get(account_id).cloned())
    }

    fn save_sync_state(&self, state: SyncState) -> Result<()> {
        self.sync_states
            .write()
            .unwrap()
            .insert(state.account_id.clone(), state);
        Ok(())
    }

    fn delete_sync_state(&self, account_id: &str) -> Result<()> {
        self.sync_states.write().unwrap().remove(account_id);
        Ok(())
    }

    fn load_account(&self) -> Result<Option<Account>> {
        Ok(self.account.read().unwrap().clone())
    }

    fn save_account(&self, account: &Account) -> Result<()> {
        *self.account.write().unwrap() = Some(account.clone());
        Ok(())
    }

    fn delete_account(&self) -> Result<()> {
        *self.account.write().unwrap() = None;
        Ok(())
    }

    fn revoke_token(&self, token_id: &str, expires_at: DateTime<Utc>) -> Result<()> {
        self.revoked
            .write()
            .unwrap()
            .insert(token_id.to_string(), expires_at);
        Ok(())
    }

    fn is_token_revoked(&self, token_id: &str) -> Result<bool> {
        Ok(self.revoked.read().unwrap().contains_key(token_id))
    }

    fn purge_expired_revocations(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut revoked = self.revoked.write().unwrap();
        let before = revoked.len();
        revoked.retain(|_, expires_at| *expires_at > now);
        Ok(before - revoked.len())
    }
}
