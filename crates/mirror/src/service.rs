//! Mail service facade
//!
//! Wires the store, session manager, sync engine, action handler and
//! broadcaster together. Every sync path runs under one guard: poll ticks
//! skip when it is taken, full syncs wait for it.

use chrono::Duration;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use crate::actions::{ActionHandler, SendOutcome, reply_headers};
use crate::config::Settings;
use crate::error::{ActionError, RemoteError, SessionError};
use crate::gmail::{MailboxProvider, OutgoingMessage, RemoteMailbox};
use crate::models::{Email, Folder, Session, SessionStatus, ThreadId};
use crate::notify::{Broadcaster, MailEvent};
use crate::query::{self, EmailQuery};
use crate::session::{SessionManager, SessionToken, TokenIssuer};
use crate::storage::{MailStore, UpsertOutcome};
use crate::sync::{FullSyncReport, IncrementalOutcome, PollTask, SyncEngine};

/// What one poll tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another sync held the guard
    Skipped,
    /// No session
    Idle,
    /// No cursor yet; a full sync seeded one
    Seeded { inserted: usize },
    /// Incremental pass stored and announced `inserted` emails
    Advanced { inserted: usize },
    /// The cursor had expired; a full resync reseeded it
    Resynced { inserted: usize },
    /// The session changed while the tick ran
    Discarded,
    Unavailable(String),
    /// The grant was revoked and the session dropped
    Expired,
}

/// Inserted counts of a manual sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManualSyncReport {
    pub inbox: usize,
    pub sent: usize,
}

pub struct MailService {
    store: Arc<dyn MailStore>,
    sessions: SessionManager,
    engine: SyncEngine,
    actions: ActionHandler,
    broadcaster: Arc<Broadcaster>,
    settings: Settings,
    sync_lock: Mutex<()>,
}

impl MailService {
    pub fn new(
        store: Arc<dyn MailStore>,
        provider: Arc<dyn MailboxProvider>,
        settings: Settings,
    ) -> Self {
        let tokens = TokenIssuer::new(
            &settings.jwt_secret,
            Duration::hours(settings.token_ttl_hours.max(1)),
        );
        let sessions = SessionManager::new(
            provider,
            Arc::clone(&store),
            tokens,
            settings.redirect_uri.clone(),
            settings.force_consent,
        );
        let broadcaster = Arc::new(Broadcaster::new());

        Self {
            engine: SyncEngine::new(Arc::clone(&store)),
            actions: ActionHandler::new(
                Arc::clone(&store),
                Arc::clone(&broadcaster),
                settings.keep_failed_sends,
            ),
            store,
            sessions,
            broadcaster,
            settings,
            sync_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn MailStore> {
        &self.store
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // === Session ===

    /// Reload the persisted session at startup
    pub fn restore(&self) -> Result<Option<Session>, SessionError> {
        self.sessions.restore()
    }

    pub fn status(&self) -> SessionStatus {
        self.sessions.status()
    }

    pub fn begin_login(&self) -> String {
        self.sessions.begin_oauth(None)
    }

    /// Complete OAuth and issue a session token. The caller starts the
    /// initial sync.
    ///
    /// Switching accounts invalidates the old session and waits for its syncs
    /// before the old mirror is wiped.
    pub fn complete_login(&self, code: &str) -> Result<(Session, SessionToken), SessionError> {
        let login = self.sessions.authorize(code)?;
        let session = if self.sessions.replaces_account(&login)? {
            info!("Switching to account {}", login.account_email());
            self.sessions.invalidate();
            let _guard = self.lock_sync();
            self.sessions.commit_login(login)?
        } else {
            self.sessions.commit_login(login)?
        };
        let token = self.sessions.issue_session_token(&session.account_email)?;
        Ok((session, token))
    }

    /// Account email for a valid bearer token
    pub fn authenticate(&self, token: &str) -> Result<String, SessionError> {
        self.sessions.validate_session_token(token)
    }

    /// Invalidate in-flight work, wait for it, then tear everything down
    pub fn logout(&self, token: &str) -> Result<(), SessionError> {
        self.sessions.validate_session_token(token)?;
        self.sessions.invalidate();
        let _guard = self.lock_sync();
        self.sessions.logout(token)
    }

    // === Sync ===

    /// Full sync of every folder for the current session
    pub fn initial_sync(&self) -> Option<FullSyncReport> {
        let _guard = self.lock_sync();
        let (session, remote) = self.sessions.remote()?;
        Some(self.full_sync_locked(&session, remote.as_ref()))
    }

    /// Refetch both folders and replace the mirror with them
    ///
    /// Everything is fetched before the mirror is cleared, so a remote
    /// failure leaves the mirror as it was.
    pub fn manual_sync(&self) -> Result<ManualSyncReport, SessionError> {
        let _guard = self.lock_sync();
        let (session, remote) = self.sessions.remote().ok_or(SessionError::NotAuthenticated)?;
        let epoch = session.epoch;
        let remote = remote.as_ref();

        let fetched = remote.get_profile().and_then(|profile| {
            let inbox = self
                .engine
                .fetch_folder(remote, Folder::Inbox, self.settings.inbox_max)?;
            let sent = self
                .engine
                .fetch_folder(remote, Folder::Sent, self.settings.sent_max)?;
            Ok((profile.history_id, inbox, sent))
        });
        let (cursor, inbox, sent) = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!("Manual sync aborted, mirror kept: {}", e);
                if e == RemoteError::GrantRevoked {
                    self.expire(epoch);
                }
                return Err(e.into());
            }
        };
        if !self.sessions.is_current(epoch) {
            return Err(SessionError::NotAuthenticated);
        }

        info!("Manual sync: replacing mirror");
        self.store.clear_mail_data()?;
        let live = || self.sessions.is_current(epoch);
        let inbox = self.engine.store_snapshot(inbox, &live);
        let sent = self.engine.store_snapshot(sent, &live);
        if !inbox.cancelled && !sent.cancelled {
            self.publish_cursor(epoch, &cursor);
        }
        Ok(ManualSyncReport {
            inbox: inbox.inserted,
            sent: sent.inserted,
        })
    }

    /// One poll tick
    pub fn poll_once(&self) -> PollOutcome {
        let _guard = match self.sync_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return PollOutcome::Skipped,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        let Some((session, remote)) = self.sessions.remote() else {
            return PollOutcome::Idle;
        };
        let epoch = session.epoch;
        if !self.sessions.is_current(epoch) {
            return PollOutcome::Discarded;
        }

        let Some(cursor) = session.history_cursor.clone() else {
            let report = self.full_sync_locked(&session, remote.as_ref());
            return self.full_sync_outcome(epoch, &report, |inserted| PollOutcome::Seeded {
                inserted,
            });
        };

        let result = self.engine.incremental_sync(remote.as_ref(), &cursor);
        match result.outcome {
            IncrementalOutcome::Completed => {}
            IncrementalOutcome::CursorExpired => {
                info!("Cursor {} expired, running full resync", cursor);
                let report = self.full_sync_locked(&session, remote.as_ref());
                return self.full_sync_outcome(epoch, &report, |inserted| PollOutcome::Resynced {
                    inserted,
                });
            }
            IncrementalOutcome::Unavailable(reason) => return PollOutcome::Unavailable(reason),
            IncrementalOutcome::GrantRevoked => {
                self.expire(epoch);
                return PollOutcome::Expired;
            }
        }

        if !self.sessions.is_current(epoch) {
            debug!("Discarding {} emails from stale epoch {}", result.new_emails.len(), epoch);
            return PollOutcome::Discarded;
        }

        let mut inserted = 0;
        let mut failed = false;
        for email in result.new_emails {
            if !self.sessions.is_current(epoch) {
                debug!("Session changed mid-poll, stopping after {} emails", inserted);
                return PollOutcome::Discarded;
            }
            match self.store.upsert_email(email) {
                Ok(UpsertOutcome::Inserted(email)) => {
                    inserted += 1;
                    self.broadcaster.broadcast(&MailEvent::NewEmail { email });
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Failed to store new email: {:#}", e);
                    failed = true;
                }
            }
        }

        // Keep the cursor so unfetched or unstored emails are seen again
        if failed || result.errors > 0 {
            warn!("Holding cursor {}: some new emails were not mirrored", cursor);
        } else {
            self.publish_cursor(epoch, &result.next_cursor);
        }
        if inserted > 0 {
            info!("{} new emails", inserted);
        }
        PollOutcome::Advanced { inserted }
    }

    // === Mail ===

    pub fn list_emails(&self, query: &EmailQuery) -> anyhow::Result<Vec<Email>> {
        query::list_emails(self.store.as_ref(), query)
    }

    pub fn get_email(&self, key: &str) -> anyhow::Result<Option<Email>> {
        query::get_email(self.store.as_ref(), key)
    }

    pub fn set_read(&self, key: &str, is_read: bool) -> Result<Option<Email>, ActionError> {
        let current = self.sessions.remote();
        self.actions.set_read(remote_of(&current), key, is_read)
    }

    pub fn mark_read(&self, key: &str) -> Result<Option<Email>, ActionError> {
        self.set_read(key, true)
    }

    pub fn toggle_star(&self, key: &str) -> Result<Option<Email>, ActionError> {
        let current = self.sessions.remote();
        self.actions.toggle_star(remote_of(&current), key)
    }

    /// Send a message, threading it under `reply_to` when given
    pub fn send(
        &self,
        message: OutgoingMessage,
        reply_to: Option<&str>,
    ) -> Result<SendOutcome, ActionError> {
        let current = self.sessions.remote();
        let Some((session, remote)) = &current else {
            return Err(ActionError::NotAuthenticated);
        };

        let message = match reply_to {
            Some(key) => match self.store.find_email(key)? {
                Some(original) => reply_headers(&original).apply(message),
                None => {
                    warn!("Reply target {} not found, sending unthreaded", key);
                    message
                }
            },
            None => message,
        };
        self.actions
            .send(Some(remote.as_ref()), &session.account_email, message)
    }

    pub fn get_thread(&self, thread_id: &ThreadId) -> Result<Vec<Email>, ActionError> {
        let current = self.sessions.remote();
        self.actions.get_thread(remote_of(&current), thread_id)
    }

    // === Internals ===

    fn lock_sync(&self) -> MutexGuard<'_, ()> {
        self.sync_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Caller holds the sync guard
    fn full_sync_locked(&self, session: &Session, remote: &dyn RemoteMailbox) -> FullSyncReport {
        let epoch = session.epoch;
        let live = || self.sessions.is_current(epoch);
        let report = self.engine.full_sync_all(
            remote,
            self.settings.inbox_max,
            self.settings.sent_max,
            &live,
        );

        if let Some(cursor) = &report.cursor {
            self.publish_cursor(epoch, cursor);
        }
        if report.failure == Some(RemoteError::GrantRevoked) {
            self.expire(epoch);
        }
        report
    }

    fn full_sync_outcome(
        &self,
        epoch: u64,
        report: &FullSyncReport,
        done: impl FnOnce(usize) -> PollOutcome,
    ) -> PollOutcome {
        match &report.failure {
            Some(RemoteError::GrantRevoked) => PollOutcome::Expired,
            Some(e) => PollOutcome::Unavailable(e.to_string()),
            None if !report.is_complete() || !self.sessions.is_current(epoch) => {
                PollOutcome::Discarded
            }
            None => done(report.inbox.inserted + report.sent.inserted),
        }
    }

    fn publish_cursor(&self, epoch: u64, cursor: &str) {
        match self.sessions.advance_cursor(epoch, cursor) {
            Ok(true) => debug!("Cursor advanced to {}", cursor),
            Ok(false) => debug!("Cursor {} not published", cursor),
            Err(e) => error!("Failed to persist cursor {}: {}", cursor, e),
        }
    }

    fn expire(&self, epoch: u64) {
        if let Err(e) = self.sessions.expire(epoch) {
            error!("Failed to expire session: {}", e);
        }
    }
}

fn remote_of(current: &Option<(Session, Arc<dyn RemoteMailbox>)>) -> Option<&dyn RemoteMailbox> {
    current.as_ref().map(|(_, remote)| remote.as_ref())
}

impl PollTask for MailService {
    fn tick(&self) {
        match self.poll_once() {
            PollOutcome::Skipped => debug!("Poll skipped: sync in progress"),
            PollOutcome::Idle => debug!("Poll idle: no session"),
            PollOutcome::Advanced { inserted: 0 } => debug!("Poll: nothing new"),
            PollOutcome::Unavailable(reason) => warn!("Poll failed: {}", reason),
            outcome => info!("Poll: {:?}", outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::labels;
    use crate::storage::InMemoryMailStore;
    use crate::testing::{FakeProvider, FakeRemote};

    fn service(remote: Arc<FakeRemote>) -> (MailService, Arc<InMemoryMailStore>) {
        let store = Arc::new(InMemoryMailStore::new());
        let settings = Settings {
            jwt_secret: "test-secret".to_string(),
            ..Settings::default()
        };
        let service = MailService::new(
            store.clone(),
            Arc::new(FakeProvider::new(remote)),
            settings,
        );
        (service, store)
    }

    fn login(service: &MailService) -> SessionToken {
        service.begin_login();
        service.complete_login("code").unwrap().1
    }

    #[test]
    fn test_poll_idle_without_session() {
        let (service, _) = service(Arc::new(FakeRemote::new("me@gmail.com")));
        assert_eq!(service.poll_once(), PollOutcome::Idle);
    }

    #[test]
    fn test_poll_skipped_while_syncing() {
        let (service, _) = service(Arc::new(FakeRemote::new("me@gmail.com")));
        login(&service);
        let _guard = service.lock_sync();
        assert_eq!(service.poll_once(), PollOutcome::Skipped);
    }

    #[test]
    fn test_first_poll_seeds_cursor() {
        let remote = Arc::new(FakeRemote::new("me@gmail.com"));
        remote.add_message("m1", &[labels::INBOX]);
        remote.set_history_id("100");
        let (service, _) = service(remote);
        login(&service);

        assert_eq!(service.poll_once(), PollOutcome::Seeded { inserted: 1 });
        assert_eq!(
            service.sessions().current().unwrap().history_cursor.as_deref(),
            Some("100")
        );
    }

    #[test]
    fn test_poll_stores_and_broadcasts_new_mail() {
        let remote = Arc::new(FakeRemote::new("me@gmail.com"));
        remote.set_history_id("100");
        let (service, store) = service(remote.clone());
        login(&service);
        service.initial_sync().unwrap();

        remote.add_message("n1", &[labels::INBOX, labels::UNREAD]);
        remote.push_history(&["n1"], "101");

        assert_eq!(service.poll_once(), PollOutcome::Advanced { inserted: 1 });
        assert_eq!(store.count_emails().unwrap(), 1);
        assert_eq!(
            store.get_sync_state("me@gmail.com").unwrap().unwrap().history_id,
            "101"
        );
    }

    #[test]
    fn test_fetch_failure_holds_cursor() {
        let remote = Arc::new(FakeRemote::new("me@gmail.com"));
        remote.set_history_id("100");
        let (service, store) = service(remote.clone());
        login(&service);
        service.initial_sync().unwrap();

        remote.add_message("n1", &[labels::INBOX]);
        remote.add_message("n2", &[labels::INBOX]);
        remote.fail_fetch("n2");
        remote.push_history(&["n1", "n2"], "101");
        remote.push_history(&["n1", "n2"], "101");

        assert_eq!(service.poll_once(), PollOutcome::Advanced { inserted: 1 });
        assert_eq!(
            store.get_sync_state("me@gmail.com").unwrap().unwrap().history_id,
            "100"
        );

        remote.heal_fetch("n2");
        assert_eq!(service.poll_once(), PollOutcome::Advanced { inserted: 1 });
        assert_eq!(store.count_emails().unwrap(), 2);
        assert_eq!(
            store.get_sync_state("me@gmail.com").unwrap().unwrap().history_id,
            "101"
        );
    }

    #[test]
    fn test_manual_sync_offline_keeps_mirror() {
        let remote = Arc::new(FakeRemote::new("me@gmail.com"));
        remote.add_message("m1", &[labels::INBOX]);
        let (service, store) = service(remote.clone());
        login(&service);
        service.initial_sync().unwrap();

        remote.set_offline(true);
        assert!(matches!(
            service.manual_sync(),
            Err(SessionError::Remote(RemoteError::Unavailable(_)))
        ));
        assert_eq!(store.count_emails().unwrap(), 1);
    }

    #[test]
    fn test_expired_cursor_triggers_resync() {
        let remote = Arc::new(FakeRemote::new("me@gmail.com"));
        remote.set_history_id("100");
        let (service, store) = service(remote.clone());
        login(&service);
        service.initial_sync().unwrap();

        remote.add_message("m1", &[labels::INBOX]);
        remote.set_history_id("200");
        remote.expire_cursor();

        assert_eq!(service.poll_once(), PollOutcome::Resynced { inserted: 1 });
        assert_eq!(store.count_emails().unwrap(), 1);
        assert_eq!(
            service.sessions().current().unwrap().history_cursor.as_deref(),
            Some("200")
        );
    }

    #[test]
    fn test_revoked_grant_expires_session() {
        let remote = Arc::new(FakeRemote::new("me@gmail.com"));
        let (service, store) = service(remote.clone());
        login(&service);
        service.initial_sync().unwrap();

        remote.revoke_grant();
        assert_eq!(service.poll_once(), PollOutcome::Expired);
        assert!(service.sessions().current().is_none());
        assert!(store.load_account().unwrap().is_none());
        assert_eq!(service.poll_once(), PollOutcome::Idle);
    }

    #[test]
    fn test_unavailable_keeps_cursor() {
        let remote = Arc::new(FakeRemote::new("me@gmail.com"));
        remote.set_history_id("100");
        let (service, _) = service(remote.clone());
        login(&service);
        service.initial_sync().unwrap();

        remote.set_offline(true);
        assert!(matches!(service.poll_once(), PollOutcome::Unavailable(_)));
        assert_eq!(
            service.sessions().current().unwrap().history_cursor.as_deref(),
            Some("100")
        );
    }

    #[test]
    fn test_manual_sync_refetches() {
        let remote = Arc::new(FakeRemote::new("me@gmail.com"));
        remote.add_message("m1", &[labels::INBOX]);
        remote.add_message("s1", &[labels::SENT]);
        let (service, store) = service(remote);
        login(&service);
        service.initial_sync().unwrap();

        let report = service.manual_sync().unwrap();
        assert_eq!(report, ManualSyncReport { inbox: 1, sent: 1 });
        assert_eq!(store.count_emails().unwrap(), 2);
    }

    #[test]
    fn test_manual_sync_requires_session() {
        let (service, _) = service(Arc::new(FakeRemote::new("me@gmail.com")));
        assert!(matches!(
            service.manual_sync(),
            Err(SessionError::NotAuthenticated)
        ));
    }

    #[test]
    fn test_logout_wipes_and_rejects_token() {
        let remote = Arc::new(FakeRemote::new("me@gmail.com"));
        remote.add_message("m1", &[labels::INBOX]);
        let (service, store) = service(remote);
        let token = login(&service);
        service.initial_sync().unwrap();
        assert_eq!(store.count_emails().unwrap(), 1);

        service.logout(&token.token).unwrap();
        assert_eq!(store.count_emails().unwrap(), 0);
        assert!(service.authenticate(&token.token).unwrap_err().is_unauthenticated());
        assert!(!service.status().authenticated);
    }

    #[test]
    fn test_send_reply_threads_under_original() {
        let remote = Arc::new(FakeRemote::new("me@gmail.com"));
        remote.add_thread_message("m1", "t1", &[labels::INBOX]);
        let (service, _) = service(remote.clone());
        login(&service);
        service.initial_sync().unwrap();

        let message = OutgoingMessage {
            to: "sender@example.com".to_string(),
            subject: "Re: Subject m1".to_string(),
            body: "Thanks".to_string(),
            ..OutgoingMessage::default()
        };
        let outcome = service.send(message, Some("m1")).unwrap();

        assert_eq!(outcome.email.thread_id, ThreadId::new("t1"));
        let sent = remote.sent();
        assert_eq!(sent[0].in_reply_to.as_deref(), Some("<m1@mail.example.com>"));
    }

    #[test]
    fn test_send_without_session() {
        let (service, _) = service(Arc::new(FakeRemote::new("me@gmail.com")));
        let result = service.send(OutgoingMessage::default(), None);
        assert!(matches!(result, Err(ActionError::NotAuthenticated)));
    }
}
