//! Session lifecycle
//!
//! `Unauthenticated -> OAuthPending -> Authenticated -> Unauthenticated`.
//! The manager owns the one live [`Session`] and the remote mailbox opened for
//! it. Every session carries an epoch; work started under an older epoch must
//! not publish its results.

use chrono::Utc;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use super::token::{SessionToken, TokenIssuer};
use crate::error::SessionError;
use crate::gmail::{MailboxProvider, RemoteMailbox, RemoteProfile};
use crate::models::{Account, Profile, Session, SessionState, SessionStatus, SyncState};
use crate::storage::MailStore;

#[derive(Default)]
struct Inner {
    session: Option<Session>,
    remote: Option<Arc<dyn RemoteMailbox>>,
    /// Redirect URI of an OAuth flow in progress
    pending_redirect: Option<String>,
}

/// A completed code exchange that has not yet replaced the live session
pub struct AuthorizedLogin {
    refresh_token: String,
    remote: Arc<dyn RemoteMailbox>,
    profile: RemoteProfile,
}

impl AuthorizedLogin {
    pub fn account_email(&self) -> &str {
        &self.profile.email
    }
}

pub struct SessionManager {
    provider: Arc<dyn MailboxProvider>,
    store: Arc<dyn MailStore>,
    tokens: TokenIssuer,
    redirect_uri: String,
    force_consent: bool,
    inner: RwLock<Inner>,
    epoch: AtomicU64,
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn MailboxProvider>,
        store: Arc<dyn MailStore>,
        tokens: TokenIssuer,
        redirect_uri: impl Into<String>,
        force_consent: bool,
    ) -> Self {
        Self {
            provider,
            store,
            tokens,
            redirect_uri: redirect_uri.into(),
            force_consent,
            inner: RwLock::new(Inner::default()),
            epoch: AtomicU64::new(0),
        }
    }

    /// Reload the persisted account and cursor. Call before any sync.
    pub fn restore(&self) -> Result<Option<Session>, SessionError> {
        let Some(account) = self.store.load_account()? else {
            debug!("No persisted account to restore");
            return Ok(None);
        };

        let cursor = self
            .store
            .get_sync_state(&account.email)?
            .filter(|s| s.initial_sync_complete)
            .map(|s| s.history_id);

        let remote = self.provider.connect(&account.refresh_token, None);

        let mut inner = self.inner.write().unwrap();
        let epoch = self.bump_epoch();
        let session = Session {
            account_email: account.email,
            refresh_token: account.refresh_token,
            history_cursor: cursor,
            profile: None,
            epoch,
        };
        info!(
            "Restored session for {} (cursor: {})",
            session.account_email,
            session.history_cursor.as_deref().unwrap_or("none")
        );
        inner.session = Some(session.clone());
        inner.remote = Some(remote);
        Ok(Some(session))
    }

    /// Start an OAuth flow and return the URL the user must visit
    pub fn begin_oauth(&self, redirect_uri: Option<&str>) -> String {
        let redirect = redirect_uri.unwrap_or(&self.redirect_uri).to_string();
        let url = self.provider.authorization_url(&redirect, self.force_consent);
        self.inner.write().unwrap().pending_redirect = Some(redirect);
        url
    }

    /// Finish the OAuth flow with the authorization code
    ///
    /// Without a refresh token nothing is persisted and the current state is
    /// left as it was.
    pub fn complete_oauth(&self, code: &str) -> Result<Session, SessionError> {
        let login = self.authorize(code)?;
        self.commit_login(login)
    }

    /// Exchange the code and read the profile, without touching any state
    pub fn authorize(&self, code: &str) -> Result<AuthorizedLogin, SessionError> {
        let redirect = self
            .inner
            .read()
            .unwrap()
            .pending_redirect
            .clone()
            .ok_or(SessionError::OAuthNotStarted)?;

        let grant = self.provider.exchange_code(code, &redirect)?;
        let refresh_token = grant
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                warn!("Token exchange returned no refresh token");
                SessionError::NoRefreshToken
            })?;

        let remote = self.provider.connect(&refresh_token, Some(&grant));
        let profile = remote.get_profile()?;
        Ok(AuthorizedLogin {
            refresh_token,
            remote,
            profile,
        })
    }

    /// Whether committing `login` replaces the persisted account
    pub fn replaces_account(&self, login: &AuthorizedLogin) -> Result<bool, SessionError> {
        Ok(self
            .store
            .load_account()?
            .is_some_and(|previous| previous.email != login.profile.email))
    }

    /// Persist an authorized login and make it the live session
    ///
    /// A different previous account loses its sync state and mirror. Callers
    /// that may have syncs in flight must invalidate and wait for them first.
    pub fn commit_login(&self, login: AuthorizedLogin) -> Result<Session, SessionError> {
        let AuthorizedLogin {
            refresh_token,
            remote,
            profile,
        } = login;

        if let Some(previous) = self.store.load_account()?
            && previous.email != profile.email
        {
            info!("Replacing account {} with {}", previous.email, profile.email);
            self.store.delete_sync_state(&previous.email)?;
            self.store.clear_mail_data()?;
        }

        self.store
            .save_account(&Account::new(&profile.email, &refresh_token))?;
        let cursor = self
            .store
            .get_sync_state(&profile.email)?
            .filter(|s| s.initial_sync_complete)
            .map(|s| s.history_id);

        let mut inner = self.inner.write().unwrap();
        let epoch = self.bump_epoch();
        let session = Session {
            account_email: profile.email.clone(),
            refresh_token,
            history_cursor: cursor,
            profile: Some(Profile {
                email: profile.email,
                messages_total: profile.messages_total,
                threads_total: profile.threads_total,
            }),
            epoch,
        };
        info!("Authenticated as {} (epoch {})", session.account_email, epoch);
        inner.session = Some(session.clone());
        inner.remote = Some(remote);
        inner.pending_redirect = None;
        Ok(session)
    }

    pub fn issue_session_token(&self, account_email: &str) -> Result<SessionToken, SessionError> {
        self.tokens.issue(account_email)
    }

    /// Validate a bearer token and return its account email
    pub fn validate_session_token(&self, token: &str) -> Result<String, SessionError> {
        let verified = self.tokens.verify(token).inspect_err(|e| {
            debug!("Rejected session token: {}", e);
        })?;

        if self.store.is_token_revoked(&verified.token_id)? {
            debug!("Rejected revoked session token {}", verified.token_id);
            return Err(SessionError::TokenRevoked);
        }

        let inner = self.inner.read().unwrap();
        match &inner.session {
            Some(session) if session.account_email == verified.account_email => {
                Ok(verified.account_email)
            }
            _ => {
                debug!("Token for {} has no live session", verified.account_email);
                Err(SessionError::NotAuthenticated)
            }
        }
    }

    /// Add the token to the revocation set until its natural expiry
    pub fn revoke(&self, token: &str) -> Result<(), SessionError> {
        let verified = match self.tokens.verify(token) {
            Ok(verified) => verified,
            Err(SessionError::TokenExpired) => return Ok(()),
            Err(e) => return Err(e),
        };

        self.store
            .revoke_token(&verified.token_id, verified.expires_at)?;
        let purged = self.store.purge_expired_revocations(Utc::now())?;
        if purged > 0 {
            debug!("Purged {} expired revocations", purged);
        }
        Ok(())
    }

    /// Bump the epoch so in-flight work stops publishing; the session stays
    pub fn invalidate(&self) -> u64 {
        let _inner = self.inner.write().unwrap();
        self.bump_epoch()
    }

    /// Revoke the token and tear the session down, wiping the mirror
    pub fn logout(&self, token: &str) -> Result<(), SessionError> {
        self.revoke(token)?;

        let ended = {
            let mut inner = self.inner.write().unwrap();
            self.bump_epoch();
            inner.remote = None;
            inner.pending_redirect = None;
            inner.session.take()
        };

        if let Some(session) = &ended {
            self.store.delete_sync_state(&session.account_email)?;
            info!("Logged out {}", session.account_email);
        }
        self.store.delete_account()?;
        self.store.clear_mail_data()?;
        Ok(())
    }

    /// Drop a session whose grant was revoked. Ignored for a stale `epoch`.
    pub fn expire(&self, epoch: u64) -> Result<bool, SessionError> {
        let ended = {
            let mut inner = self.inner.write().unwrap();
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return Ok(false);
            }
            self.bump_epoch();
            inner.remote = None;
            inner.session.take()
        };

        let Some(session) = ended else {
            return Ok(false);
        };
        warn!(
            "Grant for {} was revoked; session expired",
            session.account_email
        );
        self.store.delete_account()?;
        self.store.delete_sync_state(&session.account_email)?;
        Ok(true)
    }

    pub fn current(&self) -> Option<Session> {
        self.inner.read().unwrap().session.clone()
    }

    /// The live session together with its remote mailbox
    pub fn remote(&self) -> Option<(Session, Arc<dyn RemoteMailbox>)> {
        let inner = self.inner.read().unwrap();
        match (&inner.session, &inner.remote) {
            (Some(session), Some(remote)) => Some((session.clone(), Arc::clone(remote))),
            _ => None,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Whether work started under `epoch` may still publish
    pub fn is_current(&self, epoch: u64) -> bool {
        let inner = self.inner.read().unwrap();
        inner.session.is_some() && self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Advance the cursor of the session started at `epoch`
    ///
    /// Returns false for a stale epoch or a cursor older than the current one.
    pub fn advance_cursor(&self, epoch: u64, cursor: &str) -> Result<bool, SessionError> {
        let mut inner = self.inner.write().unwrap();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Discarding cursor {} from stale epoch {}", cursor, epoch);
            return Ok(false);
        }
        let Some(session) = inner.session.as_mut() else {
            return Ok(false);
        };

        if let Some(current) = &session.history_cursor
            && is_older(cursor, current)
        {
            debug!("Ignoring cursor {} older than {}", cursor, current);
            return Ok(false);
        }

        let state = match self.store.get_sync_state(&session.account_email)? {
            Some(state) => state.updated(cursor),
            None => SyncState::new(&session.account_email, cursor),
        };
        self.store.save_sync_state(state)?;
        session.history_cursor = Some(cursor.to_string());
        Ok(true)
    }

    pub fn state(&self) -> SessionState {
        let inner = self.inner.read().unwrap();
        match (&inner.session, &inner.pending_redirect) {
            (Some(session), _) => SessionState::Authenticated(session.clone()),
            (None, Some(redirect)) => SessionState::OAuthPending {
                redirect_uri: redirect.clone(),
            },
            (None, None) => SessionState::Unauthenticated,
        }
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.state();
        SessionStatus {
            authenticated: state.session().is_some(),
            email: state.session().map(|s| s.account_email.clone()),
            state: state.name(),
        }
    }

    /// Caller must hold the `inner` write lock
    fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// History ids are numeric; anything else is never considered older
fn is_older(candidate: &str, current: &str) -> bool {
    match (candidate.parse::<u64>(), current.parse::<u64>()) {
        (Ok(candidate), Ok(current)) => candidate < current,
        _ => false,
    }
}
