//! Error types at the engine's seams
//!
//! Storage and bootstrap code uses `anyhow::Result` with context. The enums
//! here are the typed failures callers branch on.

use thiserror::Error;

/// Failure talking to the remote mailbox
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Network, HTTP or auth failure; the call may succeed later
    #[error("remote mailbox unavailable: {0}")]
    Unavailable(String),
    /// The history cursor is too old; a full resync is required
    #[error("history cursor expired")]
    CursorExpired,
    /// The refresh-token grant was rejected; the session cannot continue
    #[error("refresh token grant revoked")]
    GrantRevoked,
}

impl RemoteError {
    pub fn unavailable(reason: impl std::fmt::Display) -> Self {
        RemoteError::Unavailable(reason.to_string())
    }
}

impl From<ureq::Error> for RemoteError {
    fn from(e: ureq::Error) -> Self {
        RemoteError::Unavailable(e.to_string())
    }
}

/// Failure in the session lifecycle
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("authorization did not return a refresh token; remove the app's access in your Google account settings and sign in again")]
    NoRefreshToken,
    #[error("session token expired")]
    TokenExpired,
    #[error("session token revoked")]
    TokenRevoked,
    #[error("session token malformed")]
    TokenMalformed,
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("OAuth flow not started")]
    OAuthNotStarted,
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("session store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl SessionError {
    /// Whether the caller should be treated as unauthenticated
    pub fn is_unauthenticated(&self) -> bool {
        matches!(
            self,
            SessionError::TokenExpired
                | SessionError::TokenRevoked
                | SessionError::TokenMalformed
                | SessionError::NotAuthenticated
        )
    }
}

/// Failure of a mutation endpoint
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("delivery failed: {0}")]
    Delivery(RemoteError),
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// A live connection could not accept an event
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("connection closed")]
pub struct DeliveryError;
