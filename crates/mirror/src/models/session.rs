//! Authenticated session state

use serde::{Deserialize, Serialize};

/// Remote mailbox profile, cached on the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub email: String,
    pub messages_total: u64,
    pub threads_total: u64,
}

/// An authenticated session with the remote mailbox
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub account_email: String,
    pub refresh_token: String,
    /// History cursor; `None` until the first full sync completes
    pub history_cursor: Option<String>,
    pub profile: Option<Profile>,
    /// Generation number; work started under an older epoch is discarded
    pub epoch: u64,
}

/// Session manager state machine
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Unauthenticated,
    OAuthPending { redirect_uri: String },
    Authenticated(Session),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::OAuthPending { .. } => "oauth_pending",
            SessionState::Authenticated(_) => "authenticated",
        }
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Authenticated(session) => Some(session),
            _ => None,
        }
    }
}

/// Snapshot for the auth-status endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub authenticated: bool,
    pub email: Option<String>,
    pub state: &'static str,
}
