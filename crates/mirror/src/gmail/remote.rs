//! Remote mailbox seams
//!
//! The sync engine, actions and session manager are written against these
//! traits. `GmailClient` and `GmailAuth` are the production implementations;
//! tests substitute in-process fakes.

use std::sync::Arc;

use super::api::GmailMessage;
use crate::error::RemoteError;
use crate::models::{Folder, RemoteId, ThreadId};

/// Messages added since a history cursor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryDelta {
    /// Added message IDs in history order (may contain duplicates)
    pub added: Vec<RemoteId>,
    /// Cursor to resume from next time
    pub next_cursor: String,
}

/// Mailbox profile as reported by the remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteProfile {
    pub email: String,
    pub history_id: String,
    pub messages_total: u64,
    pub threads_total: u64,
}

/// A message to send
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub thread_id: Option<ThreadId>,
}

/// A message the remote accepted for delivery
#[derive(Debug, Clone, PartialEq)]
pub enum SentMessage {
    /// The full sent message as the remote stores it
    Fetched(GmailMessage),
    /// Accepted, but the sent copy could not be fetched
    Accepted { id: RemoteId, thread_id: ThreadId },
}

impl SentMessage {
    pub fn remote_id(&self) -> RemoteId {
        match self {
            SentMessage::Fetched(message) => RemoteId::new(&message.id),
            SentMessage::Accepted { id, .. } => id.clone(),
        }
    }
}

/// Result of an OAuth code exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}

/// Calls against one authenticated remote mailbox.
///
/// One call is one attempt; implementations do not retry.
pub trait RemoteMailbox: Send + Sync {
    /// List up to `max` message IDs in `folder`, newest first
    fn list_message_ids(&self, folder: Folder, max: usize) -> Result<Vec<RemoteId>, RemoteError>;

    fn get_message(&self, id: &RemoteId) -> Result<GmailMessage, RemoteError>;

    /// Inbox messages added since `cursor`
    ///
    /// Fails with [`RemoteError::CursorExpired`] if the cursor is too old.
    fn get_history_since(&self, cursor: &str) -> Result<HistoryDelta, RemoteError>;

    /// Send a message
    ///
    /// An error means the remote did not accept it. Once accepted, a failed
    /// follow-up fetch still reports the message as sent.
    fn send(&self, message: &OutgoingMessage) -> Result<SentMessage, RemoteError>;

    fn set_labels(&self, id: &RemoteId, add: &[&str], remove: &[&str]) -> Result<(), RemoteError>;

    fn get_profile(&self) -> Result<RemoteProfile, RemoteError>;

    fn get_thread(&self, thread_id: &ThreadId) -> Result<Vec<GmailMessage>, RemoteError>;
}

/// OAuth provider able to open `RemoteMailbox` connections
pub trait MailboxProvider: Send + Sync {
    /// URL the user visits to grant access
    fn authorization_url(&self, redirect_uri: &str, force_consent: bool) -> String;

    fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant, RemoteError>;

    /// Open a mailbox for `refresh_token`, seeding the access token from
    /// `grant` when one was just issued
    fn connect(&self, refresh_token: &str, grant: Option<&TokenGrant>) -> Arc<dyn RemoteMailbox>;
}
