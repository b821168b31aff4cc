//! Mirror crate - Gmail synchronization and session engine
//!
//! This crate keeps a local mirror of one Gmail account and the session
//! that authorizes it:
//! - Domain models (Email, LabelState, Account, Session)
//! - Gmail API client, OAuth and message normalization
//! - Session tokens with a persisted revocation set
//! - Storage trait with in-memory and SQLite implementations
//! - Idempotent full sync, cursor-based incremental sync and a poller
//! - New-mail fan-out to live connections
//! - Local-first mutations (read, star, send)
//!
//! Everything here is synchronous and executor-agnostic; servers call into
//! [`MailService`] from blocking tasks.

pub mod actions;
pub mod config;
pub mod error;
pub mod gmail;
pub mod models;
pub mod notify;
pub mod query;
pub mod service;
pub mod session;
pub mod storage;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use actions::{ActionHandler, SendOutcome, reply_headers};
pub use config::{GmailCredentials, Settings};
pub use error::{ActionError, DeliveryError, RemoteError, SessionError};
pub use gmail::{GmailAuth, GmailClient, MailboxProvider, OutgoingMessage, RemoteMailbox, SentMessage};
pub use models::{Account, Email, EmailId, Folder, LabelState, RemoteId, Session, SessionStatus, SyncState, ThreadId};
pub use notify::{BroadcastReport, Broadcaster, Connection, ConnectionId, MailEvent};
pub use query::{EmailQuery, get_email, list_emails};
pub use service::{MailService, ManualSyncReport, PollOutcome};
pub use session::{SessionManager, SessionToken, TokenIssuer};
pub use storage::{InMemoryMailStore, MailStore, SqliteMailStore, UpsertOutcome};
pub use sync::{FolderSnapshot, FullSyncReport, IncrementalOutcome, IncrementalResult, PollTask, Poller, PollerHandle, SyncEngine, SyncStats};
