//! Action handler for email mutations
//!
//! Mutations are local-first: the store is updated atomically, then the
//! change is pushed to Gmail on a best-effort basis. A failed push is logged
//! and left for the next full sync to reconcile.

use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;

use crate::error::ActionError;
use crate::gmail::{OutgoingMessage, RemoteMailbox, SentMessage, normalize_message};
use crate::models::{Email, Folder, LabelState, RemoteId, ThreadId, labels};
use crate::notify::{Broadcaster, MailEvent};
use crate::storage::MailStore;

/// Result of sending a message
#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    pub email: Email,
    /// False when the remote rejected the message and a local copy was kept
    pub delivered: bool,
}

/// Threading headers for a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyHeaders {
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub thread_id: ThreadId,
}

impl ReplyHeaders {
    pub fn apply(self, mut message: OutgoingMessage) -> OutgoingMessage {
        message.in_reply_to = self.in_reply_to;
        message.references = self.references;
        message.thread_id = Some(self.thread_id);
        message
    }
}

/// Headers that make a message a threaded reply to `original`
pub fn reply_headers(original: &Email) -> ReplyHeaders {
    let message_id = original.message_id_header.trim();
    if message_id.is_empty() {
        return ReplyHeaders {
            in_reply_to: None,
            references: None,
            thread_id: original.thread_id.clone(),
        };
    }

    let references = match original.references.trim() {
        "" => message_id.to_string(),
        existing => format!("{} {}", existing, message_id),
    };
    ReplyHeaders {
        in_reply_to: Some(message_id.to_string()),
        references: Some(references),
        thread_id: original.thread_id.clone(),
    }
}

pub struct ActionHandler {
    store: Arc<dyn MailStore>,
    broadcaster: Arc<Broadcaster>,
    /// Keep a failed send as an undelivered sent email
    keep_failed_sends: bool,
}

impl ActionHandler {
    pub fn new(
        store: Arc<dyn MailStore>,
        broadcaster: Arc<Broadcaster>,
        keep_failed_sends: bool,
    ) -> Self {
        Self {
            store,
            broadcaster,
            keep_failed_sends,
        }
    }

    /// Set the read flag of the email named by local or remote id
    pub fn set_read(
        &self,
        remote: Option<&dyn RemoteMailbox>,
        key: &str,
        is_read: bool,
    ) -> Result<Option<Email>, ActionError> {
        let Some(email) = self.store.find_email(key)? else {
            return Ok(None);
        };
        let Some(updated) = self.store.set_read(&email.id, is_read)? else {
            return Ok(None);
        };

        let (add, remove): (&[&str], &[&str]) = if is_read {
            (&[], &[labels::UNREAD])
        } else {
            (&[labels::UNREAD], &[])
        };
        push_labels(remote, &updated, add, remove);
        Ok(Some(updated))
    }

    pub fn mark_read(
        &self,
        remote: Option<&dyn RemoteMailbox>,
        key: &str,
    ) -> Result<Option<Email>, ActionError> {
        self.set_read(remote, key, true)
    }

    /// Flip the starred flag
    pub fn toggle_star(
        &self,
        remote: Option<&dyn RemoteMailbox>,
        key: &str,
    ) -> Result<Option<Email>, ActionError> {
        let Some(email) = self.store.find_email(key)? else {
            return Ok(None);
        };
        let Some(updated) = self.store.toggle_starred(&email.id)? else {
            return Ok(None);
        };

        let (add, remove): (&[&str], &[&str]) = if updated.is_starred {
            (&[labels::STARRED], &[])
        } else {
            (&[], &[labels::STARRED])
        };
        push_labels(remote, &updated, add, remove);
        Ok(Some(updated))
    }

    /// Send through the remote, store the sent copy and announce it
    pub fn send(
        &self,
        remote: Option<&dyn RemoteMailbox>,
        account_email: &str,
        message: OutgoingMessage,
    ) -> Result<SendOutcome, ActionError> {
        let remote = remote.ok_or(ActionError::NotAuthenticated)?;

        let outcome = match remote.send(&message) {
            Ok(sent) => {
                let remote_id = sent.remote_id();
                let email = match sent {
                    SentMessage::Fetched(full) => {
                        normalize_message(&full, &LabelState::from(full.label_ids.as_ref()))
                    }
                    SentMessage::Accepted { id, thread_id } => {
                        local_sent_email(account_email, &message, Some((id, thread_id)))
                    }
                };
                let email = self.store.upsert_email(email)?.into_email();
                info!("Sent message {} to {}", remote_id, message.to);
                SendOutcome {
                    email,
                    delivered: true,
                }
            }
            Err(e) if self.keep_failed_sends => {
                warn!("Send to {} failed, keeping local copy: {}", message.to, e);
                let email = self
                    .store
                    .upsert_email(local_sent_email(account_email, &message, None))?
                    .into_email();
                SendOutcome {
                    email,
                    delivered: false,
                }
            }
            Err(e) => {
                warn!("Send to {} failed: {}", message.to, e);
                return Err(ActionError::Delivery(e));
            }
        };

        self.broadcaster.broadcast(&MailEvent::EmailSent {
            email: outcome.email.clone(),
        });
        Ok(outcome)
    }

    /// Messages of a thread, oldest first
    ///
    /// Asks the remote first and falls back to the mirror when there is no
    /// session or the call fails. Remote messages already mirrored are
    /// returned as stored.
    pub fn get_thread(
        &self,
        remote: Option<&dyn RemoteMailbox>,
        thread_id: &ThreadId,
    ) -> Result<Vec<Email>, ActionError> {
        if let Some(remote) = remote {
            match remote.get_thread(thread_id) {
                Ok(messages) if !messages.is_empty() => {
                    let mut emails = Vec::with_capacity(messages.len());
                    for message in &messages {
                        let stored = self.store.get_by_remote_id(&RemoteId::new(&message.id))?;
                        emails.push(stored.unwrap_or_else(|| {
                            normalize_message(message, &LabelState::from(message.label_ids.as_ref()))
                        }));
                    }
                    emails.sort_by_key(|e| e.sent_at);
                    return Ok(emails);
                }
                Ok(_) => debug!("Remote thread {} is empty", thread_id),
                Err(e) => warn!("Falling back to mirror for thread {}: {}", thread_id, e),
            }
        }

        Ok(self.store.list_thread(thread_id)?)
    }
}

fn push_labels(remote: Option<&dyn RemoteMailbox>, email: &Email, add: &[&str], remove: &[&str]) {
    let (Some(remote), Some(remote_id)) = (remote, &email.remote_id) else {
        return;
    };
    if let Err(e) = remote.set_labels(remote_id, add, remove) {
        warn!("Failed to update labels on {}: {}", remote_id, e);
    }
}

/// Local copy of a sent message
///
/// `accepted` carries the remote id and thread of a message the remote took
/// but could not return; without it the copy is undelivered.
fn local_sent_email(
    account_email: &str,
    message: &OutgoingMessage,
    accepted: Option<(RemoteId, ThreadId)>,
) -> Email {
    let (remote_id, remote_thread) = match accepted {
        Some((id, thread_id)) => (Some(id), Some(thread_id).filter(|t| !t.as_str().is_empty())),
        None => (None, None),
    };
    let thread_id = remote_thread
        .or_else(|| message.thread_id.clone())
        .unwrap_or_else(|| ThreadId::new(uuid::Uuid::new_v4().to_string()));

    let mut builder = Email::builder(thread_id)
        .from(account_email)
        .to(message.to.as_str())
        .subject(message.subject.as_str())
        .body_text(message.body.as_str())
        .sent_at(Utc::now())
        .read(true)
        .folder(Folder::Sent)
        .in_reply_to(message.in_reply_to.clone().unwrap_or_default())
        .references(message.references.clone().unwrap_or_default());
    if let Some(remote_id) = remote_id {
        builder = builder.remote_id(remote_id.as_str());
    }
    builder.build()
}
