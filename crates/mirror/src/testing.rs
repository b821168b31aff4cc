//! In-process fakes for the remote seams

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::RemoteError;
use crate::gmail::api::{GmailMessage, Header, MessageBody, MessagePayload};
use crate::gmail::{
    HistoryDelta, MailboxProvider, OutgoingMessage, RemoteMailbox, RemoteProfile, SentMessage,
    TokenGrant,
};
use crate::models::{Folder, LabelState, RemoteId, ThreadId, labels};

#[derive(Default)]
struct FakeState {
    /// Insertion order, oldest first
    messages: Vec<GmailMessage>,
    failing: HashSet<String>,
    offline: bool,
    grant_revoked: bool,
    cursor_expired: bool,
    fail_send: bool,
    /// Sends are accepted but the sent copy cannot be fetched back
    lose_sent_copy: bool,
    history_id: String,
    history: VecDeque<HistoryDelta>,
    sent: Vec<OutgoingMessage>,
    label_calls: Vec<(String, Vec<String>, Vec<String>)>,
}

pub struct FakeRemote {
    email: String,
    state: Mutex<FakeState>,
}

impl FakeRemote {
    pub fn new(email: &str) -> Self {
        Self {
            email: email.to_string(),
            state: Mutex::new(FakeState {
                history_id: "1".to_string(),
                ..FakeState::default()
            }),
        }
    }

    pub fn add_message(&self, id: &str, label_ids: &[&str]) {
        self.add_thread_message(id, &format!("t-{}", id), label_ids);
    }

    pub fn add_thread_message(&self, id: &str, thread_id: &str, label_ids: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let seq = state.messages.len() as i64;
        let message = make_message(
            id,
            thread_id,
            label_ids,
            1_700_000_000_000 + seq * 60_000,
            &[
                ("From", "Sender <sender@example.com>"),
                ("To", &self.email),
                ("Subject", &format!("Subject {}", id)),
                ("Message-ID", &format!("<{}@mail.example.com>", id)),
            ],
            &format!("Body of {}", id),
        );
        state.messages.push(message);
    }

    pub fn set_message_labels(&self, id: &str, label_ids: &[&str]) {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.messages.iter_mut().find(|m| m.id == id) {
            message.label_ids = Some(label_ids.iter().map(|l| l.to_string()).collect());
        }
    }

    pub fn fail_fetch(&self, id: &str) {
        self.state.lock().unwrap().failing.insert(id.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    pub fn revoke_grant(&self) {
        self.state.lock().unwrap().grant_revoked = true;
    }

    pub fn expire_cursor(&self) {
        self.state.lock().unwrap().cursor_expired = true;
    }

    pub fn set_history_id(&self, history_id: &str) {
        self.state.lock().unwrap().history_id = history_id.to_string();
    }

    pub fn fail_sends(&self) {
        self.state.lock().unwrap().fail_send = true;
    }

    pub fn lose_sent_copies(&self) {
        self.state.lock().unwrap().lose_sent_copy = true;
    }

    pub fn heal_fetch(&self, id: &str) {
        self.state.lock().unwrap().failing.remove(id);
    }

    /// Queue a history response; also moves the profile cursor
    pub fn push_history(&self, added: &[&str], next_cursor: &str) {
        let mut state = self.state.lock().unwrap();
        state.history_id = next_cursor.to_string();
        state.history.push_back(HistoryDelta {
            added: added.iter().map(|id| RemoteId::new(*id)).collect(),
            next_cursor: next_cursor.to_string(),
        });
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn label_calls(&self) -> Vec<(String, Vec<String>, Vec<String>)> {
        self.state.lock().unwrap().label_calls.clone()
    }

    fn check(&self, state: &FakeState) -> Result<(), RemoteError> {
        if state.grant_revoked {
            return Err(RemoteError::GrantRevoked);
        }
        if state.offline {
            return Err(RemoteError::unavailable("offline"));
        }
        Ok(())
    }
}

impl RemoteMailbox for FakeRemote {
    fn list_message_ids(&self, folder: Folder, max: usize) -> Result<Vec<RemoteId>, RemoteError> {
        let state = self.state.lock().unwrap();
        self.check(&state)?;
        let label = match folder {
            Folder::Inbox => labels::INBOX,
            Folder::Sent => labels::SENT,
        };
        Ok(state
            .messages
            .iter()
            .rev()
            .filter(|m| LabelState::from(m.label_ids.as_ref()).contains(label))
            .take(max)
            .map(|m| RemoteId::new(&m.id))
            .collect())
    }

    fn get_message(&self, id: &RemoteId) -> Result<GmailMessage, RemoteError> {
        let state = self.state.lock().unwrap();
        self.check(&state)?;
        if state.failing.contains(id.as_str()) {
            return Err(RemoteError::unavailable("fetch failed"));
        }
        state
            .messages
            .iter()
            .find(|m| m.id == id.as_str())
            .cloned()
            .ok_or_else(|| RemoteError::unavailable("not found"))
    }

    fn get_history_since(&self, _cursor: &str) -> Result<HistoryDelta, RemoteError> {
        let mut state = self.state.lock().unwrap();
        self.check(&state)?;
        if state.cursor_expired {
            return Err(RemoteError::CursorExpired);
        }
        let next_cursor = state.history_id.clone();
        Ok(state.history.pop_front().unwrap_or(HistoryDelta {
            added: Vec::new(),
            next_cursor,
        }))
    }

    fn send(&self, message: &OutgoingMessage) -> Result<SentMessage, RemoteError> {
        let mut state = self.state.lock().unwrap();
        self.check(&state)?;
        if state.fail_send {
            return Err(RemoteError::unavailable("send rejected"));
        }
        state.sent.push(message.clone());

        let id = format!("sent-{}", state.sent.len());
        let thread_id = message
            .thread_id
            .as_ref()
            .map(|t| t.as_str().to_string())
            .unwrap_or_else(|| format!("t-{}", id));
        let mut headers = vec![
            ("From", self.email.clone()),
            ("To", message.to.clone()),
            ("Subject", message.subject.clone()),
        ];
        if let Some(in_reply_to) = &message.in_reply_to {
            headers.push(("In-Reply-To", in_reply_to.clone()));
        }
        let headers: Vec<(&str, &str)> = headers.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let seq = state.messages.len() as i64;
        let sent = make_message(
            &id,
            &thread_id,
            &[labels::SENT],
            1_700_000_000_000 + seq * 60_000,
            &headers,
            &message.body,
        );
        state.messages.push(sent.clone());
        if state.lose_sent_copy {
            return Ok(SentMessage::Accepted {
                id: RemoteId::new(&sent.id),
                thread_id: ThreadId::new(&sent.thread_id),
            });
        }
        Ok(SentMessage::Fetched(sent))
    }

    fn set_labels(&self, id: &RemoteId, add: &[&str], remove: &[&str]) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.label_calls.push((
            id.as_str().to_string(),
            add.iter().map(|l| l.to_string()).collect(),
            remove.iter().map(|l| l.to_string()).collect(),
        ));
        self.check(&state)
    }

    fn get_profile(&self) -> Result<RemoteProfile, RemoteError> {
        let state = self.state.lock().unwrap();
        self.check(&state)?;
        Ok(RemoteProfile {
            email: self.email.clone(),
            history_id: state.history_id.clone(),
            messages_total: state.messages.len() as u64,
            threads_total: state.messages.len() as u64,
        })
    }

    fn get_thread(&self, thread_id: &ThreadId) -> Result<Vec<GmailMessage>, RemoteError> {
        let state = self.state.lock().unwrap();
        self.check(&state)?;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.thread_id == thread_id.as_str())
            .cloned()
            .collect())
    }
}

fn make_message(
    id: &str,
    thread_id: &str,
    label_ids: &[&str],
    internal_date: i64,
    headers: &[(&str, &str)],
    body: &str,
) -> GmailMessage {
    GmailMessage {
        id: id.to_string(),
        thread_id: thread_id.to_string(),
        label_ids: Some(label_ids.iter().map(|l| l.to_string()).collect()),
        snippet: String::new(),
        internal_date: internal_date.to_string(),
        payload: Some(MessagePayload {
            headers: Some(
                headers
                    .iter()
                    .map(|(name, value)| Header {
                        name: name.to_string(),
                        value: value.to_string(),
                    })
                    .collect(),
            ),
            body: Some(MessageBody {
                size: Some(body.len() as u32),
                data: Some(URL_SAFE.encode(body)),
            }),
            parts: None,
            mime_type: Some("text/plain".to_string()),
        }),
    }
}

pub struct FakeProvider {
    remote: Arc<FakeRemote>,
    refresh_token: Option<String>,
    pub connects: AtomicUsize,
}

impl FakeProvider {
    pub fn new(remote: Arc<FakeRemote>) -> Self {
        Self {
            remote,
            refresh_token: Some("refresh-token".to_string()),
            connects: AtomicUsize::new(0),
        }
    }

    /// Exchanges succeed but carry no refresh token
    pub fn without_refresh_token(mut self) -> Self {
        self.refresh_token = None;
        self
    }
}

impl MailboxProvider for FakeProvider {
    fn authorization_url(&self, redirect_uri: &str, force_consent: bool) -> String {
        format!(
            "https://accounts.example.com/auth?redirect_uri={}&consent={}",
            redirect_uri, force_consent
        )
    }

    fn exchange_code(&self, code: &str, _redirect_uri: &str) -> Result<TokenGrant, RemoteError> {
        if code.is_empty() {
            return Err(RemoteError::unavailable("invalid code"));
        }
        Ok(TokenGrant {
            access_token: "access-token".to_string(),
            refresh_token: self.refresh_token.clone(),
            expires_in: Some(3600),
        })
    }

    fn connect(&self, _refresh_token: &str, _grant: Option<&TokenGrant>) -> Arc<dyn RemoteMailbox> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.remote.clone()
    }
}
