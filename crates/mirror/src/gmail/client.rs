//! Gmail API HTTP client
//!
//! Provides the `RemoteMailbox` calls against the Gmail REST API.
//! Uses synchronous HTTP (ureq) to be executor-agnostic. One call is one
//! attempt; callers decide what a failure means.

use std::sync::Mutex;

use base64::prelude::*;
use log::{debug, warn};
use serde::de::DeserializeOwned;

use super::GmailAuth;
use super::api::{
    GmailMessage, HistoryResponse, ListMessagesResponse, MessageRef, ModifyRequest,
    ProfileResponse, SendRequest, ThreadResponse,
};
use super::remote::{
    HistoryDelta, OutgoingMessage, RemoteMailbox, RemoteProfile, SentMessage, TokenGrant,
};
use crate::error::RemoteError;
use crate::models::{Folder, RemoteId, ThreadId};

/// Refresh access tokens this many seconds before they expire
const EXPIRY_BUFFER_SECS: i64 = 300;

struct AccessToken {
    token: String,
    expires_at: i64,
}

impl AccessToken {
    fn from_grant(grant: &TokenGrant) -> Self {
        Self {
            token: grant.access_token.clone(),
            expires_at: chrono::Utc::now().timestamp() + grant.expires_in.unwrap_or(3600) as i64,
        }
    }

    fn is_fresh(&self) -> bool {
        self.expires_at > chrono::Utc::now().timestamp() + EXPIRY_BUFFER_SECS
    }
}

/// Gmail API client for one account
pub struct GmailClient {
    auth: GmailAuth,
    refresh_token: String,
    access: Mutex<Option<AccessToken>>,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Create a new Gmail client, optionally seeded with a just-issued grant
    pub fn new(auth: GmailAuth, refresh_token: impl Into<String>, grant: Option<&TokenGrant>) -> Self {
        Self {
            auth,
            refresh_token: refresh_token.into(),
            access: Mutex::new(grant.map(AccessToken::from_grant)),
        }
    }

    /// Get a valid access token, refreshing it if it is close to expiry
    fn access_token(&self) -> Result<String, RemoteError> {
        let mut access = self.access.lock().unwrap();
        if let Some(token) = access.as_ref()
            && token.is_fresh()
        {
            return Ok(token.token.clone());
        }

        let grant = self.auth.refresh_access_token(&self.refresh_token)?;
        debug!("Refreshed Gmail access token");
        let token = AccessToken::from_grant(&grant);
        let value = token.token.clone();
        *access = Some(token);
        Ok(value)
    }

    /// Map a request error; a rejected access token is dropped so the next
    /// call refreshes it
    fn map_error(&self, e: ureq::Error) -> RemoteError {
        if matches!(e, ureq::Error::StatusCode(401)) {
            *self.access.lock().unwrap() = None;
        }
        RemoteError::from(e)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, RemoteError> {
        let access_token = self.access_token()?;
        let mut response = ureq::get(url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .call()
            .map_err(|e| self.map_error(e))?;
        Ok(response.body_mut().read_json()?)
    }

    fn post_json<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, RemoteError> {
        let access_token = self.access_token()?;
        let mut response = ureq::post(url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .send_json(body)
            .map_err(|e| self.map_error(e))?;
        Ok(response.body_mut().read_json()?)
    }

    /// List one page of message IDs matching `query`
    fn list_messages(
        &self,
        query: &str,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse, RemoteError> {
        let mut url = format!(
            "{}/users/me/messages?q={}&maxResults={}",
            Self::BASE_URL,
            urlencoding::encode(query),
            max_results.clamp(1, 500)
        );

        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        self.get_json(&url)
    }

    /// List one page of inbox history since `start_history_id`
    ///
    /// A 404 means the history ID is too old.
    fn list_history(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryResponse, RemoteError> {
        let mut url = format!(
            "{}/users/me/history?startHistoryId={}&historyTypes=messageAdded&labelId=INBOX",
            Self::BASE_URL,
            urlencoding::encode(start_history_id)
        );

        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        let access_token = self.access_token()?;
        let response = ureq::get(&url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .call();

        match response {
            Ok(mut resp) => Ok(resp.body_mut().read_json()?),
            Err(ureq::Error::StatusCode(404)) => Err(RemoteError::CursorExpired),
            Err(e) => Err(self.map_error(e)),
        }
    }
}

impl RemoteMailbox for GmailClient {
    fn list_message_ids(&self, folder: Folder, max: usize) -> Result<Vec<RemoteId>, RemoteError> {
        let mut ids: Vec<RemoteId> = Vec::new();
        let mut page_token = None;

        while ids.len() < max {
            let response =
                self.list_messages(folder.search_query(), max - ids.len(), page_token.as_deref())?;

            if let Some(messages) = response.messages {
                ids.extend(messages.into_iter().map(|m| RemoteId::new(m.id)));
            }

            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        ids.truncate(max);
        Ok(ids)
    }

    fn get_message(&self, id: &RemoteId) -> Result<GmailMessage, RemoteError> {
        let url = format!(
            "{}/users/me/messages/{}?format=full",
            Self::BASE_URL,
            urlencoding::encode(id.as_str())
        );
        self.get_json(&url)
    }

    fn get_history_since(&self, cursor: &str) -> Result<HistoryDelta, RemoteError> {
        let mut added = Vec::new();
        let mut next_cursor = None;
        let mut page_token = None;

        loop {
            let response = self.list_history(cursor, page_token.as_deref())?;

            for record in response.history.into_iter().flatten() {
                for entry in record.messages_added.into_iter().flatten() {
                    added.push(RemoteId::new(entry.message.id));
                }
            }

            if response.history_id.is_some() {
                next_cursor = response.history_id;
            }

            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(HistoryDelta {
            added,
            next_cursor: next_cursor.unwrap_or_else(|| cursor.to_string()),
        })
    }

    fn send(&self, message: &OutgoingMessage) -> Result<SentMessage, RemoteError> {
        let url = format!("{}/users/me/messages/send", Self::BASE_URL);
        let request = SendRequest {
            raw: BASE64_URL_SAFE.encode(build_raw_message(message)),
            thread_id: message.thread_id.as_ref().map(ThreadId::as_str),
        };
        let sent: MessageRef = self.post_json(&url, &request)?;
        debug!("Sent message {}", sent.id);

        let id = RemoteId::new(sent.id);
        match self.get_message(&id) {
            Ok(full) => Ok(SentMessage::Fetched(full)),
            Err(e) => {
                warn!("Sent message {} could not be fetched: {}", id, e);
                Ok(SentMessage::Accepted {
                    id,
                    thread_id: ThreadId::new(sent.thread_id),
                })
            }
        }
    }

    fn set_labels(&self, id: &RemoteId, add: &[&str], remove: &[&str]) -> Result<(), RemoteError> {
        let url = format!(
            "{}/users/me/messages/{}/modify",
            Self::BASE_URL,
            urlencoding::encode(id.as_str())
        );
        let request = ModifyRequest {
            add_label_ids: add,
            remove_label_ids: remove,
        };
        let _: MessageRef = self.post_json(&url, &request)?;
        Ok(())
    }

    fn get_profile(&self) -> Result<RemoteProfile, RemoteError> {
        let url = format!("{}/users/me/profile", Self::BASE_URL);
        let profile: ProfileResponse = self.get_json(&url)?;
        Ok(RemoteProfile {
            email: profile.email_address,
            history_id: profile.history_id,
            messages_total: profile.messages_total.unwrap_or(0),
            threads_total: profile.threads_total.unwrap_or(0),
        })
    }

    fn get_thread(&self, thread_id: &ThreadId) -> Result<Vec<GmailMessage>, RemoteError> {
        let url = format!(
            "{}/users/me/threads/{}?format=full",
            Self::BASE_URL,
            urlencoding::encode(thread_id.as_str())
        );
        let thread: ThreadResponse = self.get_json(&url)?;
        Ok(thread.messages.unwrap_or_default())
    }
}

/// Render an outgoing message as RFC 2822 text
///
/// Plain text, UTF-8. A non-ASCII subject is RFC 2047 encoded.
pub fn build_raw_message(message: &OutgoingMessage) -> String {
    let mut raw = String::new();
    raw.push_str(&format!("To: {}\r\n", header_value(&message.to)));
    raw.push_str(&format!("Subject: {}\r\n", encode_subject(&message.subject)));
    if let Some(in_reply_to) = message.in_reply_to.as_deref().filter(|v| !v.is_empty()) {
        raw.push_str(&format!("In-Reply-To: {}\r\n", header_value(in_reply_to)));
    }
    if let Some(references) = message.references.as_deref().filter(|v| !v.is_empty()) {
        raw.push_str(&format!("References: {}\r\n", header_value(references)));
    }
    raw.push_str("MIME-Version: 1.0\r\n");
    raw.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n");
    raw.push_str("Content-Transfer-Encoding: 8bit\r\n");
    raw.push_str("\r\n");
    raw.push_str(&message.body);
    raw
}

/// Header values cannot carry line breaks
fn header_value(value: &str) -> String {
    value.replace(['\r', '\n'], " ").trim().to_string()
}

fn encode_subject(subject: &str) -> String {
    let subject = header_value(subject);
    if subject.is_ascii() {
        subject
    } else {
        format!("=?UTF-8?B?{}?=", BASE64_STANDARD.encode(subject))
    }
}
