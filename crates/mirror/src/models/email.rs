//! Email model representing a mirrored Gmail message

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Local identifier for a mirrored email (UUID v4, never reused)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmailId(pub String);

impl EmailId {
    /// Generate a fresh local identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Gmail message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(pub String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RemoteId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Gmail thread identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mirrored folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Folder {
    Inbox,
    Sent,
}

impl Folder {
    /// Folders tracked by a full sync, in sync order
    pub const ALL: [Folder; 2] = [Folder::Inbox, Folder::Sent];

    pub fn as_str(&self) -> &'static str {
        match self {
            Folder::Inbox => "inbox",
            Folder::Sent => "sent",
        }
    }

    /// Gmail search query selecting this folder
    pub fn search_query(&self) -> &'static str {
        match self {
            Folder::Inbox => "in:inbox",
            Folder::Sent => "in:sent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inbox" => Some(Folder::Inbox),
            "sent" => Some(Folder::Sent),
            _ => None,
        }
    }
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a raw address header into `(display_name, address)`.
///
/// `"Jane Doe" <jane@example.com>` yields `("Jane Doe", "jane@example.com")`.
/// A bare address or an empty name yields the local part as the display name.
pub fn split_address(raw: &str) -> (String, String) {
    let raw = raw.trim();
    if raw.is_empty() {
        return (String::new(), String::new());
    }

    if let Some(open) = raw.find('<')
        && let Some(close) = raw[open..].find('>').map(|i| open + i)
    {
        let address = raw[open + 1..close].trim().to_string();
        let name = raw[..open]
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .trim();
        let name = if name.is_empty() {
            local_part(&address).to_string()
        } else {
            name.to_string()
        };
        return (name, address);
    }

    (local_part(raw).to_string(), raw.to_string())
}

fn local_part(address: &str) -> &str {
    address.split('@').next().unwrap_or_default()
}

/// A mirrored email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    /// Local identifier
    pub id: EmailId,
    /// Gmail message ID (absent for locally composed messages)
    pub remote_id: Option<RemoteId>,
    pub thread_id: ThreadId,
    pub from_address: String,
    pub from_display_name: String,
    pub to_address: String,
    pub to_display_name: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
    /// Collapsed first characters of the body (or subject when the body is empty)
    pub preview: String,
    pub sent_at: DateTime<Utc>,
    pub is_read: bool,
    pub is_starred: bool,
    pub folder: Folder,
    /// RFC 5322 Message-ID header, used to build reply chains
    pub message_id_header: String,
    pub in_reply_to: String,
    pub references: String,
}

impl Email {
    pub fn builder(thread_id: ThreadId) -> EmailBuilder {
        EmailBuilder::new(thread_id)
    }

    /// Whether this email was composed locally and never seen remotely
    pub fn is_synthetic(&self) -> bool {
        self.remote_id.is_none()
    }

    /// Whether `key` names this email by local or remote id
    pub fn matches_id(&self, key: &str) -> bool {
        self.id.as_str() == key || self.remote_id.as_ref().is_some_and(|r| r.as_str() == key)
    }
}

/// Preview text: whitespace-collapsed body, or the subject if the body is empty
pub fn make_preview(body: &str, subject: &str) -> String {
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        subject.chars().take(100).collect()
    } else {
        collapsed.chars().take(150).collect()
    }
}

/// Builder for creating Email instances
pub struct EmailBuilder {
    id: Option<EmailId>,
    remote_id: Option<RemoteId>,
    thread_id: ThreadId,
    from: String,
    to: String,
    subject: String,
    body_text: String,
    body_html: String,
    preview: Option<String>,
    sent_at: Option<DateTime<Utc>>,
    is_read: bool,
    is_starred: bool,
    folder: Folder,
    message_id_header: String,
    in_reply_to: String,
    references: String,
}

impl EmailBuilder {
    fn new(thread_id: ThreadId) -> Self {
        Self {
            id: None,
            remote_id: None,
            thread_id,
            from: String::new(),
            to: String::new(),
            subject: String::new(),
            body_text: String::new(),
            body_html: String::new(),
            preview: None,
            sent_at: None,
            is_read: false,
            is_starred: false,
            folder: Folder::Inbox,
            message_id_header: String::new(),
            in_reply_to: String::new(),
            references: String::new(),
        }
    }

    pub fn id(mut self, id: EmailId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = Some(RemoteId::new(remote_id));
        self
    }

    /// Raw `From` header value
    pub fn from(mut self, raw: impl Into<String>) -> Self {
        self.from = raw.into();
        self
    }

    /// Raw `To` header value
    pub fn to(mut self, raw: impl Into<String>) -> Self {
        self.to = raw.into();
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn body_text(mut self, body_text: impl Into<String>) -> Self {
        self.body_text = body_text.into();
        self
    }

    pub fn body_html(mut self, body_html: impl Into<String>) -> Self {
        self.body_html = body_html.into();
        self
    }

    pub fn preview(mut self, preview: impl Into<String>) -> Self {
        self.preview = Some(preview.into());
        self
    }

    pub fn sent_at(mut self, sent_at: DateTime<Utc>) -> Self {
        self.sent_at = Some(sent_at);
        self
    }

    pub fn read(mut self, is_read: bool) -> Self {
        self.is_read = is_read;
        self
    }

    pub fn starred(mut self, is_starred: bool) -> Self {
        self.is_starred = is_starred;
        self
    }

    pub fn folder(mut self, folder: Folder) -> Self {
        self.folder = folder;
        self
    }

    pub fn message_id_header(mut self, value: impl Into<String>) -> Self {
        self.message_id_header = value.into();
        self
    }

    pub fn in_reply_to(mut self, value: impl Into<String>) -> Self {
        self.in_reply_to = value.into();
        self
    }

    pub fn references(mut self, value: impl Into<String>) -> Self {
        self.references = value.into();
        self
    }

    pub fn build(self) -> Email {
        let (from_display_name, from_address) = split_address(&self.from);
        let (to_display_name, to_address) = split_address(&self.to);
        let preview = self
            .preview
            .unwrap_or_else(|| make_preview(&self.body_text, &self.subject));

        Email {
            id: self.id.unwrap_or_else(EmailId::generate),
            remote_id: self.remote_id,
            thread_id: self.thread_id,
            from_address,
            from_display_name,
            to_address,
            to_display_name,
            subject: self.subject,
            body_text: self.body_text,
            body_html: self.body_html,
            preview,
            sent_at: self.sent_at.unwrap_or_else(Utc::now),
            is_read: self.is_read,
            is_starred: self.is_starred,
            folder: self.folder,
            message_id_header: self.message_id_header,
            in_reply_to: self.in_reply_to,
            references: self.references,
        }
    }
}
