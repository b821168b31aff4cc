//! Gmail label state of a message

use super::Folder;

/// Well-known Gmail system label IDs
pub mod labels {
    pub const INBOX: &str = "INBOX";
    pub const SENT: &str = "SENT";
    pub const UNREAD: &str = "UNREAD";
    pub const STARRED: &str = "STARRED";
}

/// The set of Gmail label IDs attached to a message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelState {
    ids: Vec<String>,
}

impl LabelState {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, label: &str) -> bool {
        self.ids.iter().any(|l| l == label)
    }

    pub fn is_inbox(&self) -> bool {
        self.contains(labels::INBOX)
    }

    pub fn is_sent(&self) -> bool {
        self.contains(labels::SENT)
    }

    pub fn is_unread(&self) -> bool {
        self.contains(labels::UNREAD)
    }

    pub fn is_starred(&self) -> bool {
        self.contains(labels::STARRED)
    }

    /// Mirrored folder for these labels. SENT takes priority over INBOX.
    pub fn folder(&self) -> Folder {
        if self.is_sent() {
            Folder::Sent
        } else {
            Folder::Inbox
        }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

impl From<Option<&Vec<String>>> for LabelState {
    fn from(ids: Option<&Vec<String>>) -> Self {
        ids.map(|ids| Self::new(ids.iter().cloned())).unwrap_or_default()
    }
}
