//! Account model representing the authenticated Gmail account

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The persisted Gmail account, the durable anchor of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Email address (unique)
    pub email: String,
    /// Display name, when the profile provides one
    pub display_name: Option<String>,
    /// Long-lived OAuth refresh token
    pub refresh_token: String,
    /// When the account was added
    pub added_at: DateTime<Utc>,
}

impl Account {
    pub fn new(email: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            display_name: None,
            refresh_token: refresh_token.into(),
            added_at: Utc::now(),
        }
    }

    /// Set display name
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}
