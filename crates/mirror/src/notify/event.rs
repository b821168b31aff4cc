//! Events pushed to live connections

use serde::{Deserialize, Serialize};

use crate::models::Email;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MailEvent {
    /// A message arrived in the inbox
    NewEmail { email: Email },
    /// A message was sent from this client
    EmailSent { email: Email },
}

impl MailEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            MailEvent::NewEmail { .. } => "new_email",
            MailEvent::EmailSent { .. } => "email_sent",
        }
    }

    pub fn email(&self) -> &Email {
        match self {
            MailEvent::NewEmail { email } | MailEvent::EmailSent { email } => email,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ThreadId;

    #[test]
    fn test_event_wire_format() {
        let email = Email::builder(ThreadId::new("t1"))
            .remote_id("m1")
            .subject("Hello")
            .build();
        let json = serde_json::to_value(MailEvent::NewEmail { email }).unwrap();

        assert_eq!(json["type"], "new_email");
        assert_eq!(json["email"]["subject"], "Hello");
        assert_eq!(json["email"]["remote_id"], "m1");
    }

    #[test]
    fn test_sent_event_kind() {
        let email = Email::builder(ThreadId::new("t1")).build();
        let event = MailEvent::EmailSent { email };
        assert_eq!(event.kind(), "email_sent");
        assert_eq!(serde_json::to_value(&event).unwrap()["type"], "email_sent");
    }
}
