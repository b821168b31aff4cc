//! Email query functions

use anyhow::{Result, bail};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::models::{Email, Folder};
use crate::storage::MailStore;

/// Filters for listing mirrored emails
///
/// Text filters are case-insensitive substring matches. Results are ordered
/// by `sent_at` descending, ties by insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmailQuery {
    pub folder: Option<Folder>,
    /// Matches the sender's display name or address
    pub sender: Option<String>,
    /// Matches subject, body or preview
    pub keyword: Option<String>,
    pub unread_only: bool,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl EmailQuery {
    /// Upper bound on a single listing
    pub const MAX_LIMIT: usize = 200;

    pub fn folder(folder: Folder) -> Self {
        Self {
            folder: Some(folder),
            ..Default::default()
        }
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(Self::MAX_LIMIT).min(Self::MAX_LIMIT)
    }

    /// Whether `email` passes every filter except the limit
    pub fn matches(&self, email: &Email) -> bool {
        if self.folder.is_some_and(|f| f != email.folder) {
            return false;
        }
        if self.unread_only && email.is_read {
            return false;
        }
        if self.date_from.is_some_and(|from| email.sent_at < from) {
            return false;
        }
        if self.date_to.is_some_and(|to| email.sent_at > to) {
            return false;
        }
        if let Some(sender) = non_empty(&self.sender)
            && !contains_ci(&email.from_display_name, sender)
            && !contains_ci(&email.from_address, sender)
        {
            return false;
        }
        if let Some(keyword) = non_empty(&self.keyword)
            && !contains_ci(&email.subject, keyword)
            && !contains_ci(&email.body_text, keyword)
            && !contains_ci(&email.preview, keyword)
        {
            return false;
        }
        true
    }

    /// Whether the text filters need checking outside the store
    pub fn has_text_filters(&self) -> bool {
        non_empty(&self.sender).is_some() || non_empty(&self.keyword).is_some()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Parse a date filter bound
///
/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates. A plain date is
/// the start of that day for a lower bound and its end for an upper bound.
pub fn parse_date_bound(raw: &str, upper: bool) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") else {
        bail!("Invalid date: {}", raw);
    };
    let time = if upper {
        NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    };
    match time {
        Some(time) => Ok(date.and_time(time).and_utc()),
        None => bail!("Invalid date: {}", raw),
    }
}

/// List emails matching `query`, newest first
pub fn list_emails(store: &dyn MailStore, query: &EmailQuery) -> Result<Vec<Email>> {
    store.query_emails(query)
}

/// Get an email by local id, falling back to the Gmail message id
pub fn get_email(store: &dyn MailStore, key: &str) -> Result<Option<Email>> {
    store.find_email(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ThreadId;
    use chrono::TimeZone;

    fn email(from: &str, subject: &str, body: &str, read: bool) -> Email {
        Email::builder(ThreadId::new("t"))
            .remote_id(format!("r-{}", subject))
            .from(from)
            .subject(subject)
            .body_text(body)
            .read(read)
            .sent_at(Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap())
            .build()
    }

    #[test]
    fn test_sender_matches_name_or_address() {
        let e = email("Sarah Chen <sarah@techcorp.com>", "Hi", "", false);
        let by_name = EmailQuery {
            sender: Some("sarah c".to_string()),
            ..Default::default()
        };
        let by_addr = EmailQuery {
            sender: Some("TECHCORP".to_string()),
            ..Default::default()
        };
        let other = EmailQuery {
            sender: Some("david".to_string()),
            ..Default::default()
        };
        assert!(by_name.matches(&e));
        assert!(by_addr.matches(&e));
        assert!(!other.matches(&e));
    }

    #[test]
    fn test_keyword_matches_subject_or_body() {
        let e = email("a@b.c", "Invoice January", "Total due: $79", false);
        let subject = EmailQuery {
            keyword: Some("invoice".to_string()),
            ..Default::default()
        };
        let body = EmailQuery {
            keyword: Some("TOTAL DUE".to_string()),
            ..Default::default()
        };
        let blank = EmailQuery {
            keyword: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(subject.matches(&e));
        assert!(body.matches(&e));
        assert!(blank.matches(&e));
        assert!(!blank.has_text_filters());
    }

    #[test]
    fn test_unread_and_folder() {
        let read = email("a@b.c", "s", "", true);
        let unread_only = EmailQuery {
            unread_only: true,
            ..Default::default()
        };
        assert!(!unread_only.matches(&read));
        assert!(EmailQuery::folder(Folder::Inbox).matches(&read));
        assert!(!EmailQuery::folder(Folder::Sent).matches(&read));
    }

    #[test]
    fn test_date_bounds() {
        let e = email("a@b.c", "s", "", false);
        let q = EmailQuery {
            date_from: Some(parse_date_bound("2025-01-10", false).unwrap()),
            date_to: Some(parse_date_bound("2025-01-10", true).unwrap()),
            ..Default::default()
        };
        assert!(q.matches(&e));

        let later = EmailQuery {
            date_from: Some(parse_date_bound("2025-01-10T12:00:01Z", false).unwrap()),
            ..Default::default()
        };
        assert!(!later.matches(&e));
        assert!(parse_date_bound("last week", false).is_err());
    }

    #[test]
    fn test_limit_is_capped() {
        assert_eq!(EmailQuery::default().effective_limit(), 200);
        let q = EmailQuery {
            limit: Some(5000),
            ..Default::default()
        };
        assert_eq!(q.effective_limit(), 200);
        let q = EmailQuery {
            limit: Some(10),
            ..Default::default()
        };
        assert_eq!(q.effective_limit(), 10);
    }
}
