//! Gmail API response normalization
//!
//! Converts Gmail API messages to mirrored `Email` records. Pure, no I/O.

use std::sync::LazyLock;

use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::{DecodePaddingMode, general_purpose};
use base64::{Engine, alphabet};
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;

use super::api::{GmailMessage, MessagePart, MessagePayload};
use crate::models::{Email, LabelState, ThreadId};

const NO_SUBJECT: &str = "(no subject)";

static BR_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Tolerant URL-safe decoder used after the strict decoders fail
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Message body tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyPart {
    Leaf { mime: String, data: Option<String> },
    Multipart { parts: Vec<BodyPart> },
}

impl BodyPart {
    pub fn from_payload(payload: &MessagePayload) -> Self {
        Self::build(
            payload.mime_type.as_deref(),
            payload.body.as_ref().and_then(|b| b.data.as_deref()),
            payload.parts.as_deref(),
        )
    }

    fn from_part(part: &MessagePart) -> Self {
        Self::build(
            part.mime_type.as_deref(),
            part.body.as_ref().and_then(|b| b.data.as_deref()),
            part.parts.as_deref(),
        )
    }

    fn build(mime: Option<&str>, data: Option<&str>, parts: Option<&[MessagePart]>) -> Self {
        match parts {
            Some(parts) if !parts.is_empty() => BodyPart::Multipart {
                parts: parts.iter().map(Self::from_part).collect(),
            },
            _ => BodyPart::Leaf {
                mime: mime.unwrap_or_default().to_ascii_lowercase(),
                data: data.map(str::to_string),
            },
        }
    }
}

#[derive(Debug, Default)]
struct ExtractedBody {
    text: Option<String>,
    html: Option<String>,
}

impl ExtractedBody {
    fn is_complete(&self) -> bool {
        self.text.is_some() && self.html.is_some()
    }
}

/// Depth-first walk; the first non-empty text/plain and text/html leaves win
fn collect_bodies(part: &BodyPart, out: &mut ExtractedBody) {
    match part {
        BodyPart::Leaf { mime, data } => {
            let Some(data) = data else { return };
            let slot = if mime.starts_with("text/plain") {
                &mut out.text
            } else if mime.starts_with("text/html") {
                &mut out.html
            } else {
                return;
            };
            if slot.is_none() {
                let decoded = decode_base64_body(data);
                let decoded = decoded.trim();
                if !decoded.is_empty() {
                    *slot = Some(decoded.to_string());
                }
            }
        }
        BodyPart::Multipart { parts } => {
            for part in parts {
                collect_bodies(part, out);
                if out.is_complete() {
                    break;
                }
            }
        }
    }
}

/// Extract `(text, html)` from a body tree
///
/// Text is derived from the html when no text/plain part exists.
pub fn extract_bodies(body: &BodyPart) -> (String, String) {
    let mut out = ExtractedBody::default();
    collect_bodies(body, &mut out);

    let html = out.html.unwrap_or_default();
    let text = match out.text {
        Some(text) => text,
        None if !html.is_empty() => html_to_text(&html),
        None => String::new(),
    };
    (text, html)
}

/// Normalize a Gmail API message to a mirrored Email
///
/// A fresh local id is assigned; the store keeps the existing one when the
/// remote id is already mirrored.
pub fn normalize_message(raw: &GmailMessage, labels: &LabelState) -> Email {
    let payload = raw.payload.as_ref();
    let header = |name: &str| payload.and_then(|p| extract_header(p, name));

    let (body_text, body_html) = payload
        .map(|p| extract_bodies(&BodyPart::from_payload(p)))
        .unwrap_or_default();

    let sent_at = header("Date")
        .and_then(|d| parse_date(&d))
        .or_else(|| internal_date(&raw.internal_date))
        .unwrap_or_else(Utc::now);

    Email::builder(ThreadId::new(&raw.thread_id))
        .remote_id(&raw.id)
        .from(header("From").unwrap_or_default())
        .to(header("To").unwrap_or_default())
        .subject(header("Subject").unwrap_or_else(|| NO_SUBJECT.to_string()))
        .body_text(body_text)
        .body_html(body_html)
        .sent_at(sent_at)
        .read(!labels.is_unread())
        .starred(labels.is_starred())
        .folder(labels.folder())
        .message_id_header(header("Message-ID").unwrap_or_default())
        .in_reply_to(header("In-Reply-To").unwrap_or_default())
        .references(header("References").unwrap_or_default())
        .build()
}

/// Extract a header value by name
fn extract_header(payload: &MessagePayload, name: &str) -> Option<String> {
    payload.headers.as_ref()?.iter().find_map(|h| {
        if h.name.eq_ignore_ascii_case(name) {
            Some(h.value.clone())
        } else {
            None
        }
    })
}

/// Parse an RFC 2822 date, tolerating a trailing `(UTC)` style comment
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let mut value = raw.trim();
    if value.ends_with(')')
        && let Some(open) = value.rfind('(')
    {
        value = value[..open].trim_end();
    }
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Gmail internalDate (milliseconds since epoch)
fn internal_date(raw: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = raw.parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Decode base64-encoded body data
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple
/// decoders. Anything still undecodable is cleaned and decoded leniently;
/// invalid UTF-8 is replaced rather than rejected.
fn decode_base64_body(data: &str) -> String {
    let decoders: &[&GeneralPurpose] = &[
        &general_purpose::URL_SAFE_NO_PAD,
        &general_purpose::URL_SAFE,
        &general_purpose::STANDARD,
        &general_purpose::STANDARD_NO_PAD,
    ];

    for decoder in decoders {
        if let Ok(decoded) = decoder.decode(data) {
            return String::from_utf8_lossy(&decoded).into_owned();
        }
    }

    let mut cleaned: String = data
        .chars()
        .filter_map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' => Some(c),
            '+' => Some('-'),
            '/' => Some('_'),
            _ => None,
        })
        .collect();
    if cleaned.len() % 4 == 1 {
        cleaned.pop();
    }

    LENIENT
        .decode(&cleaned)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Plain text rendition of an HTML body
pub fn html_to_text(html: &str) -> String {
    let text = BR_TAG.replace_all(html, "\n");
    let text = ANY_TAG.replace_all(&text, "");
    decode_html_entities(&text).trim().to_string()
}

/// Decode common HTML entities
fn decode_html_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
