//! Query API for client consumption
//!
//! Provides filtered listings over the mirrored emails.

mod emails;

pub use emails::{EmailQuery, get_email, list_emails, parse_date_bound};
