//! Session management
//!
//! OAuth login, session tokens with a persisted revocation set, logout, and
//! restore of the persisted account at startup.

mod manager;
mod token;

pub use manager::{AuthorizedLogin, SessionManager};
pub use token::{SessionToken, TokenIssuer, VerifiedToken};
