//! Email actions module
//!
//! Local mutation endpoints: read/unread, star, send and thread lookup.

mod handler;

pub use handler::{ActionHandler, ReplyHeaders, SendOutcome, reply_headers};
