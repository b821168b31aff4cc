//! New-mail event fan-out
//!
//! The broadcaster holds every live client connection and pushes
//! [`MailEvent`]s to them. Delivery is best-effort and at-most-once: a
//! connection that fails is dropped and never sees a replay.

mod broadcaster;
mod event;

pub use broadcaster::{BroadcastReport, Broadcaster, Connection, ConnectionId};
pub use event::MailEvent;
