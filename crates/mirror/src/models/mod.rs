//! Domain models for the mirrored mailbox

mod account;
mod email;
mod label;
mod session;
mod sync_state;

pub use account::Account;
pub use email::{Email, EmailBuilder, EmailId, Folder, RemoteId, ThreadId, make_preview, split_address};
pub use label::{LabelState, labels};
pub use session::{Profile, Session, SessionState, SessionStatus};
pub use sync_state::SyncState;
