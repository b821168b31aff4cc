//! Sync engine and background poller
//!
//! Full sync is bounded and idempotent. Incremental sync follows the history
//! cursor and degrades to outcomes instead of errors.

mod engine;
mod poller;

pub use engine::{FolderSnapshot, FullSyncReport, IncrementalOutcome, IncrementalResult, SyncEngine, SyncStats};
pub use poller::{PollTask, Poller, PollerHandle};
