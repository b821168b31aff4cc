//! Storage traits and implementations
//!
//! This module defines the storage abstraction for the mirror. The
//! trait-based design allows swapping between in-memory and SQLite
//! storage implementations.

mod memory;
mod sqlite;
mod traits;

#[cfg(test)]
pub(crate) mod conformance;

pub use memory::InMemoryMailStore;
pub use sqlite::SqliteMailStore;
pub use traits::{MailStore, UpsertOutcome};
