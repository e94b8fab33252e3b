//! Autopilot storage crate - the persistence boundary of the action engine.
//!
//! Defines the [`ActionStore`] trait over the four engine tables (rules,
//! executed actions, pending approvals, audit log) with a WAL-mode SQLite
//! implementation for production and an in-memory one for tests.

pub mod db;
pub mod error;
pub mod memory;
pub mod migrations;
pub mod sqlite;
pub mod store;

#[cfg(test)]
mod test_support;

pub use db::Database;
pub use error::StorageError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{ActionStore, AuditFilter, RuleStat};
