//! Storage layer for Foresight.
//!
//! Durable job records in SQLite. [`SqliteJobStore`] implements the
//! orchestrator's `JobStore` trait on top of [`Database`].

// SQL strings don't need hash-less raw strings
#![allow(clippy::needless_raw_string_hashes)]

pub mod database;
pub mod error;
pub mod sessions;

pub use database::Database;
pub use error::{StorageError, StorageResult};
pub use sessions::SqliteJobStore;
