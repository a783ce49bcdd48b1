//! History recorder with a batched retention and purge engine.
//!
//! The recorder persists events, entity states and recorder runs to SQLite or
//! PostgreSQL. A single background worker owns the write path; purge requests
//! are queued onto the same worker so deletions never interleave with
//! ingestion writes.

pub mod config;
pub mod db;
pub mod events;
pub mod filter;
pub mod models;
pub mod observability;
pub mod purge;
pub mod recorder;

pub use config::RecorderConfig;
pub use db::{DbError, DbPool, DbResult};
pub use recorder::Recorder;
