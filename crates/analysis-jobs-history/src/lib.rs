//! Durable job history.
//!
//! A SQLite-backed mirror of registry jobs, written best-effort through
//! [`HistoryBridge`] and queried per owner.

pub mod bridge;
pub mod error;
pub mod record;
pub mod store;

pub use bridge::{HistoryBridge, UpsertOutcome, MAX_HISTORY_LIST_LIMIT};
pub use error::HistoryError;
pub use record::{HistoryRecord, UserJobCount};
pub use store::{HistoryStore, SqliteHistoryStore};
