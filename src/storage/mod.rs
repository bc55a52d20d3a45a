//! Session persistence.
//!
//! Sessions are stored as immutable values: every `save` overwrites the
//! previous copy wholesale.

mod memory;
mod migrations;
mod sqlite;

use async_trait::async_trait;
use uuid::Uuid;

use crate::session::{RecordingSession, SessionError, SessionSummary};

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to create data directory: {0}")]
    CreateDir(std::io::Error),
    #[error("Stored session is unreadable: {0}")]
    Corrupt(#[from] SessionError),
    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Asynchronous session store.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Insert or overwrite a session
    async fn save(&self, session: &RecordingSession) -> Result<(), StorageError>;

    async fn get(&self, id: Uuid) -> Result<Option<RecordingSession>, StorageError>;

    /// Summaries of every stored session, newest start time first
    async fn list(&self) -> Result<Vec<SessionSummary>, StorageError>;

    /// Returns whether a session was removed
    async fn delete(&self, id: Uuid) -> Result<bool, StorageError>;
}
