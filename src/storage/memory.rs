use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{StorageAdapter, StorageError};
use crate::session::{RecordingSession, SessionSummary};

/// In-process store, mostly for tests and short-lived embedders.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    sessions: Arc<RwLock<HashMap<Uuid, RecordingSession>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn save(&self, session: &RecordingSession) -> Result<(), StorageError> {
        self.sessions.write().insert(session.id(), session.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RecordingSession>, StorageError> {
        Ok(self.sessions.read().get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, StorageError> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .read()
            .values()
            .map(RecordingSession::summary)
            .collect();
        summaries.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(summaries)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StorageError> {
        Ok(self.sessions.write().remove(&id).is_some())
    }
}
