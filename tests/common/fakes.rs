//! Test doubles for the fetcher and storage seams.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use pagetape::session::{RecordingSession, SessionSummary};
use pagetape::{FetchError, ResourceFetcher, StorageAdapter, StorageError};
use reqwest::Url;
use uuid::Uuid;

/// Serves canned bodies; anything else is a 404.
#[derive(Default)]
pub struct MockFetcher {
    bodies: HashMap<String, String>,
    requests: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, body: &str) -> Self {
        self.bodies.insert(url.to_string(), body.to_string());
        self
    }

    pub fn requests(&self) -> Vec<String> {
        let mut requests = self.requests.lock().clone();
        requests.sort();
        requests
    }
}

#[async_trait]
impl ResourceFetcher for MockFetcher {
    async fn fetch_text(&self, url: &Url) -> Result<String, FetchError> {
        self.requests.lock().push(url.to_string());
        self.bodies
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

/// Storage whose every write fails.
#[derive(Default)]
pub struct FailingStorage {
    pub attempts: Mutex<usize>,
}

#[async_trait]
impl StorageAdapter for FailingStorage {
    async fn save(&self, _session: &RecordingSession) -> Result<(), StorageError> {
        *self.attempts.lock() += 1;
        Err(StorageError::Unavailable("disk full".to_string()))
    }

    async fn get(&self, _id: Uuid) -> Result<Option<RecordingSession>, StorageError> {
        Ok(None)
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, StorageError> {
        Ok(Vec::new())
    }

    async fn delete(&self, _id: Uuid) -> Result<bool, StorageError> {
        Ok(false)
    }
}
