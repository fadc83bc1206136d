use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::traits::SnapshotStore;

/// In-memory snapshot store. URIs have the form `mem://<n>`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a blob under a known URI; used to seed warm-start tests.
    pub fn insert(&self, uri: &str, bytes: Vec<u8>) {
        self.blobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(uri.to_string(), bytes);
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, bytes: &[u8]) -> Result<String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let uri = format!("mem://{id}");
        self.blobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(uri.clone(), bytes.to_vec());
        Ok(uri)
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(uri)
            .cloned()
            .ok_or_else(|| anyhow!("no snapshot stored at {uri}"))
    }
}
