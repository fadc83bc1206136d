use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::traits::SnapshotStore;

/// Filesystem snapshot store. URIs have the form `file://<path>`.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    next_id: AtomicU64,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            next_id: AtomicU64::new(0),
        }
    }

    fn path_for(uri: &str) -> Result<PathBuf> {
        let path = uri
            .strip_prefix("file://")
            .with_context(|| format!("not a file snapshot uri: {uri}"))?;
        Ok(PathBuf::from(path))
    }
}

#[async_trait]
impl SnapshotStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn put(&self, bytes: &[u8]) -> Result<String> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("creating snapshot dir {}", self.root.display()))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let path = self.root.join(format!("snapshot-{id}.bin"));
        std::fs::write(&path, bytes)
            .with_context(|| format!("writing snapshot {}", path.display()))?;

        Ok(format!("file://{}", path.display()))
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>> {
        let path = Self::path_for(uri)?;
        std::fs::read(&path).with_context(|| format!("reading snapshot {}", path.display()))
    }
}
