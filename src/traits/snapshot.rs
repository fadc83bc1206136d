use anyhow::Result;
use async_trait::async_trait;

/// Blob store for driver snapshots, addressed by URI.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Store name for logging.
    fn name(&self) -> &'static str;

    /// Persist a snapshot payload, returning its URI.
    async fn put(&self, bytes: &[u8]) -> Result<String>;

    /// Fetch a snapshot payload by URI.
    async fn get(&self, uri: &str) -> Result<Vec<u8>>;
}
