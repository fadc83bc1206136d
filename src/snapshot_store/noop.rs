use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::traits::SnapshotStore;

/// Snapshot store that keeps nothing. Snapshots stay local to the cycle.
#[derive(Debug, Default)]
pub struct NoopStore;

#[async_trait]
impl SnapshotStore for NoopStore {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn put(&self, _bytes: &[u8]) -> Result<String> {
        Ok("noop://discarded".to_string())
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>> {
        bail!("noop snapshot store cannot retrieve {uri}")
    }
}
