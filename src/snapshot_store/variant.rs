use anyhow::Result;
use async_trait::async_trait;

use super::{FileStore, MemoryStore, NoopStore};
use crate::config::{BaseConfig, SnapshotStoreType};
use crate::traits::SnapshotStore;

/// Enum of all snapshot store implementations.
#[derive(Debug)]
pub enum SnapshotStoreVariant {
    Memory(MemoryStore),
    File(FileStore),
    Noop(NoopStore),
}

impl SnapshotStoreVariant {
    pub fn from_config(config: &BaseConfig) -> Self {
        match config.snapshot_store_type {
            SnapshotStoreType::Memory => SnapshotStoreVariant::Memory(MemoryStore::new()),
            SnapshotStoreType::File => {
                SnapshotStoreVariant::File(FileStore::new(&config.snapshot_store_path))
            }
            SnapshotStoreType::Noop => SnapshotStoreVariant::Noop(NoopStore),
        }
    }
}

#[async_trait]
impl SnapshotStore for SnapshotStoreVariant {
    fn name(&self) -> &'static str {
        match self {
            SnapshotStoreVariant::Memory(inner) => inner.name(),
            SnapshotStoreVariant::File(inner) => inner.name(),
            SnapshotStoreVariant::Noop(inner) => inner.name(),
        }
    }

    async fn put(&self, bytes: &[u8]) -> Result<String> {
        match self {
            SnapshotStoreVariant::Memory(inner) => inner.put(bytes).await,
            SnapshotStoreVariant::File(inner) => inner.put(bytes).await,
            SnapshotStoreVariant::Noop(inner) => inner.put(bytes).await,
        }
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>> {
        match self {
            SnapshotStoreVariant::Memory(inner) => inner.get(uri).await,
            SnapshotStoreVariant::File(inner) => inner.get(uri).await,
            SnapshotStoreVariant::Noop(inner) => inner.get(uri).await,
        }
    }
}
