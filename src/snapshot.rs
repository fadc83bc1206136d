use anyhow::Context;
use tracing::{debug, info};

use crate::error::SchedulerError;
use crate::snapshot_store::SnapshotStoreVariant;
use crate::traits::{Driver, SnapshotStore};

/// Opaque driver state captured at a cycle boundary.
#[derive(Debug, Clone)]
pub struct Snapshot {
    bytes: Vec<u8>,
    /// Capture counter, strictly increasing per manager instance.
    pub logical_time: u64,
    /// Location in the snapshot store, when uploaded.
    pub uri: Option<String>,
}

impl Snapshot {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Captures and restores driver state around speculative work.
///
/// A capture taken before a generation cycle is the rollback point for that
/// whole cycle; restoring it must leave the driver byte-identical to the
/// moment of capture.
pub struct SnapshotManager {
    store: SnapshotStoreVariant,
    upload: bool,
    clock: u64,
}

impl SnapshotManager {
    pub fn new(store: SnapshotStoreVariant, upload: bool) -> Self {
        Self {
            store,
            upload,
            clock: 0,
        }
    }

    /// Capture the driver's current state. Uploads to the store only when the
    /// manager was configured to publish snapshots.
    pub async fn capture(&mut self, driver: &dyn Driver) -> anyhow::Result<Snapshot> {
        let bytes = driver
            .save_state()
            .context("Failed to serialize driver state")?;
        self.clock += 1;

        let uri = if self.upload {
            let uri = self
                .store
                .put(&bytes)
                .await
                .context("Failed to upload snapshot")?;
            info!("Saved scheduler snapshot to {uri}.");
            Some(uri)
        } else {
            None
        };

        debug!(
            "Captured driver snapshot: {} bytes, logical time {}.",
            bytes.len(),
            self.clock
        );
        Ok(Snapshot {
            bytes,
            logical_time: self.clock,
            uri,
        })
    }

    /// Capture without uploading, regardless of configuration. Used for the
    /// per-cycle rollback point, which is never published.
    pub fn capture_local(&mut self, driver: &dyn Driver) -> anyhow::Result<Snapshot> {
        let bytes = driver
            .save_state()
            .context("Failed to serialize driver state")?;
        self.clock += 1;
        Ok(Snapshot {
            bytes,
            logical_time: self.clock,
            uri: None,
        })
    }

    /// Restore the driver to a previously captured state.
    ///
    /// A failure here means the driver's state can no longer be trusted; the
    /// caller must treat it as fatal.
    pub fn restore(
        &self,
        driver: &mut dyn Driver,
        snapshot: &Snapshot,
    ) -> Result<(), SchedulerError> {
        driver
            .restore_state(&snapshot.bytes)
            .map_err(|source| SchedulerError::SnapshotRestore { source })?;
        debug!(
            "Restored driver state from snapshot at logical time {}.",
            snapshot.logical_time
        );
        Ok(())
    }

    /// Fetch snapshot bytes from the store by URI (warm start, `load`).
    pub async fn fetch(&self, uri: &str) -> anyhow::Result<Vec<u8>> {
        self.store
            .get(uri)
            .await
            .with_context(|| format!("Failed to fetch snapshot from {uri}"))
    }
}
