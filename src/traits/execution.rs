use anyhow::Result;
use async_trait::async_trait;
use kanal::AsyncSender;

use crate::types::{ExecutableItem, ItemEvent, QueueStatus};

/// External execution queue that runs submitted items.
///
/// Implementations report per-item state changes and terminal outcomes on the
/// channel handed to `open`; the reconciliation listener consumes them.
#[async_trait]
pub trait ExecutionQueue: Send + Sync {
    /// Queue name for logging.
    fn name(&self) -> &'static str;

    /// Start the queue with a channel for item state notifications.
    async fn open(&mut self, tx: AsyncSender<ItemEvent>) -> Result<()>;

    /// Stop the queue and release resources.
    async fn close(&mut self) -> Result<()>;

    /// Submit an item for execution. Returns the queue-assigned index.
    async fn submit(&self, item: &ExecutableItem) -> Result<u64>;

    /// Withdraw a previously submitted item.
    async fn cancel(&self, queue_index: u64) -> Result<()>;

    /// Current queue status.
    async fn status(&self) -> Result<QueueStatus>;
}
