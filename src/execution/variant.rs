use anyhow::Result;
use async_trait::async_trait;
use kanal::AsyncSender;

use super::{MockQueue, SimQueue};
use crate::config::QueueType;
use crate::traits::ExecutionQueue;
use crate::types::{ExecutableItem, ItemEvent, QueueStatus};

/// Sim queue clock compression: one second of execution per simulated minute.
const SIM_TIME_SCALE: f64 = 1.0 / 60.0;

/// Enum of all execution queue implementations.
#[derive(Debug)]
pub enum ExecutionQueueVariant {
    Sim(SimQueue),
    Mock(MockQueue),
}

impl ExecutionQueueVariant {
    pub fn new(queue_type: QueueType) -> Self {
        match queue_type {
            QueueType::Sim => ExecutionQueueVariant::Sim(SimQueue::new(SIM_TIME_SCALE)),
            QueueType::Mock => ExecutionQueueVariant::Mock(MockQueue::new()),
        }
    }
}

#[async_trait]
impl ExecutionQueue for ExecutionQueueVariant {
    fn name(&self) -> &'static str {
        match self {
            ExecutionQueueVariant::Sim(inner) => inner.name(),
            ExecutionQueueVariant::Mock(inner) => inner.name(),
        }
    }

    async fn open(&mut self, tx: AsyncSender<ItemEvent>) -> Result<()> {
        match self {
            ExecutionQueueVariant::Sim(inner) => inner.open(tx).await,
            ExecutionQueueVariant::Mock(inner) => inner.open(tx).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            ExecutionQueueVariant::Sim(inner) => inner.close().await,
            ExecutionQueueVariant::Mock(inner) => inner.close().await,
        }
    }

    async fn submit(&self, item: &ExecutableItem) -> Result<u64> {
        match self {
            ExecutionQueueVariant::Sim(inner) => inner.submit(item).await,
            ExecutionQueueVariant::Mock(inner) => inner.submit(item).await,
        }
    }

    async fn cancel(&self, queue_index: u64) -> Result<()> {
        match self {
            ExecutionQueueVariant::Sim(inner) => inner.cancel(queue_index).await,
            ExecutionQueueVariant::Mock(inner) => inner.cancel(queue_index).await,
        }
    }

    async fn status(&self) -> Result<QueueStatus> {
        match self {
            ExecutionQueueVariant::Sim(inner) => inner.status().await,
            ExecutionQueueVariant::Mock(inner) => inner.status().await,
        }
    }
}
