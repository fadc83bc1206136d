use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use kanal::AsyncSender;

use crate::traits::ExecutionQueue;
use crate::types::{ExecutableItem, ItemEvent, ItemState, Observation, QueueStatus};

#[derive(Debug, Default)]
struct MockInner {
    tx: Option<AsyncSender<ItemEvent>>,
    status: QueueStatus,
    next_index: u64,
    submitted: Vec<ExecutableItem>,
    cancelled: Vec<u64>,
    ok_before_fail: u32,
    fail_submits: u32,
    ok_before_stall: u32,
    stall: Option<Duration>,
}

/// Mock execution queue for tests.
///
/// Records submissions and lets the test report outcomes explicitly.
#[derive(Debug, Clone, Default)]
pub struct MockQueue {
    inner: Arc<Mutex<MockInner>>,
}

impl MockQueue {
    pub fn new() -> Self {
        let queue = Self::default();
        queue.lock().status.running = true;
        queue
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn submitted(&self) -> Vec<ExecutableItem> {
        self.lock().submitted.clone()
    }

    pub fn cancelled(&self) -> Vec<u64> {
        self.lock().cancelled.clone()
    }

    /// Accept `ok` submissions, then fail the following `n`.
    pub fn fail_submits_after(&self, ok: u32, n: u32) {
        let mut guard = self.lock();
        guard.ok_before_fail = ok;
        guard.fail_submits = n;
    }

    /// Accept `ok` submissions instantly, then make every later submission
    /// sleep for `delay` before completing.
    pub fn stall_submits_after(&self, ok: u32, delay: Duration) {
        let mut guard = self.lock();
        guard.ok_before_stall = ok;
        guard.stall = Some(delay);
    }

    /// Report a completed execution for an item.
    pub async fn report_done(&self, item_id: u64, completion: Observation) -> Result<()> {
        self.report(ItemEvent {
            item_id,
            state: ItemState::Done,
            completion: Some(completion),
        })
        .await
    }

    /// Report a failed execution for an item.
    pub async fn report_failed(&self, item_id: u64) -> Result<()> {
        self.report(ItemEvent {
            item_id,
            state: ItemState::Failed,
            completion: None,
        })
        .await
    }

    pub async fn report(&self, event: ItemEvent) -> Result<()> {
        let tx = {
            let guard = self.lock();
            guard.tx.clone()
        };
        match tx {
            Some(tx) => {
                tx.send(event).await?;
                Ok(())
            }
            None => bail!("mock queue is not open"),
        }
    }
}

#[async_trait]
impl ExecutionQueue for MockQueue {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn open(&mut self, tx: AsyncSender<ItemEvent>) -> Result<()> {
        self.lock().tx = Some(tx);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.lock().tx = None;
        Ok(())
    }

    async fn submit(&self, item: &ExecutableItem) -> Result<u64> {
        let stall = {
            let mut guard = self.lock();
            if guard.ok_before_stall > 0 {
                guard.ok_before_stall -= 1;
                None
            } else {
                guard.stall
            }
        };
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }

        let mut guard = self.lock();
        if guard.ok_before_fail > 0 {
            guard.ok_before_fail -= 1;
        } else if guard.fail_submits > 0 {
            guard.fail_submits -= 1;
            bail!("mock submission failure");
        }

        guard.next_index += 1;
        let queue_index = guard.next_index;
        guard.submitted.push(ExecutableItem {
            queue_index: Some(queue_index),
            ..item.clone()
        });
        guard.status.length += 1;
        Ok(queue_index)
    }

    async fn cancel(&self, queue_index: u64) -> Result<()> {
        let mut guard = self.lock();
        guard.cancelled.push(queue_index);
        guard.status.length = guard.status.length.saturating_sub(1);
        Ok(())
    }

    async fn status(&self) -> Result<QueueStatus> {
        Ok(self.lock().status)
    }
}
