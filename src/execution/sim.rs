use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use kanal::AsyncSender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::traits::ExecutionQueue;
use crate::types::{now_secs, ExecutableItem, ItemEvent, ItemState, Observation, QueueStatus};

/// Poll interval of the executor task when the queue is empty.
const IDLE_POLL_MS: u64 = 20;

#[derive(Debug)]
struct Pending {
    queue_index: u64,
    item_id: u64,
    observation: Observation,
}

#[derive(Debug, Default)]
struct SimInner {
    running: bool,
    next_index: u64,
    pending: VecDeque<Pending>,
    executing: Option<u64>,
    cancelled: HashSet<u64>,
}

/// Simulated execution queue.
///
/// Runs submitted items in order, one at a time, sleeping for the item's
/// estimated duration scaled by `time_scale` and then reporting a completed
/// observation.
#[derive(Debug)]
pub struct SimQueue {
    inner: Arc<Mutex<SimInner>>,
    time_scale: f64,
    executor: Option<JoinHandle<()>>,
}

impl SimQueue {
    pub fn new(time_scale: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimInner::default())),
            time_scale,
            executor: None,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn executor_loop(
        inner: Arc<Mutex<SimInner>>,
        tx: AsyncSender<ItemEvent>,
        time_scale: f64,
    ) {
        loop {
            let next = {
                let mut guard = inner.lock().unwrap_or_else(|e| e.into_inner());
                if !guard.running {
                    None
                } else {
                    match guard.pending.pop_front() {
                        Some(p) if guard.cancelled.remove(&p.queue_index) => {
                            // Withdrawn before execution started.
                            Some((p, true))
                        }
                        Some(p) => {
                            guard.executing = Some(p.queue_index);
                            Some((p, false))
                        }
                        None => None,
                    }
                }
            };

            let Some((pending, cancelled)) = next else {
                tokio::time::sleep(Duration::from_millis(IDLE_POLL_MS)).await;
                continue;
            };

            if cancelled {
                let event = ItemEvent {
                    item_id: pending.item_id,
                    state: ItemState::Aborted,
                    completion: None,
                };
                if tx.send(event).await.is_err() {
                    break;
                }
                continue;
            }

            let running = ItemEvent {
                item_id: pending.item_id,
                state: ItemState::Running,
                completion: None,
            };
            if tx.send(running).await.is_err() {
                break;
            }

            let sleep = pending.observation.duration * time_scale;
            tokio::time::sleep(Duration::from_secs_f64(sleep.max(0.0))).await;

            let aborted = {
                let mut guard = inner.lock().unwrap_or_else(|e| e.into_inner());
                guard.executing = None;
                guard.cancelled.remove(&pending.queue_index)
            };

            let mut observation = pending.observation;
            observation.start_time = now_secs() - observation.duration;
            observation.speculative = false;

            let event = if aborted {
                ItemEvent {
                    item_id: pending.item_id,
                    state: ItemState::Aborted,
                    completion: None,
                }
            } else {
                ItemEvent {
                    item_id: pending.item_id,
                    state: ItemState::Done,
                    completion: Some(observation),
                }
            };
            if tx.send(event).await.is_err() {
                break;
            }
        }
        debug!("Sim queue executor finished.");
    }
}

#[async_trait]
impl ExecutionQueue for SimQueue {
    fn name(&self) -> &'static str {
        "sim"
    }

    async fn open(&mut self, tx: AsyncSender<ItemEvent>) -> Result<()> {
        self.lock().running = true;

        let inner = Arc::clone(&self.inner);
        let time_scale = self.time_scale;
        self.executor = Some(tokio::spawn(async move {
            Self::executor_loop(inner, tx, time_scale).await;
        }));

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.lock().running = false;
        if let Some(executor) = self.executor.take() {
            executor.abort();
        }
        Ok(())
    }

    async fn submit(&self, item: &ExecutableItem) -> Result<u64> {
        let mut guard = self.lock();
        if !guard.running {
            bail!("sim queue is not running");
        }

        guard.next_index += 1;
        let queue_index = guard.next_index;

        let observation = Observation {
            target_id: item.target.target_id,
            position: item.target.position,
            band: item.target.band.clone(),
            start_time: now_secs(),
            duration: item.target.estimated_duration,
            speculative: false,
        };

        guard.pending.push_back(Pending {
            queue_index,
            item_id: item.item_id,
            observation,
        });

        Ok(queue_index)
    }

    async fn cancel(&self, queue_index: u64) -> Result<()> {
        let mut guard = self.lock();
        let known = guard.executing == Some(queue_index)
            || guard.pending.iter().any(|p| p.queue_index == queue_index);
        if !known {
            warn!("Cancel for unknown queue index {queue_index}.");
        }
        guard.cancelled.insert(queue_index);
        Ok(())
    }

    async fn status(&self) -> Result<QueueStatus> {
        let guard = self.lock();
        Ok(QueueStatus {
            running: guard.running,
            length: guard.pending.len(),
            executing: guard.executing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockDriver;

    fn item(item_id: u64, duration: f64) -> ExecutableItem {
        ExecutableItem {
            item_id,
            queue_index: None,
            target: MockDriver::make_target(item_id, duration),
            state: ItemState::PendingSubmit,
            completion: None,
        }
    }

    #[tokio::test]
    async fn runs_items_in_order_and_reports_done() {
        let mut queue = SimQueue::new(0.001);
        let (tx, rx) = kanal::unbounded_async();
        queue.open(tx).await.unwrap();

        queue.submit(&item(1, 20.0)).await.unwrap();
        queue.submit(&item(2, 20.0)).await.unwrap();

        let mut done = Vec::new();
        while done.len() < 2 {
            let event = rx.recv().await.unwrap();
            if event.state == ItemState::Done {
                assert!(event.completion.is_some());
                done.push(event.item_id);
            }
        }
        assert_eq!(done, vec![1, 2]);
        queue.close().await.unwrap();
    }

    #[tokio::test]
    async fn cancel_before_execution_reports_aborted() {
        let mut queue = SimQueue::new(0.001);
        let (tx, rx) = kanal::unbounded_async();
        queue.open(tx).await.unwrap();

        // A long first item keeps the second one pending.
        queue.submit(&item(1, 200.0)).await.unwrap();
        let second = queue.submit(&item(2, 20.0)).await.unwrap();
        queue.cancel(second).await.unwrap();

        loop {
            let event = rx.recv().await.unwrap();
            if event.item_id == 2 {
                assert_eq!(event.state, ItemState::Aborted);
                assert!(event.completion.is_none());
                break;
            }
        }
        queue.close().await.unwrap();
    }

    #[tokio::test]
    async fn submit_requires_open() {
        let queue = SimQueue::new(1.0);
        assert!(queue.submit(&item(1, 1.0)).await.is_err());
    }
}
