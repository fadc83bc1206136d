use tokio::sync::broadcast;

use crate::types::{DetailedState, ItemState, ScheduledTargetsInfo, SurveyTopology, TargetId};

/// Notifications published by the scheduler.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    DetailedStateChanged(DetailedState),
    SurveyTopology(SurveyTopology),
    /// Targets generated in one look-ahead cycle, in commit order.
    TargetQueue(Vec<TargetId>),
    /// Estimated wait before the next target becomes available, in seconds.
    TimeToNextTarget(f64),
    /// A snapshot was uploaded to the snapshot store.
    SnapshotSaved { uri: String },
    ScheduledTargetsSummary(ScheduledTargetsInfo),
    /// Per-item queue status update.
    ItemStatus {
        item_id: u64,
        target_id: TargetId,
        state: ItemState,
    },
    PredictedSchedule(Vec<TargetId>),
    Heartbeat {
        time: f64,
        tracking: bool,
    },
    /// Failure surfaced with a numeric code. Fatal codes stop the production
    /// loop; others report an absorbed error.
    Fault { code: i64, reason: String },
}

/// Event publication handle.
///
/// Wraps a broadcast channel so publishing never fails when nobody listens.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SchedulerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: SchedulerEvent) {
        // A send error only means there are no subscribers.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
