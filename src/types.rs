use serde::{Deserialize, Serialize};

/// Unique, monotonically increasing target identifier issued by a driver.
pub type TargetId = u64;

/// Identifier for an executable item tracked by the execution tracker.
pub type ItemId = u64;

/// Sky coordinates in degrees (ICRS).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyPosition {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

/// A candidate observation returned by a driver.
///
/// Immutable once issued. The production loop owns it until it is converted
/// into an `ExecutableItem` and handed to the execution tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Driver-issued identifier, strictly increasing per driver instance.
    pub target_id: TargetId,
    /// Where to point.
    pub position: SkyPosition,
    /// Filter/band name (e.g. "g", "r").
    pub band: String,
    /// Exposure plan: one entry per exposure, duration in seconds.
    pub exposure_times: Vec<f64>,
    /// Estimated total execution time in seconds, including overheads.
    pub estimated_duration: f64,
    /// Earliest time the observation can start (unix seconds, TAI).
    pub obs_time: f64,
    /// Scheduling-algorithm payload, opaque to the production loop.
    pub metadata: serde_json::Value,
}

impl Target {
    /// Total open-shutter time for the exposure plan.
    pub fn exposure_total(&self) -> f64 {
        self.exposure_times.iter().sum()
    }
}

/// Executed (or speculatively projected) outcome of a target, as registered
/// with the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub target_id: TargetId,
    pub position: SkyPosition,
    pub band: String,
    /// Actual (or projected) start time, unix seconds.
    pub start_time: f64,
    /// Actual (or projected) execution duration in seconds.
    pub duration: f64,
    /// True while the outcome is a look-ahead projection rather than a
    /// confirmed execution.
    pub speculative: bool,
}

/// Lifecycle of an executable item from submission to terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemState {
    PendingSubmit,
    Queued,
    Running,
    Done,
    Failed,
    Aborted,
}

impl ItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemState::Done | ItemState::Failed | ItemState::Aborted)
    }

    /// Still occupying a slot on the execution queue.
    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal()
    }
}

/// Realization of a target as a submission to the execution queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutableItem {
    pub item_id: ItemId,
    /// Index assigned by the execution queue once the submission is accepted.
    pub queue_index: Option<u64>,
    pub target: Target,
    pub state: ItemState,
    /// Completion payload, present once the item reaches a terminal state.
    pub completion: Option<Observation>,
}

/// State-change notification emitted by an execution queue for one item.
#[derive(Debug, Clone)]
pub struct ItemEvent {
    pub item_id: ItemId,
    pub state: ItemState,
    /// Executed outcome; only meaningful for `ItemState::Done`.
    pub completion: Option<Observation>,
}

/// Execution queue status as reported by `ExecutionQueue::status`.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStatus {
    /// Whether the queue is accepting and running items.
    pub running: bool,
    /// Number of items waiting on the queue.
    pub length: usize,
    /// Queue index of the currently executing item, if any.
    pub executing: Option<u64>,
}

/// Summary of one reconciliation pass over the scheduled targets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduledTargetsInfo {
    /// Targets still scheduled or running after the pass.
    pub scheduled: usize,
    /// Targets whose observations completed and were registered.
    pub observed: Vec<TargetId>,
    /// Targets whose execution failed or was aborted.
    pub failed: Vec<TargetId>,
}

/// Survey topology published by a driver after reconstruction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SurveyTopology {
    pub num_general_props: usize,
    pub general_props: Vec<String>,
    pub num_seq_props: usize,
    pub sequence_props: Vec<String>,
}

/// Fine-grained operating sub-state of the production loop.
///
/// At most one non-`Running` sub-state is active system-wide; transitions in
/// and out of a sub-state always pass through `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetailedState {
    /// Production loop not running.
    Idle,
    Running,
    GeneratingTargetQueue,
    ComputingPredictedSchedule,
    QueueingTarget,
    WaitingNextTargetTimer,
}

impl std::fmt::Display for DetailedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DetailedState::Idle => "IDLE",
            DetailedState::Running => "RUNNING",
            DetailedState::GeneratingTargetQueue => "GENERATING_TARGET_QUEUE",
            DetailedState::ComputingPredictedSchedule => "COMPUTING_PREDICTED_SCHEDULE",
            DetailedState::QueueingTarget => "QUEUEING_TARGET",
            DetailedState::WaitingNextTargetTimer => "WAITING_NEXT_TARGET_TIMER",
        };
        f.write_str(name)
    }
}

/// Current unix time in seconds.
pub fn now_secs() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
