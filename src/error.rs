use thiserror::Error;

use crate::config::StartupType;
use crate::types::DetailedState;

/// Error code published when the execution queue is unreachable.
pub const NO_QUEUE: i64 = 300;
/// Error code published when a target could not be put on the queue.
pub const PUT_ON_QUEUE: i64 = 301;
/// Error code published on an unhandled simple-loop error.
pub const SIMPLE_LOOP_ERROR: i64 = 400;
/// Error code published on an unhandled advance-loop error.
pub const ADVANCE_LOOP_ERROR: i64 = 401;
/// Error code published when no target is available within the horizon.
pub const NO_TARGET_WITHIN_HORIZON: i64 = 402;
/// Error code published when the observatory state update fails.
pub const OBSERVATORY_STATE_UPDATE: i64 = 500;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid detailed state transition: {current} -> {requested}")]
    InvalidTransition {
        current: DetailedState,
        requested: DetailedState,
    },

    #[error("driver call `{call}` failed after retry: {source}")]
    DriverCall {
        call: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("no target available within the {horizon_secs:.0}s horizon")]
    NoTargetWithinHorizon { horizon_secs: f64 },

    #[error("time to next target ({wait_secs:.0}s) exceeds the maximum allowed gap ({max_gap_secs:.0}s)")]
    GapExceeded { wait_secs: f64, max_gap_secs: f64 },

    #[error("submission of item {item_id} failed after {attempts} attempts: {source}")]
    Submission {
        item_id: u64,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("snapshot restore failed, driver state is inconsistent: {source}")]
    SnapshotRestore {
        #[source]
        source: anyhow::Error,
    },

    #[error("execution tracker is at capacity ({capacity} items in flight)")]
    TrackerFull { capacity: usize },

    #[error("startup reconstruction ({startup_type:?}) failed: {source}")]
    Startup {
        startup_type: StartupType,
        #[source]
        source: anyhow::Error,
    },

    #[error("production loop is already running")]
    AlreadyRunning,

    #[error("production loop is not running")]
    NotRunning,
}

impl SchedulerError {
    /// Numeric fault code published alongside a fatal error.
    pub fn fault_code(&self) -> i64 {
        match self {
            SchedulerError::NoTargetWithinHorizon { .. } | SchedulerError::GapExceeded { .. } => {
                NO_TARGET_WITHIN_HORIZON
            }
            SchedulerError::Submission { .. } => PUT_ON_QUEUE,
            SchedulerError::SnapshotRestore { .. } | SchedulerError::DriverCall { .. } => {
                ADVANCE_LOOP_ERROR
            }
            _ => ADVANCE_LOOP_ERROR,
        }
    }

    /// Whether the error stops the production loop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::DriverCall { .. }
                | SchedulerError::NoTargetWithinHorizon { .. }
                | SchedulerError::GapExceeded { .. }
                | SchedulerError::SnapshotRestore { .. }
        )
    }
}
