use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

/// Target production mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum Mode {
    /// One target at a time, no look-ahead.
    Simple,
    /// Look-ahead generation with snapshot/rollback.
    Advance,
    /// No production loop; telemetry and reconciliation only.
    Dry,
}

/// Startup reconstruction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum StartupType {
    /// Reuse an existing driver instance if one exists, otherwise warm.
    Hot,
    /// Fresh driver, replay history, then restore a snapshot if configured.
    Warm,
    /// Fresh driver, replay history only.
    Cold,
}

/// Scheduling algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum DriverType {
    Sequential,
    Mock,
}

/// Execution queue backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum QueueType {
    Sim,
    Mock,
}

/// Snapshot store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum SnapshotStoreType {
    Memory,
    File,
    Noop,
}

/// Policy for a target whose executable item failed or was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum FailedTargetPolicy {
    /// Discard the target after undoing its speculative registration.
    Drop,
    /// Push the target back to the front of the internal queue.
    Resubmit,
}

/// Base configuration for the app.
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(name = "targetsmith")]
pub struct BaseConfig {
    /// Target production mode.
    #[arg(long, value_enum, default_value = "advance")]
    pub mode: Mode,

    /// Scheduling algorithm to drive.
    #[arg(long, value_enum, default_value = "sequential")]
    pub driver_type: DriverType,

    /// Execution queue backend.
    #[arg(long, value_enum, default_value = "sim")]
    pub queue_type: QueueType,

    /// Snapshot store backend.
    #[arg(long, value_enum, default_value = "memory")]
    pub snapshot_store_type: SnapshotStoreType,

    /// Directory for the file snapshot store.
    #[arg(long, default_value = "./snapshots")]
    pub snapshot_store_path: String,

    /// Startup reconstruction strategy.
    #[arg(long, value_enum, default_value = "hot")]
    pub startup_type: StartupType,

    /// Observation-record source replayed on cold/warm start (empty = none).
    #[arg(long, default_value = "")]
    pub startup_database: String,

    /// Snapshot URI restored on warm start (overrides the replayed history).
    #[arg(long)]
    pub snapshot_uri: Option<String>,

    /// Number of targets to generate ahead per cycle.
    #[arg(long, default_value_t = 2)]
    pub n_targets: usize,

    /// Window for the predicted schedule and the no-target horizon, in hours.
    #[arg(long, default_value_t = 2.0)]
    pub predicted_scheduler_window: f64,

    /// Sleep between production loop cycles, in seconds.
    #[arg(long, default_value_t = 1.0)]
    pub loop_sleep_time: f64,

    /// Timeout for driver and execution queue calls, in seconds.
    #[arg(long, default_value_t = 60.0)]
    pub cmd_timeout: f64,

    /// Maximum number of in-flight executable items.
    #[arg(long, default_value_t = 100)]
    pub max_scripts: usize,

    /// Submission retries per item before the cycle is rolled back.
    #[arg(long, default_value_t = 2)]
    pub max_submission_retries: u32,

    /// Simulated-time step used when estimating the next target, in seconds.
    #[arg(long, default_value_t = 30.0)]
    pub time_delta_no_target: f64,

    /// Maximum allowed gap before the next target, in seconds.
    /// Defaults to the predicted scheduler window.
    #[arg(long)]
    pub max_target_gap: Option<f64>,

    /// What to do with a target whose execution failed.
    #[arg(long, value_enum, default_value = "drop")]
    pub failed_target_policy: FailedTargetPolicy,

    /// Let already-submitted items run to completion when the loop is
    /// cancelled mid-batch, instead of rolling the cycle back.
    #[arg(long, default_value_t = false)]
    pub drain_on_cancel: bool,

    /// Heartbeat/telemetry publication interval, in seconds.
    #[arg(long, default_value_t = 1.0)]
    pub heartbeat_interval: f64,
}

impl BaseConfig {
    /// Horizon for the no-target estimator, in seconds.
    pub fn horizon_secs(&self) -> f64 {
        self.predicted_scheduler_window * 3600.0
    }

    /// Effective maximum allowed gap before the next target, in seconds.
    pub fn max_target_gap_secs(&self) -> f64 {
        self.max_target_gap.unwrap_or_else(|| self.horizon_secs())
    }
}

impl Default for BaseConfig {
    fn default() -> Self {
        BaseConfig {
            mode: Mode::Advance,
            driver_type: DriverType::Sequential,
            queue_type: QueueType::Sim,
            snapshot_store_type: SnapshotStoreType::Memory,
            snapshot_store_path: "./snapshots".to_string(),
            startup_type: StartupType::Hot,
            startup_database: String::new(),
            snapshot_uri: None,
            n_targets: 2,
            predicted_scheduler_window: 2.0,
            loop_sleep_time: 1.0,
            cmd_timeout: 60.0,
            max_scripts: 100,
            max_submission_retries: 2,
            time_delta_no_target: 30.0,
            max_target_gap: None,
            failed_target_policy: FailedTargetPolicy::Drop,
            drain_on_cancel: false,
            heartbeat_interval: 1.0,
        }
    }
}
