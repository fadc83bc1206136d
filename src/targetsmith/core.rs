//! Core TargetSmith struct, initialization and commands - no loop logic.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{BaseConfig, Mode};
use crate::driver::DriverVariant;
use crate::error::SchedulerError;
use crate::events::{EventBus, SchedulerEvent};
use crate::execution::ExecutionQueueVariant;
use crate::projection::{ObservatoryProjection, ObservatoryState};
use crate::snapshot::SnapshotManager;
use crate::snapshot_store::SnapshotStoreVariant;
use crate::startup;
use crate::state::DetailedStateMachine;
use crate::tracker::ExecutionTracker;
use crate::traits::{Driver, ExecutionQueue, SnapshotStore};
use crate::types::{DetailedState, Target};

/// Main application orchestrator around the target production loop.
pub struct TargetSmith {
    /// Global/base configuration.
    pub config: BaseConfig,

    /// Detailed operating state and its mutual-exclusion gate.
    pub state: Arc<DetailedStateMachine>,

    /// In-flight executable item bookkeeping.
    pub tracker: Arc<ExecutionTracker>,

    /// Outbound notifications.
    pub events: EventBus,

    /// Scheduling algorithm. `None` until startup reconstruction succeeds;
    /// retained across standby for hot re-entry.
    pub driver: Arc<tokio::sync::Mutex<Option<DriverVariant>>>,

    /// Execution queue backend.
    pub queue: Arc<tokio::sync::Mutex<ExecutionQueueVariant>>,

    /// Snapshot capture/restore around speculative work.
    pub snapshots: Arc<tokio::sync::Mutex<SnapshotManager>>,

    /// Last known observatory state, advanced by the heartbeat task.
    pub observatory: Arc<std::sync::Mutex<ObservatoryState>>,

    /// Handles of all spawned tasks, aborted on standby.
    pub tasks: Arc<std::sync::Mutex<Vec<JoinHandle<()>>>>,

    /// Cooperative cancellation flag for the production loop.
    pub cancel: watch::Sender<bool>,
}

impl TargetSmith {
    /// Build all components from configuration. No driver exists yet and no
    /// task is running; `resume` brings the system up.
    pub fn initialize(config: BaseConfig) -> Result<Self> {
        let store = SnapshotStoreVariant::from_config(&config);
        info!("Snapshot store backend: {}.", store.name());
        let upload = !matches!(store, SnapshotStoreVariant::Noop(_));
        let snapshots = SnapshotManager::new(store, upload);

        let queue = ExecutionQueueVariant::new(config.queue_type);
        info!("Execution queue backend: {}.", queue.name());

        let (cancel, _) = watch::channel(false);
        Ok(Self {
            tracker: Arc::new(ExecutionTracker::new(config.max_scripts)),
            state: Arc::new(DetailedStateMachine::new()),
            events: EventBus::default(),
            driver: Arc::new(tokio::sync::Mutex::new(None)),
            queue: Arc::new(tokio::sync::Mutex::new(queue)),
            snapshots: Arc::new(tokio::sync::Mutex::new(snapshots)),
            observatory: Arc::new(std::sync::Mutex::new(ObservatoryState::default())),
            tasks: Arc::new(std::sync::Mutex::new(Vec::new())),
            cancel,
            config,
        })
    }

    /// Reconstruct the driver per the configured startup type and start the
    /// production loop, the reconciliation listener and the heartbeat task.
    pub async fn resume(&self) -> Result<(), SchedulerError> {
        if self.state.current() != DetailedState::Idle {
            return Err(SchedulerError::AlreadyRunning);
        }

        // A fatal fault only cancels its task set; reap the finished handles
        // before spawning a fresh one.
        self.shutdown_tasks().await;

        let retained = self.driver.lock().await.take();
        let snapshots = self.snapshots.lock().await;
        let (driver, topology) =
            startup::reconstruct_driver(&self.config, &snapshots, retained).await?;
        drop(snapshots);
        *self.driver.lock().await = Some(driver);

        self.events.publish(SchedulerEvent::SurveyTopology(topology));
        let _ = self.cancel.send(false);

        self.open_queue()
            .await
            .map_err(|source| SchedulerError::Startup {
                startup_type: self.config.startup_type,
                source,
            })?;

        self.state.activate()?;
        self.events
            .publish(SchedulerEvent::DetailedStateChanged(DetailedState::Running));
        self.spawn_tasks();
        info!("Production loop resumed in {:?} mode.", self.config.mode);
        Ok(())
    }

    /// Stop the production loop.
    ///
    /// With `abort` set, in-flight items are withdrawn from the execution
    /// queue and discarded without reconciliation; otherwise they run to
    /// completion and a later `resume` reconciles them.
    pub async fn stop(&self, abort: bool) -> Result<(), SchedulerError> {
        if self.state.current() == DetailedState::Idle {
            return Err(SchedulerError::NotRunning);
        }
        let _ = self.cancel.send(true);

        // Awaiting the aborted tasks guarantees any sub-state guard they held
        // has been dropped before deactivation, and that the loop is no
        // longer mid-cycle when the abort cleanup walks the tracker.
        self.shutdown_tasks().await;

        if abort {
            let queue = self.queue.lock().await;
            let mut slot = self.driver.lock().await;
            for item in self.tracker.in_flight_items() {
                if let Some(queue_index) = item.queue_index {
                    if let Err(e) = queue.cancel(queue_index).await {
                        warn!("Failed to cancel queue item {queue_index}: {e:#}.");
                    }
                }
                // Advance mode registered the outcome speculatively at
                // generation time; an aborted item never happened.
                if self.config.mode == Mode::Advance {
                    if let Some(driver) = slot.as_mut() {
                        if let Err(e) =
                            driver.undo_observed_target(item.target.target_id).await
                        {
                            warn!(
                                "Failed to undo aborted target {}: {e:#}.",
                                item.target.target_id
                            );
                        }
                    }
                }
                self.tracker.discard(item.item_id);
            }
        }

        if self.state.current() != DetailedState::Idle {
            self.state.deactivate()?;
        }
        self.events
            .publish(SchedulerEvent::DetailedStateChanged(DetailedState::Idle));
        let mut queue = self.queue.lock().await;
        if let Err(e) = queue.close().await {
            warn!("Failed to close execution queue: {e:#}.");
        }
        info!("Production loop stopped (abort={abort}).");
        Ok(())
    }

    /// Replace the driver's internal state with a stored snapshot.
    ///
    /// Only valid while the production loop is idle; a restore under a live
    /// loop would race with speculative registration.
    pub async fn load(&self, uri: &str) -> Result<(), SchedulerError> {
        if self.state.current() != DetailedState::Idle {
            return Err(SchedulerError::AlreadyRunning);
        }

        let bytes = {
            let snapshots = self.snapshots.lock().await;
            snapshots
                .fetch(uri)
                .await
                .map_err(|source| SchedulerError::SnapshotRestore { source })?
        };

        let mut slot = self.driver.lock().await;
        let driver = slot.as_mut().ok_or(SchedulerError::NotRunning)?;
        driver
            .restore_state(&bytes)
            .map_err(|source| SchedulerError::SnapshotRestore { source })?;
        info!("Loaded driver state from {uri}.");
        Ok(())
    }

    /// Project the schedule over the configured window without committing
    /// anything: the driver is rolled back to its pre-computation state.
    pub async fn compute_predicted_schedule(&self) -> Result<Vec<Target>, SchedulerError> {
        let _guard = self
            .state
            .enter(DetailedState::ComputingPredictedSchedule)
            .await?;
        self.events.publish(SchedulerEvent::DetailedStateChanged(
            DetailedState::ComputingPredictedSchedule,
        ));

        let mut slot = self.driver.lock().await;
        let driver = slot.as_mut().ok_or(SchedulerError::NotRunning)?;
        let mut snapshots = self.snapshots.lock().await;
        let rollback = snapshots
            .capture_local(driver)
            .map_err(|source| SchedulerError::DriverCall {
                call: "save_state",
                source,
            })?;

        let observatory = *self.observatory.lock().unwrap_or_else(|e| e.into_inner());
        let mut projection = ObservatoryProjection::from_state(&observatory);
        let horizon_end = projection.conditions().time + self.config.horizon_secs();

        let mut predicted = Vec::new();
        let result = 'predict: loop {
            if projection.conditions().time >= horizon_end {
                break Ok(());
            }
            match driver.select_next_targets(&projection.conditions()).await {
                Ok(Some(targets)) if !targets.is_empty() => {
                    for target in targets {
                        let observation = projection.observe(&target);
                        if let Err(source) = driver.register_observed_target(&observation).await {
                            break 'predict Err(SchedulerError::DriverCall {
                                call: "register_observed_target",
                                source,
                            });
                        }
                        predicted.push(target);
                    }
                }
                Ok(_) => {
                    projection.step(self.config.time_delta_no_target);
                }
                Err(source) => {
                    break Err(SchedulerError::DriverCall {
                        call: "select_next_targets",
                        source,
                    })
                }
            }
        };

        // Prediction never commits; always roll the driver back.
        snapshots.restore(driver, &rollback)?;
        result?;

        self.events.publish(SchedulerEvent::PredictedSchedule(
            predicted.iter().map(|t| t.target_id).collect(),
        ));
        info!("Predicted schedule: {} targets.", predicted.len());
        Ok(predicted)
    }

    /// Hand the execution queue its notification channel and start it.
    async fn open_queue(&self) -> Result<()> {
        let (tx, rx) = kanal::unbounded_async();
        {
            let mut queue = self.queue.lock().await;
            queue.open(tx).await.context("opening execution queue")?;
        }
        self.spawn_reconciliation_listener(rx);
        Ok(())
    }

    /// Wind down all spawned tasks: give each a grace period to observe the
    /// cancellation flag, then abort whatever is left.
    pub(super) async fn shutdown_tasks(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.drain(..).collect()
        };
        for mut handle in handles {
            let grace = std::time::Duration::from_secs_f64(self.config.cmd_timeout);
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                handle.abort();
                let _ = handle.await;
            }
        }
    }

    pub(super) fn register_task(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }
}
