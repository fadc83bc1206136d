//! Async task orchestration with tokio::spawn - production loops, the
//! reconciliation listener and the heartbeat task.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use kanal::AsyncReceiver;
use tokio::sync::watch;
use tracing::{debug, error, info, span, warn, Level};

use super::core::TargetSmith;
use crate::config::{BaseConfig, FailedTargetPolicy, Mode};
use crate::driver::DriverVariant;
use crate::error::{self, SchedulerError};
use crate::events::{EventBus, SchedulerEvent};
use crate::execution::ExecutionQueueVariant;
use crate::projection::{Conditions, ObservatoryProjection, ObservatoryState};
use crate::snapshot::{Snapshot, SnapshotManager};
use crate::state::DetailedStateMachine;
use crate::tracker::ExecutionTracker;
use crate::traits::{Driver, ExecutionQueue};
use crate::types::{
    now_secs, DetailedState, ExecutableItem, ItemEvent, ItemState, ScheduledTargetsInfo, Target,
};

/// Outcome of one advance-loop cycle.
enum CycleOutcome {
    /// Work was done (or there was nothing to do); sleep and go again.
    Proceed,
    /// No target is available right now; wait this many seconds.
    Wait(f64),
}

impl TargetSmith {
    /// Run the application: resume the production loop and block until a
    /// shutdown signal arrives.
    pub async fn run(self) -> Result<()> {
        let span = span!(Level::INFO, "app_run");
        let _enter = span.enter();

        info!(
            "Starting TargetSmith: mode={:?}, driver={:?}, queue={:?}",
            self.config.mode, self.config.driver_type, self.config.queue_type
        );

        self.resume().await?;

        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received.");
        self.stop(!self.config.drain_on_cancel).await?;
        Ok(())
    }

    /// Spawn the heartbeat task and the production loop for the configured
    /// mode. The reconciliation listener is spawned when the queue opens.
    pub(super) fn spawn_tasks(&self) {
        self.spawn_heartbeat();

        match self.config.mode {
            Mode::Dry => {
                info!("Dry mode: no production loop.");
            }
            Mode::Simple | Mode::Advance => {
                let production = ProductionLoop {
                    config: self.config.clone(),
                    state: Arc::clone(&self.state),
                    tracker: Arc::clone(&self.tracker),
                    events: self.events.clone(),
                    driver: Arc::clone(&self.driver),
                    queue: Arc::clone(&self.queue),
                    snapshots: Arc::clone(&self.snapshots),
                    observatory: Arc::clone(&self.observatory),
                    cancel: self.cancel.subscribe(),
                    shutdown: self.cancel.clone(),
                    retry_targets: VecDeque::new(),
                };
                let mode = self.config.mode;
                let handle = tokio::spawn(async move {
                    let span = span!(Level::INFO, "production_loop");
                    let _enter = span.enter();
                    match mode {
                        Mode::Advance => production.run_advance().await,
                        _ => production.run_simple().await,
                    }
                });
                self.register_task(handle);
            }
        }
    }

    /// Consume item notifications from the execution queue.
    ///
    /// The listener only writes to the tracker and publishes status events;
    /// every driver interaction happens in the production loop.
    pub(super) fn spawn_reconciliation_listener(&self, rx: AsyncReceiver<ItemEvent>) {
        let tracker = Arc::clone(&self.tracker);
        let events = self.events.clone();
        let mut cancel = self.cancel.subscribe();

        let handle = tokio::spawn(async move {
            let span = span!(Level::INFO, "reconciliation_listener");
            let _enter = span.enter();
            info!("Reconciliation listener started.");

            loop {
                let event = tokio::select! {
                    received = rx.recv() => match received {
                        Ok(event) => event,
                        Err(_) => break,
                    },
                    _ = cancel.changed() => {
                        if *cancel.borrow() {
                            break;
                        }
                        continue;
                    }
                };
                if let Some(target_id) = tracker.apply_event(&event) {
                    events.publish(SchedulerEvent::ItemStatus {
                        item_id: event.item_id,
                        target_id,
                        state: event.state,
                    });
                }
            }

            info!("Reconciliation listener finished.");
        });
        self.register_task(handle);
    }

    /// Periodically refresh the observatory clock, poll the queue and emit a
    /// heartbeat.
    fn spawn_heartbeat(&self) {
        let queue = Arc::clone(&self.queue);
        let observatory = Arc::clone(&self.observatory);
        let events = self.events.clone();
        let interval = Duration::from_secs_f64(self.config.heartbeat_interval);
        let mut cancel = self.cancel.subscribe();

        let handle = tokio::spawn(async move {
            let span = span!(Level::INFO, "heartbeat_task");
            let _enter = span.enter();

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancel.changed() => {
                        if *cancel.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let time = now_secs();
                match observatory.lock() {
                    Ok(mut state) => state.time = time,
                    Err(e) => {
                        error!("Observatory state is unreadable: {e}");
                        events.publish(SchedulerEvent::Fault {
                            code: error::OBSERVATORY_STATE_UPDATE,
                            reason: format!("observatory state is unreadable: {e}"),
                        });
                        break;
                    }
                }

                let status = {
                    let queue = queue.lock().await;
                    queue.status().await
                };
                match status {
                    Ok(status) => {
                        events.publish(SchedulerEvent::Heartbeat {
                            time,
                            tracking: status.running,
                        });
                    }
                    Err(e) => {
                        error!("Execution queue unreachable: {e:#}");
                        events.publish(SchedulerEvent::Fault {
                            code: error::NO_QUEUE,
                            reason: format!("execution queue unreachable: {e:#}"),
                        });
                    }
                }
            }
        });
        self.register_task(handle);
    }
}

/// The target production loop: all per-cycle business logic lives here, on a
/// bundle of handles cloned out of [`TargetSmith`] when the loop is spawned.
struct ProductionLoop {
    config: BaseConfig,
    state: Arc<DetailedStateMachine>,
    tracker: Arc<ExecutionTracker>,
    events: EventBus,
    driver: Arc<tokio::sync::Mutex<Option<DriverVariant>>>,
    queue: Arc<tokio::sync::Mutex<ExecutionQueueVariant>>,
    snapshots: Arc<tokio::sync::Mutex<SnapshotManager>>,
    observatory: Arc<std::sync::Mutex<ObservatoryState>>,
    cancel: watch::Receiver<bool>,
    /// Cancellation flag shared with the other background tasks; a fatal
    /// fault raises it so the whole task set goes down as a unit.
    shutdown: watch::Sender<bool>,
    /// Failed targets waiting for resubmission, front first.
    retry_targets: VecDeque<Target>,
}

impl ProductionLoop {
    async fn run_advance(mut self) {
        info!(
            "Advance loop started: n_targets={}, horizon={:.0}s.",
            self.config.n_targets,
            self.config.horizon_secs()
        );

        loop {
            if *self.cancel.borrow() {
                break;
            }

            match self.advance_cycle().await {
                Ok(CycleOutcome::Proceed) => {}
                Ok(CycleOutcome::Wait(wait_secs)) => {
                    self.wait_for_next_target(wait_secs).await;
                    continue;
                }
                Err(e) if e.is_fatal() => {
                    self.fault(e).await;
                    return;
                }
                Err(e) => {
                    warn!("Advance cycle error (retrying next cycle): {e}");
                }
            }

            self.sleep_between_cycles().await;
        }
        info!("Advance loop finished.");
    }

    async fn run_simple(mut self) {
        info!("Simple loop started.");

        loop {
            if *self.cancel.borrow() {
                break;
            }

            match self.simple_cycle().await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    self.fault(e).await;
                    return;
                }
                Err(e) => {
                    warn!("Simple cycle error (retrying next cycle): {e}");
                }
            }

            self.sleep_between_cycles().await;
        }
        info!("Simple loop finished.");
    }

    /// One look-ahead cycle: reconcile outcomes, then generate and commit a
    /// batch of targets when the look-ahead depth has room.
    async fn advance_cycle(&mut self) -> Result<CycleOutcome, SchedulerError> {
        self.reconcile(true).await?;

        if self.tracker.in_flight() >= self.config.n_targets {
            return Ok(CycleOutcome::Proceed);
        }

        match self.generate_target_queue().await? {
            Generation::Batch { rollback, targets } => {
                self.submit_batch(rollback, targets).await?;
                Ok(CycleOutcome::Proceed)
            }
            Generation::Wait(wait_secs) => Ok(CycleOutcome::Wait(wait_secs)),
            Generation::Nothing => Ok(CycleOutcome::Proceed),
        }
    }

    /// One no-look-ahead cycle: at most one target in flight, registered only
    /// from its actual outcome.
    async fn simple_cycle(&mut self) -> Result<(), SchedulerError> {
        self.reconcile(false).await?;

        if self.tracker.in_flight() > 0 {
            return Ok(());
        }

        let conditions = {
            let state = self.observatory.lock().unwrap_or_else(|e| e.into_inner());
            Conditions {
                time: state.time,
                position: state.position,
            }
        };

        let selected = {
            let mut slot = self.driver.lock().await;
            let driver = slot.as_mut().ok_or(SchedulerError::NotRunning)?;
            select_with_retry(driver, &conditions, self.grace()).await?
        };

        let Some(targets) = selected else {
            self.events
                .publish(SchedulerEvent::TimeToNextTarget(self.config.time_delta_no_target));
            return Ok(());
        };
        let Some(target) = targets.into_iter().next() else {
            return Ok(());
        };

        let _guard = self.state.enter(DetailedState::QueueingTarget).await?;
        self.publish_state(DetailedState::QueueingTarget);
        let item = self.track_and_submit(target).await?;
        debug!(
            "Queued target {} as item {}.",
            item.target.target_id, item.item_id
        );
        drop(_guard);
        self.publish_state(DetailedState::Running);
        Ok(())
    }

    /// Generate up to `n_targets` targets by speculating forward from the
    /// current observatory state.
    ///
    /// The returned snapshot was taken before any speculative registration;
    /// restoring it undoes the whole cycle.
    async fn generate_target_queue(&mut self) -> Result<Generation, SchedulerError> {
        let guard = self.state.enter(DetailedState::GeneratingTargetQueue).await?;
        self.publish_state(DetailedState::GeneratingTargetQueue);

        let mut slot = self.driver.lock().await;
        let driver = slot.as_mut().ok_or(SchedulerError::NotRunning)?;
        let mut snapshots = self.snapshots.lock().await;

        let rollback = snapshots
            .capture(driver)
            .await
            .map_err(|source| SchedulerError::DriverCall {
                call: "save_state",
                source,
            })?;
        if let Some(uri) = &rollback.uri {
            self.events
                .publish(SchedulerEvent::SnapshotSaved { uri: uri.clone() });
        }

        // Project past the work already in flight so new speculation starts
        // where the booked schedule ends.
        let mut projection = {
            let state = self.observatory.lock().unwrap_or_else(|e| e.into_inner());
            ObservatoryProjection::from_state(&state)
        };
        for item in self.tracker.in_flight_items() {
            projection.observe(&item.target);
        }

        let mut produced: Vec<Target> = Vec::new();

        // Failed targets queued for resubmission go first.
        while produced.len() < self.config.n_targets {
            let Some(target) = self.retry_targets.pop_front() else {
                break;
            };
            let observation = projection.observe(&target);
            register_with_retry(driver, &observation, self.grace()).await?;
            produced.push(target);
        }

        while produced.len() < self.config.n_targets {
            match select_with_retry(driver, &projection.conditions(), self.grace()).await? {
                Some(targets) if !targets.is_empty() => {
                    for target in targets {
                        let observation = projection.observe(&target);
                        register_with_retry(driver, &observation, self.grace()).await?;
                        produced.push(target);
                    }
                }
                _ => break,
            }
        }

        if produced.is_empty() {
            if self.tracker.in_flight() > 0 {
                // Booked work remains; nothing new is not a problem yet.
                drop(guard);
                self.publish_state(DetailedState::Running);
                return Ok(Generation::Nothing);
            }

            let wait_secs =
                estimate_wait_for_next_target(&self.config, driver, projection, &snapshots, &rollback)
                    .await?;
            self.events
                .publish(SchedulerEvent::TimeToNextTarget(wait_secs));
            drop(guard);
            self.publish_state(DetailedState::Running);
            return Ok(Generation::Wait(wait_secs));
        }

        self.events.publish(SchedulerEvent::TargetQueue(
            produced.iter().map(|t| t.target_id).collect(),
        ));
        info!("Generated {} targets.", produced.len());
        drop(guard);
        self.publish_state(DetailedState::Running);
        Ok(Generation::Batch {
            rollback,
            targets: produced,
        })
    }

    /// Commit a generated batch to the execution queue.
    ///
    /// Any failure rolls the whole cycle back: submitted items are withdrawn
    /// and the driver is restored to the pre-generation snapshot.
    async fn submit_batch(
        &mut self,
        rollback: Snapshot,
        targets: Vec<Target>,
    ) -> Result<(), SchedulerError> {
        let guard = self.state.enter(DetailedState::QueueingTarget).await?;
        self.publish_state(DetailedState::QueueingTarget);

        let mut submitted: Vec<ExecutableItem> = Vec::new();
        let mut remaining: VecDeque<Target> = targets.into();
        let mut failure: Option<SchedulerError> = None;
        let mut cancelled = false;

        while let Some(target) = remaining.pop_front() {
            if *self.cancel.borrow() {
                remaining.push_front(target);
                cancelled = true;
                break;
            }
            match self.track_and_submit(target).await {
                Ok(item) => submitted.push(item),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let result = if cancelled && !self.config.drain_on_cancel {
            info!("Cancelled mid-batch, rolling the cycle back.");
            self.rollback_cycle(&rollback, &submitted).await
        } else if cancelled {
            // Draining: keep what made it onto the queue, but unwind the
            // speculative registrations of the targets that did not.
            info!(
                remaining = remaining.len(),
                "Cancelled mid-batch, draining submitted items."
            );
            self.undo_unsubmitted(&remaining).await
        } else {
            match failure {
                None => Ok(()),
                Some(e) => {
                    warn!("Batch submission failed, rolling the cycle back: {e}");
                    if let SchedulerError::Submission { .. } = &e {
                        self.events.publish(SchedulerEvent::Fault {
                            code: error::PUT_ON_QUEUE,
                            reason: e.to_string(),
                        });
                    }
                    self.rollback_cycle(&rollback, &submitted).await.and(match e {
                        // Capacity pressure resolves itself; try again next cycle.
                        SchedulerError::TrackerFull { .. } => Ok(()),
                        other => Err(other),
                    })
                }
            }
        };

        drop(guard);
        self.publish_state(DetailedState::Running);
        result
    }

    /// Track one target and submit it, retrying the submission.
    async fn track_and_submit(&self, target: Target) -> Result<ExecutableItem, SchedulerError> {
        let mut item = self.tracker.track(target)?;
        let queue = self.queue.lock().await;

        let mut attempts = 0;
        loop {
            attempts += 1;
            match queue.submit(&item).await {
                Ok(queue_index) => {
                    self.tracker.mark_queued(item.item_id, queue_index);
                    item.queue_index = Some(queue_index);
                    item.state = ItemState::Queued;
                    self.events.publish(SchedulerEvent::ItemStatus {
                        item_id: item.item_id,
                        target_id: item.target.target_id,
                        state: ItemState::Queued,
                    });
                    return Ok(item);
                }
                Err(e) if attempts <= self.config.max_submission_retries => {
                    warn!(
                        "Submission of item {} failed (attempt {attempts}): {e:#}",
                        item.item_id
                    );
                }
                Err(source) => {
                    self.tracker.discard(item.item_id);
                    return Err(SchedulerError::Submission {
                        item_id: item.item_id,
                        attempts,
                        source,
                    });
                }
            }
        }
    }

    /// Withdraw everything this cycle submitted and restore the driver.
    ///
    /// A failed restore is fatal: the driver would keep speculative state for
    /// targets that will never execute.
    async fn rollback_cycle(
        &mut self,
        rollback: &Snapshot,
        submitted: &[ExecutableItem],
    ) -> Result<(), SchedulerError> {
        {
            let queue = self.queue.lock().await;
            for item in submitted {
                if let Some(queue_index) = item.queue_index {
                    if let Err(e) = queue.cancel(queue_index).await {
                        warn!("Failed to withdraw queue item {queue_index}: {e:#}");
                    }
                }
                self.tracker.discard(item.item_id);
            }
        }

        let mut slot = self.driver.lock().await;
        let snapshots = self.snapshots.lock().await;
        match slot.as_mut() {
            Some(driver) => snapshots.restore(driver, rollback),
            None => Err(SchedulerError::NotRunning),
        }
    }

    /// Unwind the speculative registrations of targets a cancelled batch
    /// never submitted, leaving the submitted ones in place.
    async fn undo_unsubmitted(&self, remaining: &VecDeque<Target>) -> Result<(), SchedulerError> {
        if remaining.is_empty() {
            return Ok(());
        }
        let mut slot = self.driver.lock().await;
        let driver = slot.as_mut().ok_or(SchedulerError::NotRunning)?;
        // Registrations stack; unwind newest first.
        for target in remaining.iter().rev() {
            undo_with_retry(driver, target.target_id, self.grace()).await?;
        }
        Ok(())
    }

    /// How long a single driver call may take before it counts as failed.
    fn grace(&self) -> Duration {
        Duration::from_secs_f64(self.config.cmd_timeout)
    }

    /// Apply terminal outcomes drained from the tracker to the driver.
    ///
    /// `speculative` says whether targets were registered speculatively at
    /// generation time (advance mode) and so need an undo on failure.
    async fn reconcile(&mut self, speculative: bool) -> Result<(), SchedulerError> {
        let drained = self.tracker.drain_terminal();
        if drained.is_empty() {
            return Ok(());
        }

        let _gate = self.state.hold().await?;
        let mut slot = self.driver.lock().await;
        let driver = slot.as_mut().ok_or(SchedulerError::NotRunning)?;
        let mut info = ScheduledTargetsInfo::default();

        for item in drained {
            let target_id = item.target.target_id;
            match item.state {
                ItemState::Done => {
                    let Some(mut observation) = item.completion else {
                        // Nothing to register without a payload; unwind the
                        // item like a failure.
                        warn!(
                            "Item {} completed without an outcome payload; treating it as failed.",
                            item.item_id
                        );
                        if speculative {
                            undo_with_retry(driver, target_id, self.grace()).await?;
                        }
                        if self.config.failed_target_policy == FailedTargetPolicy::Resubmit {
                            self.retry_targets.push_front(item.target);
                        }
                        info.failed.push(target_id);
                        continue;
                    };
                    observation.speculative = false;
                    register_with_retry(driver, &observation, self.grace()).await?;
                    {
                        let mut state =
                            self.observatory.lock().unwrap_or_else(|e| e.into_inner());
                        state.apply(&observation);
                    }
                    info.observed.push(target_id);
                }
                ItemState::Failed | ItemState::Aborted => {
                    if speculative {
                        undo_with_retry(driver, target_id, self.grace()).await?;
                    }
                    if self.config.failed_target_policy == FailedTargetPolicy::Resubmit {
                        self.retry_targets.push_front(item.target);
                    }
                    info.failed.push(target_id);
                }
                _ => {
                    warn!(
                        "Item {} drained in non-terminal state {:?}; ignoring.",
                        item.item_id, item.state
                    );
                }
            }
        }

        info.scheduled = self.tracker.in_flight();
        debug!(
            "Reconciled outcomes: {} observed, {} failed, {} still scheduled.",
            info.observed.len(),
            info.failed.len(),
            info.scheduled
        );
        self.events
            .publish(SchedulerEvent::ScheduledTargetsSummary(info));
        Ok(())
    }

    /// Hold the waiting sub-state until the estimated wait elapses or the
    /// loop is cancelled.
    async fn wait_for_next_target(&mut self, wait_secs: f64) {
        let guard = match self.state.enter(DetailedState::WaitingNextTargetTimer).await {
            Ok(guard) => guard,
            Err(e) => {
                warn!("Could not enter wait state: {e}");
                return;
            }
        };
        self.publish_state(DetailedState::WaitingNextTargetTimer);
        info!("No target available; waiting {wait_secs:.0}s for the next one.");

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs_f64(wait_secs)) => {}
            _ = self.cancel.changed() => {}
        }

        drop(guard);
        self.publish_state(DetailedState::Running);
    }

    async fn sleep_between_cycles(&mut self) {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs_f64(self.config.loop_sleep_time)) => {}
            _ = self.cancel.changed() => {}
        }
    }

    /// Publish a fatal fault and take the system down to idle.
    ///
    /// The whole task set goes down as a unit: the shared cancellation flag
    /// stops the heartbeat and reconciliation listener, and the queue is
    /// closed so a later `resume` reopens it cleanly.
    async fn fault(&self, e: SchedulerError) {
        error!("Fatal production loop error: {e}");
        let _ = self.shutdown.send(true);
        {
            let mut queue = self.queue.lock().await;
            if let Err(e) = queue.close().await {
                warn!("Failed to close execution queue after fault: {e:#}.");
            }
        }

        let code = match e.fault_code() {
            error::ADVANCE_LOOP_ERROR if self.config.mode == Mode::Simple => {
                error::SIMPLE_LOOP_ERROR
            }
            code => code,
        };
        self.events.publish(SchedulerEvent::Fault {
            code,
            reason: e.to_string(),
        });
        if let Err(e) = self.state.deactivate() {
            warn!("Could not deactivate after fault: {e}");
        } else {
            self.publish_state(DetailedState::Idle);
        }
    }

    fn publish_state(&self, state: DetailedState) {
        self.events
            .publish(SchedulerEvent::DetailedStateChanged(state));
    }
}

enum Generation {
    /// A batch ready for submission, with its rollback point.
    Batch {
        rollback: Snapshot,
        targets: Vec<Target>,
    },
    /// Nothing selectable until roughly this many seconds from now.
    Wait(f64),
    /// Nothing new, but booked work remains in flight.
    Nothing,
}

/// Probe forward in simulated time for the next selectable target.
///
/// The probe mutates the driver; it is always restored to `rollback` before
/// returning. Exceeding the horizon or the configured gap is fatal.
async fn estimate_wait_for_next_target(
    config: &BaseConfig,
    driver: &mut DriverVariant,
    mut projection: ObservatoryProjection,
    snapshots: &SnapshotManager,
    rollback: &Snapshot,
) -> Result<f64, SchedulerError> {
    let horizon_secs = config.horizon_secs();
    let grace = Duration::from_secs_f64(config.cmd_timeout);
    let mut elapsed = 0.0;
    let mut found = false;

    while elapsed < horizon_secs {
        projection.step(config.time_delta_no_target);
        elapsed += config.time_delta_no_target;

        match select_with_retry(driver, &projection.conditions(), grace).await {
            Ok(Some(targets)) if !targets.is_empty() => {
                found = true;
                break;
            }
            Ok(_) => {}
            Err(e) => {
                // A persistent select failure is a driver fault, not an
                // empty horizon.
                snapshots.restore(driver, rollback)?;
                return Err(e);
            }
        }
    }

    snapshots.restore(driver, rollback)?;

    if !found {
        return Err(SchedulerError::NoTargetWithinHorizon { horizon_secs });
    }
    if elapsed > config.max_target_gap_secs() {
        return Err(SchedulerError::GapExceeded {
            wait_secs: elapsed,
            max_gap_secs: config.max_target_gap_secs(),
        });
    }
    Ok(elapsed)
}

/// Retry a failed select once before treating it as fatal.
async fn select_with_retry(
    driver: &mut DriverVariant,
    conditions: &Conditions,
    grace: Duration,
) -> Result<Option<Vec<Target>>, SchedulerError> {
    match tokio::time::timeout(grace, driver.select_next_targets(conditions)).await {
        Ok(Ok(selection)) => return Ok(selection),
        Ok(Err(e)) => warn!("select_next_targets failed, retrying once: {e:#}"),
        Err(_) => warn!("select_next_targets timed out after {grace:?}, retrying once."),
    }
    match tokio::time::timeout(grace, driver.select_next_targets(conditions)).await {
        Ok(result) => result.map_err(|source| SchedulerError::DriverCall {
            call: "select_next_targets",
            source,
        }),
        Err(_) => Err(SchedulerError::DriverCall {
            call: "select_next_targets",
            source: anyhow::anyhow!("timed out after {grace:?}"),
        }),
    }
}

/// Retry a failed registration once before treating it as fatal.
async fn register_with_retry(
    driver: &mut DriverVariant,
    observation: &crate::types::Observation,
    grace: Duration,
) -> Result<(), SchedulerError> {
    match tokio::time::timeout(grace, driver.register_observed_target(observation)).await {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => warn!("register_observed_target failed, retrying once: {e:#}"),
        Err(_) => warn!("register_observed_target timed out after {grace:?}, retrying once."),
    }
    match tokio::time::timeout(grace, driver.register_observed_target(observation)).await {
        Ok(result) => result.map_err(|source| SchedulerError::DriverCall {
            call: "register_observed_target",
            source,
        }),
        Err(_) => Err(SchedulerError::DriverCall {
            call: "register_observed_target",
            source: anyhow::anyhow!("timed out after {grace:?}"),
        }),
    }
}

/// Retry a failed undo once before treating it as fatal.
async fn undo_with_retry(
    driver: &mut DriverVariant,
    target_id: crate::types::TargetId,
    grace: Duration,
) -> Result<(), SchedulerError> {
    match tokio::time::timeout(grace, driver.undo_observed_target(target_id)).await {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => warn!("undo_observed_target failed, retrying once: {e:#}"),
        Err(_) => warn!("undo_observed_target timed out after {grace:?}, retrying once."),
    }
    match tokio::time::timeout(grace, driver.undo_observed_target(target_id)).await {
        Ok(result) => result.map_err(|source| SchedulerError::DriverCall {
            call: "undo_observed_target",
            source,
        }),
        Err(_) => Err(SchedulerError::DriverCall {
            call: "undo_observed_target",
            source: anyhow::anyhow!("timed out after {grace:?}"),
        }),
    }
}
