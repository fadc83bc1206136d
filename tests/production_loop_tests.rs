//! End-to-end tests of the advance and simple production loops, driven by
//! the mock driver and mock execution queue.

use std::time::Duration;

use ::targetsmith::config::{
    BaseConfig, DriverType, FailedTargetPolicy, Mode, QueueType, StartupType,
};
use ::targetsmith::driver::{DriverVariant, MockDriver};
use ::targetsmith::error;
use ::targetsmith::events::SchedulerEvent;
use ::targetsmith::execution::{ExecutionQueueVariant, MockQueue};
use ::targetsmith::targetsmith::TargetSmith;
use ::targetsmith::traits::Driver;
use ::targetsmith::types::{
    now_secs, DetailedState, ItemEvent, ItemState, Observation, SkyPosition,
};
use anyhow::Result;
use tokio::sync::broadcast;
use tokio::time::timeout;

// ===== Test Helper Functions =====

fn fast_config() -> BaseConfig {
    BaseConfig {
        mode: Mode::Advance,
        driver_type: DriverType::Mock,
        queue_type: QueueType::Mock,
        startup_type: StartupType::Hot,
        n_targets: 2,
        loop_sleep_time: 0.02,
        heartbeat_interval: 0.05,
        time_delta_no_target: 0.05,
        // 3.6 second probe horizon keeps the no-target tests fast.
        predicted_scheduler_window: 0.001,
        ..BaseConfig::default()
    }
}

fn seeded_driver(target_ids: &[u64]) -> MockDriver {
    let mut driver = MockDriver::new();
    for id in target_ids {
        driver.push_target(MockDriver::make_target(*id, 30.0));
    }
    driver
}

/// Build the app with a pre-seeded driver and resume it.
async fn start_app(config: BaseConfig, driver: MockDriver) -> Result<(TargetSmith, MockQueue)> {
    let app = TargetSmith::initialize(config)?;
    *app.driver.lock().await = Some(DriverVariant::Mock(driver));
    app.resume().await?;

    let queue = {
        let queue = app.queue.lock().await;
        match &*queue {
            ExecutionQueueVariant::Mock(inner) => inner.clone(),
            _ => panic!("expected mock queue"),
        }
    };
    Ok((app, queue))
}

/// Poll until the condition holds, within two seconds.
async fn eventually<F: FnMut() -> bool>(mut condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

async fn observed_targets(app: &TargetSmith) -> Vec<Observation> {
    let slot = app.driver.lock().await;
    match slot.as_ref() {
        Some(DriverVariant::Mock(mock)) => mock.observed().to_vec(),
        _ => panic!("expected mock driver"),
    }
}

async fn driver_bytes(app: &TargetSmith) -> Vec<u8> {
    let slot = app.driver.lock().await;
    slot.as_ref().unwrap().save_state().unwrap()
}

/// Wait for the next fault event, skipping everything else.
async fn next_fault(events: &mut broadcast::Receiver<SchedulerEvent>) -> (i64, String) {
    loop {
        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for a fault event")
            .expect("event bus closed");
        if let SchedulerEvent::Fault { code, reason } = event {
            return (code, reason);
        }
    }
}

fn completion_for(target_id: u64) -> Observation {
    Observation {
        target_id,
        position: SkyPosition {
            ra_deg: target_id as f64,
            dec_deg: -20.0,
        },
        band: "r".to_string(),
        start_time: now_secs(),
        duration: 30.0,
        speculative: false,
    }
}

// ===== Advance Loop =====

#[tokio::test]
async fn advance_loop_generates_and_submits_batch() -> Result<()> {
    let (app, queue) = start_app(fast_config(), seeded_driver(&[1, 2])).await?;

    assert!(eventually(|| queue.submitted().len() == 2).await);

    // Both targets were registered speculatively at generation time.
    let observed = observed_targets(&app).await;
    assert_eq!(observed.len(), 2);
    assert!(observed.iter().all(|o| o.speculative));
    assert_eq!(app.tracker.in_flight(), 2);

    app.stop(false).await?;
    Ok(())
}

#[tokio::test]
async fn done_outcome_replaces_speculative_registration() -> Result<()> {
    let (app, queue) = start_app(fast_config(), seeded_driver(&[1, 2])).await?;
    assert!(eventually(|| queue.submitted().len() == 2).await);

    let item = queue.submitted()[0].clone();
    queue
        .report_done(item.item_id, completion_for(item.target.target_id))
        .await?;

    let tracker = app.tracker.clone();
    assert!(eventually(move || tracker.in_flight() == 1).await);
    let observed = observed_targets(&app).await;
    let entry = observed
        .iter()
        .find(|o| o.target_id == item.target.target_id)
        .expect("completed target stays registered");
    assert!(!entry.speculative);

    app.stop(false).await?;
    Ok(())
}

#[tokio::test]
async fn failed_item_is_undone_and_dropped() -> Result<()> {
    let (app, queue) = start_app(fast_config(), seeded_driver(&[1, 2])).await?;
    assert!(eventually(|| queue.submitted().len() == 2).await);

    let item = queue.submitted()[0].clone();
    queue.report_failed(item.item_id).await?;

    let tracker = app.tracker.clone();
    assert!(eventually(move || tracker.in_flight() == 1).await);

    // The failed target's speculative registration is gone; the other stays.
    let observed = observed_targets(&app).await;
    assert!(observed.iter().all(|o| o.target_id != item.target.target_id));
    assert_eq!(observed.len(), 1);

    app.stop(false).await?;
    Ok(())
}

#[tokio::test]
async fn done_without_payload_is_treated_as_failed() -> Result<()> {
    let (app, queue) = start_app(fast_config(), seeded_driver(&[1, 2])).await?;
    assert!(eventually(|| queue.submitted().len() == 2).await);

    let item = queue.submitted()[0].clone();
    queue
        .report(ItemEvent {
            item_id: item.item_id,
            state: ItemState::Done,
            completion: None,
        })
        .await?;

    let tracker = app.tracker.clone();
    assert!(eventually(move || tracker.in_flight() == 1).await);

    // With no payload there is nothing to register; the speculative
    // registration is unwound like a failure.
    let observed = observed_targets(&app).await;
    assert!(observed.iter().all(|o| o.target_id != item.target.target_id));
    assert_eq!(observed.len(), 1);

    app.stop(false).await?;
    Ok(())
}

#[tokio::test]
async fn failed_item_is_resubmitted_under_resubmit_policy() -> Result<()> {
    let mut config = fast_config();
    config.n_targets = 1;
    config.failed_target_policy = FailedTargetPolicy::Resubmit;
    let (app, queue) = start_app(config, seeded_driver(&[1])).await?;

    assert!(eventually(|| queue.submitted().len() == 1).await);
    let item = queue.submitted()[0].clone();
    queue.report_failed(item.item_id).await?;

    let probe = queue.clone();
    assert!(eventually(move || probe.submitted().len() == 2).await);
    let submitted = queue.submitted();
    assert_eq!(submitted[1].target.target_id, item.target.target_id);

    app.stop(false).await?;
    Ok(())
}

#[tokio::test]
async fn submission_failure_rolls_back_cycle_then_recovers() -> Result<()> {
    let app = TargetSmith::initialize(fast_config())?;
    *app.driver.lock().await = Some(DriverVariant::Mock(seeded_driver(&[1, 2])));
    let queue = {
        let queue = app.queue.lock().await;
        match &*queue {
            ExecutionQueueVariant::Mock(inner) => inner.clone(),
            _ => panic!("expected mock queue"),
        }
    };
    // First submission is accepted, the next ten fail: the first cycle rolls
    // back after the second item exhausts its retries, and a later cycle
    // succeeds once the queue recovers.
    queue.fail_submits_after(1, 10);

    let mut events = app.events.subscribe();
    app.resume().await?;

    // The failed cycle is surfaced, but it does not stop the loop.
    let (code, reason) = next_fault(&mut events).await;
    assert_eq!(code, error::PUT_ON_QUEUE, "unexpected fault: {reason}");
    assert!(eventually(|| queue.cancelled().len() == 1).await);

    // Eventually both targets make it onto the queue again.
    let probe = queue.clone();
    assert!(eventually(move || probe.submitted().len() >= 3).await);
    assert_eq!(app.tracker.in_flight(), 2);
    assert_ne!(app.state.current(), DetailedState::Idle);

    app.stop(false).await?;
    Ok(())
}

#[tokio::test]
async fn transient_select_failure_is_retried() -> Result<()> {
    let mut driver = seeded_driver(&[1]);
    driver.fail_selects = 1;
    let mut config = fast_config();
    config.n_targets = 1;

    let (app, queue) = start_app(config, driver).await?;
    assert!(eventually(|| queue.submitted().len() == 1).await);

    app.stop(false).await?;
    Ok(())
}

#[tokio::test]
async fn persistent_submission_failure_leaves_driver_unchanged() -> Result<()> {
    let mut config = fast_config();
    config.n_targets = 3;
    let driver = seeded_driver(&[1, 2, 3]);
    let before = driver.save_state()?;

    let app = TargetSmith::initialize(config)?;
    *app.driver.lock().await = Some(DriverVariant::Mock(driver));
    let queue = {
        let queue = app.queue.lock().await;
        match &*queue {
            ExecutionQueueVariant::Mock(inner) => inner.clone(),
            _ => panic!("expected mock queue"),
        }
    };
    // The first item is accepted, everything after it fails for good.
    queue.fail_submits_after(1, u32::MAX);

    app.resume().await?;
    assert!(eventually(|| queue.cancelled().len() == 1).await);
    app.stop(false).await?;

    // Every failed cycle restored its pre-generation snapshot.
    assert!(app.tracker.is_empty());
    assert_eq!(driver_bytes(&app).await, before);
    Ok(())
}

#[tokio::test]
async fn stop_mid_batch_rolls_back_the_cycle() -> Result<()> {
    let mut config = fast_config();
    config.n_targets = 3;
    let driver = seeded_driver(&[1, 2, 3]);
    let before = driver.save_state()?;

    let app = TargetSmith::initialize(config)?;
    *app.driver.lock().await = Some(DriverVariant::Mock(driver));
    let queue = {
        let queue = app.queue.lock().await;
        match &*queue {
            ExecutionQueueVariant::Mock(inner) => inner.clone(),
            _ => panic!("expected mock queue"),
        }
    };
    // Hold the second submission long enough for the stop to land mid-batch.
    queue.stall_submits_after(1, Duration::from_millis(200));

    app.resume().await?;
    assert!(eventually(|| queue.submitted().len() == 1).await);
    app.stop(false).await?;

    // The stalled submission completed, then the loop noticed the stop
    // before the third target and rolled the whole cycle back.
    assert_eq!(queue.submitted().len(), 2);
    assert_eq!(queue.cancelled().len(), 2);
    assert!(app.tracker.is_empty());
    assert_eq!(driver_bytes(&app).await, before);
    assert_eq!(app.state.current(), DetailedState::Idle);
    Ok(())
}

#[tokio::test]
async fn abort_stop_undoes_speculative_registrations() -> Result<()> {
    let (app, queue) = start_app(fast_config(), seeded_driver(&[1, 2])).await?;
    assert!(eventually(|| queue.submitted().len() == 2).await);
    assert_eq!(observed_targets(&app).await.len(), 2);

    app.stop(true).await?;

    // The withdrawn items never happened: their registrations go with them,
    // so a hot re-entry reuses a driver that matches reality.
    assert_eq!(queue.cancelled().len(), 2);
    assert!(app.tracker.is_empty());
    assert!(observed_targets(&app).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn stop_mid_batch_drains_submitted_items_when_configured() -> Result<()> {
    let mut config = fast_config();
    config.n_targets = 3;
    config.drain_on_cancel = true;

    let app = TargetSmith::initialize(config)?;
    *app.driver.lock().await = Some(DriverVariant::Mock(seeded_driver(&[1, 2, 3])));
    let queue = {
        let queue = app.queue.lock().await;
        match &*queue {
            ExecutionQueueVariant::Mock(inner) => inner.clone(),
            _ => panic!("expected mock queue"),
        }
    };
    queue.stall_submits_after(1, Duration::from_millis(200));

    app.resume().await?;
    assert!(eventually(|| queue.submitted().len() == 1).await);
    app.stop(false).await?;

    // Submitted items stay on the queue; only the unsubmitted target's
    // speculative registration is unwound.
    assert_eq!(queue.submitted().len(), 2);
    assert!(queue.cancelled().is_empty());
    assert_eq!(app.tracker.in_flight(), 2);
    assert_eq!(observed_targets(&app).await.len(), 2);
    Ok(())
}

// ===== No-Target Handling =====

#[tokio::test]
async fn no_target_waits_then_produces() -> Result<()> {
    let mut config = fast_config();
    config.n_targets = 1;
    let mut driver = seeded_driver(&[1]);
    driver.set_available_after(now_secs() + 0.2);

    let app = TargetSmith::initialize(config)?;
    *app.driver.lock().await = Some(DriverVariant::Mock(driver));
    let mut events = app.events.subscribe();
    app.resume().await?;

    let queue = {
        let queue = app.queue.lock().await;
        match &*queue {
            ExecutionQueueVariant::Mock(inner) => inner.clone(),
            _ => panic!("expected mock queue"),
        }
    };
    assert!(eventually(|| queue.submitted().len() == 1).await);

    // The loop went through the waiting sub-state on the way.
    let mut waited = false;
    while let Ok(event) = events.try_recv() {
        if matches!(
            event,
            SchedulerEvent::DetailedStateChanged(DetailedState::WaitingNextTargetTimer)
        ) {
            waited = true;
        }
    }
    assert!(waited);

    app.stop(false).await?;
    Ok(())
}

#[tokio::test]
async fn no_target_within_horizon_is_fatal() -> Result<()> {
    let mut driver = seeded_driver(&[1]);
    driver.set_available_after(now_secs() + 100.0);

    let app = TargetSmith::initialize(fast_config())?;
    *app.driver.lock().await = Some(DriverVariant::Mock(driver));
    let mut events = app.events.subscribe();
    app.resume().await?;

    let (code, _) = next_fault(&mut events).await;
    assert_eq!(code, error::NO_TARGET_WITHIN_HORIZON);
    assert_eq!(app.state.current(), DetailedState::Idle);
    Ok(())
}

#[tokio::test]
async fn fatal_fault_stops_background_tasks() -> Result<()> {
    let mut driver = seeded_driver(&[1]);
    driver.set_available_after(now_secs() + 100.0);

    let app = TargetSmith::initialize(fast_config())?;
    *app.driver.lock().await = Some(DriverVariant::Mock(driver));
    let mut events = app.events.subscribe();
    app.resume().await?;

    let (code, _) = next_fault(&mut events).await;
    assert_eq!(code, error::NO_TARGET_WITHIN_HORIZON);
    assert_eq!(app.state.current(), DetailedState::Idle);

    // Let the cancelled tasks wind down, then expect silence: a faulted
    // system must not keep heartbeating.
    tokio::time::sleep(Duration::from_millis(100)).await;
    while events.try_recv().is_ok() {}
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut beats = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SchedulerEvent::Heartbeat { .. }) {
            beats += 1;
        }
    }
    assert_eq!(beats, 0, "heartbeat survived the fault");

    // A later resume starts a fresh task set over the reaped one.
    app.resume().await?;
    let (code, _) = next_fault(&mut events).await;
    assert_eq!(code, error::NO_TARGET_WITHIN_HORIZON);
    Ok(())
}

#[tokio::test]
async fn probe_failure_is_a_driver_fault_not_no_target() -> Result<()> {
    let mut driver = seeded_driver(&[1]);
    driver.set_available_after(now_secs() + 100.0);
    // The cycle's own selection succeeds, finding nothing; every probe
    // selection after it fails for good.
    driver.fail_selects_after(1, u32::MAX);

    let app = TargetSmith::initialize(fast_config())?;
    *app.driver.lock().await = Some(DriverVariant::Mock(driver));
    let mut events = app.events.subscribe();
    app.resume().await?;

    let (code, reason) = next_fault(&mut events).await;
    assert_eq!(code, error::ADVANCE_LOOP_ERROR, "unexpected fault: {reason}");
    assert_eq!(app.state.current(), DetailedState::Idle);
    Ok(())
}

// ===== Simple Loop =====

#[tokio::test]
async fn simple_loop_registers_actual_outcomes_only() -> Result<()> {
    let mut config = fast_config();
    config.mode = Mode::Simple;
    let (app, queue) = start_app(config, seeded_driver(&[1])).await?;

    assert!(eventually(|| queue.submitted().len() == 1).await);
    // No speculative registration in simple mode.
    assert!(observed_targets(&app).await.is_empty());

    let item = queue.submitted()[0].clone();
    queue.report_done(item.item_id, completion_for(1)).await?;

    let tracker = app.tracker.clone();
    assert!(eventually(move || tracker.is_empty()).await);
    let observed = observed_targets(&app).await;
    assert_eq!(observed.len(), 1);
    assert!(!observed[0].speculative);

    app.stop(false).await?;
    Ok(())
}

// ===== Snapshot Round Trip =====

#[tokio::test]
async fn published_snapshot_warm_starts_a_fresh_app() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let store_path = temp_dir.path().to_str().unwrap().to_string();

    let driver = seeded_driver(&[1, 2]);
    let before = driver.save_state()?;

    let mut config = fast_config();
    config.snapshot_store_type = ::targetsmith::config::SnapshotStoreType::File;
    config.snapshot_store_path = store_path.clone();

    let app = TargetSmith::initialize(config)?;
    *app.driver.lock().await = Some(DriverVariant::Mock(driver));
    let mut events = app.events.subscribe();
    app.resume().await?;

    // The first generation cycle publishes its pre-speculation snapshot.
    let uri = loop {
        let event = timeout(Duration::from_secs(2), events.recv()).await??;
        if let SchedulerEvent::SnapshotSaved { uri } = event {
            break uri;
        }
    };
    app.stop(false).await?;

    let mut warm_config = fast_config();
    warm_config.mode = Mode::Dry;
    warm_config.startup_type = StartupType::Warm;
    warm_config.snapshot_store_type = ::targetsmith::config::SnapshotStoreType::File;
    warm_config.snapshot_store_path = store_path;
    warm_config.snapshot_uri = Some(uri);

    let warm_app = TargetSmith::initialize(warm_config)?;
    warm_app.resume().await?;
    assert_eq!(driver_bytes(&warm_app).await, before);
    warm_app.stop(false).await?;
    Ok(())
}
