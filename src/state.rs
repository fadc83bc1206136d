use std::sync::Arc;

use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::SchedulerError;
use crate::types::DetailedState;

/// Serialization gate for the production loop's sub-states.
///
/// At most one sub-state handle is outstanding at a time; a second `enter`
/// blocks until the first handle is released. Every state-changing operation
/// of the loop passes through this gate, which is the sole serialization
/// point for driver and tracker mutation.
#[derive(Debug)]
pub struct DetailedStateMachine {
    gate: Arc<Mutex<()>>,
    state: watch::Sender<DetailedState>,
}

impl DetailedStateMachine {
    pub fn new() -> Self {
        let (state, _) = watch::channel(DetailedState::Idle);
        Self {
            gate: Arc::new(Mutex::new(())),
            state,
        }
    }

    pub fn current(&self) -> DetailedState {
        *self.state.borrow()
    }

    /// Watch detailed-state transitions for observability.
    pub fn subscribe(&self) -> watch::Receiver<DetailedState> {
        self.state.subscribe()
    }

    /// Transition `Idle -> Running` once a driver instance exists.
    pub fn activate(&self) -> Result<(), SchedulerError> {
        let current = self.current();
        if current != DetailedState::Idle {
            return Err(SchedulerError::InvalidTransition {
                current,
                requested: DetailedState::Running,
            });
        }
        self.state.send_replace(DetailedState::Running);
        debug!("Detailed state: IDLE -> RUNNING");
        Ok(())
    }

    /// Transition `Running -> Idle` on teardown.
    ///
    /// Fails while a sub-state handle is outstanding.
    pub fn deactivate(&self) -> Result<(), SchedulerError> {
        let _busy = self.gate.try_lock().map_err(|_| SchedulerError::InvalidTransition {
            current: self.current(),
            requested: DetailedState::Idle,
        })?;
        let current = self.current();
        if current != DetailedState::Running {
            return Err(SchedulerError::InvalidTransition {
                current,
                requested: DetailedState::Idle,
            });
        }
        self.state.send_replace(DetailedState::Idle);
        debug!("Detailed state: RUNNING -> IDLE");
        Ok(())
    }

    /// Acquire the gate and enter a sub-state.
    ///
    /// Blocks while another handle is outstanding. Fails unless the machine
    /// is in `Running` once the gate is acquired, and rejects `Running` and
    /// `Idle` as requested sub-states. Dropping the returned guard restores
    /// `Running`.
    pub async fn enter(&self, substate: DetailedState) -> Result<StateGuard, SchedulerError> {
        if matches!(substate, DetailedState::Running | DetailedState::Idle) {
            return Err(SchedulerError::InvalidTransition {
                current: self.current(),
                requested: substate,
            });
        }

        let permit = Arc::clone(&self.gate).lock_owned().await;

        let current = self.current();
        if current != DetailedState::Running {
            return Err(SchedulerError::InvalidTransition {
                current,
                requested: substate,
            });
        }

        self.state.send_replace(substate);
        debug!("Detailed state: RUNNING -> {substate}");

        Ok(StateGuard {
            _permit: permit,
            state: self.state.clone(),
        })
    }

    /// Acquire the gate without advertising a sub-state.
    ///
    /// Serializes driver and tracker mutation that happens between
    /// sub-states, such as outcome reconciliation, while the advertised
    /// state stays `Running`.
    pub async fn hold(&self) -> Result<GatePermit, SchedulerError> {
        let permit = Arc::clone(&self.gate).lock_owned().await;
        let current = self.current();
        if current != DetailedState::Running {
            return Err(SchedulerError::InvalidTransition {
                current,
                requested: DetailedState::Running,
            });
        }
        Ok(GatePermit { _permit: permit })
    }
}

impl Default for DetailedStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Gate permit that leaves the advertised state untouched.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedMutexGuard<()>,
}

/// Scoped sub-state handle. Restores `Running` on drop, on every exit path.
#[derive(Debug)]
pub struct StateGuard {
    _permit: OwnedMutexGuard<()>,
    state: watch::Sender<DetailedState>,
}

impl Drop for StateGuard {
    fn drop(&mut self) {
        let previous = self.state.send_replace(DetailedState::Running);
        debug!("Detailed state: {previous} -> RUNNING");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn enter_from_idle_fails() {
        let machine = DetailedStateMachine::new();
        let result = machine.enter(DetailedState::GeneratingTargetQueue).await;
        assert!(matches!(
            result,
            Err(SchedulerError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn enter_sets_substate_and_release_restores_running() {
        let machine = DetailedStateMachine::new();
        machine.activate().unwrap();

        let guard = machine
            .enter(DetailedState::GeneratingTargetQueue)
            .await
            .unwrap();
        assert_eq!(machine.current(), DetailedState::GeneratingTargetQueue);

        drop(guard);
        assert_eq!(machine.current(), DetailedState::Running);
    }

    #[tokio::test]
    async fn enter_running_is_rejected() {
        let machine = DetailedStateMachine::new();
        machine.activate().unwrap();
        assert!(machine.enter(DetailedState::Running).await.is_err());
    }

    #[tokio::test]
    async fn second_enter_blocks_until_release() {
        let machine = Arc::new(DetailedStateMachine::new());
        machine.activate().unwrap();

        let guard = machine.enter(DetailedState::QueueingTarget).await.unwrap();

        let contender = {
            let machine = Arc::clone(&machine);
            tokio::spawn(async move {
                machine
                    .enter(DetailedState::GeneratingTargetQueue)
                    .await
                    .map(|g| drop(g))
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished(), "second enter should block");

        drop(guard);
        contender.await.unwrap().unwrap();
        assert_eq!(machine.current(), DetailedState::Running);
    }

    #[tokio::test]
    async fn deactivate_requires_running_and_no_guard() {
        let machine = DetailedStateMachine::new();
        assert!(machine.deactivate().is_err());

        machine.activate().unwrap();
        let guard = machine.enter(DetailedState::QueueingTarget).await.unwrap();
        assert!(machine.deactivate().is_err());
        drop(guard);

        machine.deactivate().unwrap();
        assert_eq!(machine.current(), DetailedState::Idle);
    }

    #[tokio::test]
    async fn hold_keeps_running_but_blocks_enter() {
        let machine = Arc::new(DetailedStateMachine::new());
        assert!(machine.hold().await.is_err());
        machine.activate().unwrap();

        let permit = machine.hold().await.unwrap();
        assert_eq!(machine.current(), DetailedState::Running);

        let contender = {
            let machine = Arc::clone(&machine);
            tokio::spawn(async move {
                machine
                    .enter(DetailedState::GeneratingTargetQueue)
                    .await
                    .map(|g| drop(g))
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished(), "enter should wait on the permit");

        drop(permit);
        contender.await.unwrap().unwrap();
        assert_eq!(machine.current(), DetailedState::Running);
    }

    #[tokio::test]
    async fn subscriber_observes_every_transition() {
        let machine = DetailedStateMachine::new();
        let mut watcher = machine.subscribe();
        assert_eq!(*watcher.borrow_and_update(), DetailedState::Idle);

        machine.activate().unwrap();
        watcher.changed().await.unwrap();
        assert_eq!(*watcher.borrow_and_update(), DetailedState::Running);

        let guard = machine.enter(DetailedState::QueueingTarget).await.unwrap();
        watcher.changed().await.unwrap();
        assert_eq!(*watcher.borrow_and_update(), DetailedState::QueueingTarget);

        drop(guard);
        watcher.changed().await.unwrap();
        assert_eq!(*watcher.borrow_and_update(), DetailedState::Running);
    }
}
