use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::projection::Conditions;
use crate::traits::Driver;
use crate::types::{Observation, SkyPosition, SurveyTopology, Target, TargetId};

/// Serializable state of the mock driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MockState {
    /// Targets waiting to be selected, in order.
    planned: Vec<Target>,
    /// Registered observations, in registration order.
    observed: Vec<Observation>,
    /// Time before which selection returns no targets.
    available_after: f64,
}

/// Scripted driver for tests.
///
/// Selection pops planned targets; registration is recorded verbatim. All of
/// it round-trips through save/restore so rollback behavior is observable.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: MockState,
    /// Number of upcoming `select_next_targets` calls that should fail.
    pub fail_selects: u32,
    /// Selections that still succeed before `fail_selects` kicks in.
    pub ok_selects: u32,
    /// Fail the next `restore_state` call.
    pub fail_restore: bool,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_target(&mut self, target: Target) {
        self.state.planned.push(target);
    }

    /// Make selection return none until `time`.
    pub fn set_available_after(&mut self, time: f64) {
        self.state.available_after = time;
    }

    /// Let `ok` selections succeed, then fail the following `n`.
    pub fn fail_selects_after(&mut self, ok: u32, n: u32) {
        self.ok_selects = ok;
        self.fail_selects = n;
    }

    pub fn observed(&self) -> &[Observation] {
        &self.state.observed
    }

    pub fn planned_len(&self) -> usize {
        self.state.planned.len()
    }

    /// Convenience target builder for tests.
    pub fn make_target(target_id: TargetId, duration: f64) -> Target {
        Target {
            target_id,
            position: SkyPosition {
                ra_deg: target_id as f64,
                dec_deg: -20.0,
            },
            band: "r".to_string(),
            exposure_times: vec![duration],
            estimated_duration: duration,
            obs_time: 0.0,
            metadata: serde_json::Value::Null,
        }
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn select_next_targets(&mut self, conditions: &Conditions) -> Result<Option<Vec<Target>>> {
        if self.ok_selects > 0 {
            self.ok_selects -= 1;
        } else if self.fail_selects > 0 {
            self.fail_selects -= 1;
            bail!("mock select failure");
        }

        if conditions.time < self.state.available_after || self.state.planned.is_empty() {
            return Ok(None);
        }

        Ok(Some(vec![self.state.planned.remove(0)]))
    }

    async fn register_observed_target(&mut self, observation: &Observation) -> Result<()> {
        if let Some(existing) = self
            .state
            .observed
            .iter_mut()
            .find(|o| o.target_id == observation.target_id)
        {
            *existing = observation.clone();
        } else {
            self.state.observed.push(observation.clone());
        }
        Ok(())
    }

    async fn undo_observed_target(&mut self, target_id: TargetId) -> Result<()> {
        let before = self.state.observed.len();
        self.state.observed.retain(|o| o.target_id != target_id);
        if self.state.observed.len() == before {
            bail!("target {target_id} is not registered");
        }
        // The undone target becomes selectable again.
        Ok(())
    }

    fn save_state(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.state).context("serializing mock driver state")
    }

    fn restore_state(&mut self, bytes: &[u8]) -> Result<()> {
        if self.fail_restore {
            bail!("mock restore failure");
        }
        self.state = serde_json::from_slice(bytes).context("deserializing mock driver state")?;
        Ok(())
    }

    fn parse_observation_record(&self, source: &str) -> Result<Vec<Observation>> {
        serde_json::from_str(source)
            .with_context(|| format!("parsing inline observation record: {source}"))
    }

    async fn cold_start(&mut self, observations: Vec<Observation>) -> Result<()> {
        for observation in &observations {
            self.register_observed_target(observation).await?;
        }
        Ok(())
    }

    fn survey_topology(&self) -> SurveyTopology {
        SurveyTopology {
            num_general_props: 1,
            general_props: vec!["mock".to_string()],
            num_seq_props: 0,
            sequence_props: vec![],
        }
    }
}
