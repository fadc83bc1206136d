use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::projection::Conditions;
use crate::traits::Driver;
use crate::types::{Observation, SkyPosition, SurveyTopology, Target, TargetId};

/// Per-exposure readout overhead, in seconds.
const READOUT_SECS: f64 = 2.0;

/// One entry of the scripted observation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedVisit {
    pub name: String,
    pub position: SkyPosition,
    pub band: String,
    pub exposure_times: Vec<f64>,
    /// Earliest time the visit may start, unix seconds.
    pub earliest: f64,
}

/// Serializable planning state of the sequential driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SequentialState {
    /// Registered observations, in registration order.
    observed: Vec<Observation>,
}

/// Scheduler that executes a scripted observation list in order.
///
/// The next candidate is always the first unobserved entry in the script;
/// planning state advances only through `register_observed_target`, so
/// repeated selection without registration re-yields the same target.
#[derive(Debug, Clone)]
pub struct SequentialDriver {
    script: Vec<ScriptedVisit>,
    state: SequentialState,
}

impl SequentialDriver {
    pub fn new(script: Vec<ScriptedVisit>) -> Self {
        Self {
            script,
            state: SequentialState::default(),
        }
    }

    /// Small default raster, available from `start_time` on.
    pub fn with_default_script(start_time: f64) -> Self {
        let script = (0..6)
            .map(|i| ScriptedVisit {
                name: format!("raster-{i}"),
                position: SkyPosition {
                    ra_deg: 10.0 * i as f64,
                    dec_deg: -30.0,
                },
                band: if i % 2 == 0 { "r" } else { "g" }.to_string(),
                exposure_times: vec![15.0, 15.0],
                earliest: start_time,
            })
            .collect();
        Self::new(script)
    }

    /// Index of the next unobserved script entry.
    fn cursor(&self) -> usize {
        self.state.observed.len()
    }

    fn target_for(&self, index: usize, visit: &ScriptedVisit) -> Target {
        let exposure_total: f64 = visit.exposure_times.iter().sum();
        Target {
            // Script order makes index-derived identifiers monotonic.
            target_id: index as TargetId + 1,
            position: visit.position,
            band: visit.band.clone(),
            exposure_times: visit.exposure_times.clone(),
            estimated_duration: exposure_total + READOUT_SECS * visit.exposure_times.len() as f64,
            obs_time: visit.earliest,
            metadata: serde_json::json!({ "note": visit.name }),
        }
    }
}

#[async_trait]
impl Driver for SequentialDriver {
    fn name(&self) -> &'static str {
        "sequential"
    }

    async fn select_next_targets(&mut self, conditions: &Conditions) -> Result<Option<Vec<Target>>> {
        let index = self.cursor();
        let Some(visit) = self.script.get(index) else {
            debug!("Script exhausted after {} visits.", self.script.len());
            return Ok(None);
        };

        if visit.earliest > conditions.time {
            return Ok(None);
        }

        Ok(Some(vec![self.target_for(index, visit)]))
    }

    async fn register_observed_target(&mut self, observation: &Observation) -> Result<()> {
        if let Some(existing) = self
            .state
            .observed
            .iter_mut()
            .find(|o| o.target_id == observation.target_id)
        {
            // Actual outcome replaces the earlier speculative one.
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
        Ok(())
    }

    fn save_state(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.state).context("serializing sequential driver state")
    }

    fn restore_state(&mut self, bytes: &[u8]) -> Result<()> {
        self.state =
            serde_json::from_slice(bytes).context("deserializing sequential driver state")?;
        Ok(())
    }

    fn parse_observation_record(&self, source: &str) -> Result<Vec<Observation>> {
        let raw = std::fs::read(source)
            .with_context(|| format!("reading observation record {source}"))?;
        serde_json::from_slice(&raw)
            .with_context(|| format!("parsing observation record {source}"))
    }

    async fn cold_start(&mut self, observations: Vec<Observation>) -> Result<()> {
        debug!("Replaying {} historical observations.", observations.len());
        for observation in &observations {
            self.register_observed_target(observation).await?;
        }
        Ok(())
    }

    fn survey_topology(&self) -> SurveyTopology {
        SurveyTopology {
            num_general_props: 0,
            general_props: vec![],
            num_seq_props: 1,
            sequence_props: vec!["scripted".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conditions(time: f64) -> Conditions {
        Conditions {
            time,
            position: SkyPosition {
                ra_deg: 0.0,
                dec_deg: 0.0,
            },
        }
    }

    fn observation_for(target: &Target) -> Observation {
        Observation {
            target_id: target.target_id,
            position: target.position,
            band: target.band.clone(),
            start_time: 100.0,
            duration: target.estimated_duration,
            speculative: true,
        }
    }

    #[tokio::test]
    async fn selection_without_registration_repeats_the_same_target() {
        let mut driver = SequentialDriver::with_default_script(0.0);
        let first = driver.select_next_targets(&conditions(10.0)).await.unwrap();
        let second = driver.select_next_targets(&conditions(10.0)).await.unwrap();
        assert_eq!(
            first.unwrap()[0].target_id,
            second.unwrap()[0].target_id
        );
    }

    #[tokio::test]
    async fn registration_advances_the_cursor() {
        let mut driver = SequentialDriver::with_default_script(0.0);
        let target = driver
            .select_next_targets(&conditions(10.0))
            .await
            .unwrap()
            .unwrap()
            .remove(0);
        driver
            .register_observed_target(&observation_for(&target))
            .await
            .unwrap();

        let next = driver
            .select_next_targets(&conditions(10.0))
            .await
            .unwrap()
            .unwrap()
            .remove(0);
        assert_eq!(next.target_id, target.target_id + 1);
    }

    #[tokio::test]
    async fn restore_rewinds_speculative_registrations() {
        let mut driver = SequentialDriver::with_default_script(0.0);
        let before = driver.save_state().unwrap();

        for _ in 0..2 {
            let target = driver
                .select_next_targets(&conditions(10.0))
                .await
                .unwrap()
                .unwrap()
                .remove(0);
            driver
                .register_observed_target(&observation_for(&target))
                .await
                .unwrap();
        }

        driver.restore_state(&before).unwrap();
        assert_eq!(driver.save_state().unwrap(), before);
        let next = driver
            .select_next_targets(&conditions(10.0))
            .await
            .unwrap()
            .unwrap()
            .remove(0);
        assert_eq!(next.target_id, 1);
    }

    #[tokio::test]
    async fn undo_makes_the_target_selectable_again() {
        let mut driver = SequentialDriver::with_default_script(0.0);
        let target = driver
            .select_next_targets(&conditions(10.0))
            .await
            .unwrap()
            .unwrap()
            .remove(0);
        driver
            .register_observed_target(&observation_for(&target))
            .await
            .unwrap();

        driver.undo_observed_target(target.target_id).await.unwrap();
        let again = driver
            .select_next_targets(&conditions(10.0))
            .await
            .unwrap()
            .unwrap()
            .remove(0);
        assert_eq!(again.target_id, target.target_id);

        assert!(driver.undo_observed_target(99).await.is_err());
    }

    #[tokio::test]
    async fn honors_earliest_start_time() {
        let mut driver = SequentialDriver::with_default_script(500.0);
        assert!(driver
            .select_next_targets(&conditions(100.0))
            .await
            .unwrap()
            .is_none());
        assert!(driver
            .select_next_targets(&conditions(600.0))
            .await
            .unwrap()
            .is_some());
    }
}
