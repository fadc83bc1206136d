use anyhow::Result;
use async_trait::async_trait;

use super::{MockDriver, SequentialDriver};
use crate::config::DriverType;
use crate::projection::Conditions;
use crate::traits::Driver;
use crate::types::{now_secs, Observation, SurveyTopology, Target, TargetId};

/// Enum of all driver implementations.
#[derive(Debug, Clone)]
pub enum DriverVariant {
    Sequential(SequentialDriver),
    Mock(MockDriver),
}

impl DriverVariant {
    /// Construct a fresh, unconfigured driver of the given type.
    pub fn new(driver_type: DriverType) -> Self {
        match driver_type {
            DriverType::Sequential => {
                DriverVariant::Sequential(SequentialDriver::with_default_script(now_secs()))
            }
            DriverType::Mock => DriverVariant::Mock(MockDriver::new()),
        }
    }
}

#[async_trait]
impl Driver for DriverVariant {
    fn name(&self) -> &'static str {
        match self {
            DriverVariant::Sequential(inner) => inner.name(),
            DriverVariant::Mock(inner) => inner.name(),
        }
    }

    async fn select_next_targets(&mut self, conditions: &Conditions) -> Result<Option<Vec<Target>>> {
        match self {
            DriverVariant::Sequential(inner) => inner.select_next_targets(conditions).await,
            DriverVariant::Mock(inner) => inner.select_next_targets(conditions).await,
        }
    }

    async fn register_observed_target(&mut self, observation: &Observation) -> Result<()> {
        match self {
            DriverVariant::Sequential(inner) => inner.register_observed_target(observation).await,
            DriverVariant::Mock(inner) => inner.register_observed_target(observation).await,
        }
    }

    async fn undo_observed_target(&mut self, target_id: TargetId) -> Result<()> {
        match self {
            DriverVariant::Sequential(inner) => inner.undo_observed_target(target_id).await,
            DriverVariant::Mock(inner) => inner.undo_observed_target(target_id).await,
        }
    }

    fn save_state(&self) -> Result<Vec<u8>> {
        match self {
            DriverVariant::Sequential(inner) => inner.save_state(),
            DriverVariant::Mock(inner) => inner.save_state(),
        }
    }

    fn restore_state(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            DriverVariant::Sequential(inner) => inner.restore_state(bytes),
            DriverVariant::Mock(inner) => inner.restore_state(bytes),
        }
    }

    fn parse_observation_record(&self, source: &str) -> Result<Vec<Observation>> {
        match self {
            DriverVariant::Sequential(inner) => inner.parse_observation_record(source),
            DriverVariant::Mock(inner) => inner.parse_observation_record(source),
        }
    }

    async fn cold_start(&mut self, observations: Vec<Observation>) -> Result<()> {
        match self {
            DriverVariant::Sequential(inner) => inner.cold_start(observations).await,
            DriverVariant::Mock(inner) => inner.cold_start(observations).await,
        }
    }

    fn survey_topology(&self) -> SurveyTopology {
        match self {
            DriverVariant::Sequential(inner) => inner.survey_topology(),
            DriverVariant::Mock(inner) => inner.survey_topology(),
        }
    }
}
