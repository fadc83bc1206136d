use anyhow::Result;
use async_trait::async_trait;

use crate::projection::Conditions;
use crate::types::{Observation, SurveyTopology, Target, TargetId};

/// Pluggable scheduling algorithm.
///
/// The production loop treats the driver as an opaque capability set: it never
/// inspects driver-internal state, and every mutation of the driver goes
/// through this interface. Any call may fail with a driver-specific error;
/// callers retry once and then treat the failure as fatal.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Driver name for logging.
    fn name(&self) -> &'static str;

    /// Select the next batch of candidate targets for the given conditions.
    ///
    /// Returns `None` when the algorithm has nothing to observe right now.
    /// Selection does not advance the driver's planning state; that happens
    /// through `register_observed_target`.
    async fn select_next_targets(&mut self, conditions: &Conditions) -> Result<Option<Vec<Target>>>;

    /// Register an executed (or speculatively projected) observation.
    ///
    /// Registering an actual outcome for a target that was previously
    /// registered speculatively replaces the speculative entry.
    async fn register_observed_target(&mut self, observation: &Observation) -> Result<()>;

    /// Undo the registration of a single observed target.
    ///
    /// Used for the targeted rollback of an item whose execution failed after
    /// its speculative outcome was already registered.
    async fn undo_observed_target(&mut self, target_id: TargetId) -> Result<()>;

    /// Serialize the full internal state.
    fn save_state(&self) -> Result<Vec<u8>>;

    /// Restore internal state previously produced by `save_state`.
    ///
    /// After a restore the driver must behave as if no target generated after
    /// the save had ever been requested.
    fn restore_state(&mut self, bytes: &[u8]) -> Result<()>;

    /// Parse an observation-record source (file path or query string) into
    /// observations suitable for `cold_start`.
    fn parse_observation_record(&self, source: &str) -> Result<Vec<Observation>>;

    /// Replay historical observations into a freshly constructed driver.
    async fn cold_start(&mut self, observations: Vec<Observation>) -> Result<()>;

    /// Survey topology for the configured scheduler.
    fn survey_topology(&self) -> SurveyTopology;
}
