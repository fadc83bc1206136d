use serde::{Deserialize, Serialize};

use crate::types::{now_secs, Observation, SkyPosition, Target};

/// Slew rate used by the projection, in degrees per second.
const SLEW_RATE_DEG_PER_SEC: f64 = 3.5;

/// Fixed settle time added to every slew, in seconds.
const SETTLE_TIME_SECS: f64 = 3.0;

/// Current observatory pointing state, fed by telemetry and by completed
/// observations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ObservatoryState {
    pub time: f64,
    pub position: SkyPosition,
    pub tracking: bool,
}

impl Default for ObservatoryState {
    fn default() -> Self {
        ObservatoryState {
            time: now_secs(),
            position: SkyPosition {
                ra_deg: 0.0,
                dec_deg: 0.0,
            },
            tracking: false,
        }
    }
}

impl ObservatoryState {
    /// Record a completed observation: the observatory ends up pointing at
    /// the target, at the observation's end time.
    pub fn apply(&mut self, observation: &Observation) {
        self.time = observation.start_time + observation.duration;
        self.position = observation.position;
        self.tracking = true;
    }
}

/// Conditions handed to the driver when selecting targets.
#[derive(Debug, Clone, Copy)]
pub struct Conditions {
    pub time: f64,
    pub position: SkyPosition,
}

/// Speculative projection of the observatory used by the look-ahead loop.
///
/// The projection is synchronized from the real [`ObservatoryState`] at the
/// start of a generation cycle and then advanced target by target as if each
/// one had been executed. The real state is never touched.
#[derive(Debug, Clone, Copy)]
pub struct ObservatoryProjection {
    pub time: f64,
    pub position: SkyPosition,
}

impl ObservatoryProjection {
    pub fn from_state(state: &ObservatoryState) -> Self {
        ObservatoryProjection {
            time: state.time,
            position: state.position,
        }
    }

    pub fn conditions(&self) -> Conditions {
        Conditions {
            time: self.time,
            position: self.position,
        }
    }

    /// Estimated slew duration from the current pointing to `to`, in seconds.
    pub fn slew_time(&self, to: SkyPosition) -> f64 {
        let d_ra = (to.ra_deg - self.position.ra_deg).abs();
        let d_dec = (to.dec_deg - self.position.dec_deg).abs();
        // Axes move simultaneously; the slower one dominates.
        d_ra.max(d_dec) / SLEW_RATE_DEG_PER_SEC + SETTLE_TIME_SECS
    }

    /// Play back a target on the projection and return the speculative
    /// outcome that the driver should register.
    pub fn observe(&mut self, target: &Target) -> Observation {
        let slew = self.slew_time(target.position);
        let start = (self.time + slew).max(target.obs_time);
        let duration = target.estimated_duration.max(target.exposure_total());

        self.time = start + duration;
        self.position = target.position;

        Observation {
            target_id: target.target_id,
            position: target.position,
            band: target.band.clone(),
            start_time: start,
            duration,
            speculative: true,
        }
    }

    /// Step the projection forward in simulated time without observing.
    pub fn step(&mut self, delta_secs: f64) {
        self.time += delta_secs;
    }
}
