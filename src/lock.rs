//! Lock decision: gates a frequency estimate against band and amplitude.
//!
//! Every cycle is evaluated from scratch. There is no hysteresis, so an
//! estimate hovering at the band edge toggles the lock on and off.

use crate::config::LiveConfig;
use crate::estimator::FrequencyEstimate;
use serde::Serialize;

/// Outcome of gating one valid estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockState {
    pub in_band: bool,
    pub above_threshold: bool,
}

impl LockState {
    /// Both gates passed; actuation is warranted.
    pub fn qualifies(&self) -> bool {
        self.in_band && self.above_threshold
    }
}

/// Band and amplitude criteria for a lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockCriteria {
    pub target_frequency: f64,
    pub tolerance: f64,
    pub amplitude_threshold: f64,
}

impl LockCriteria {
    pub fn from_config(config: &LiveConfig) -> Self {
        Self {
            target_frequency: config.target_frequency,
            tolerance: config.tolerance,
            amplitude_threshold: config.amplitude_threshold,
        }
    }

    /// Evaluate an estimate. Returns `None` when the estimate has no frequency.
    pub fn evaluate(&self, estimate: &FrequencyEstimate) -> Option<LockState> {
        let frequency = estimate.frequency?;
        Some(LockState {
            in_band: (frequency - self.target_frequency).abs() < self.tolerance,
            above_threshold: estimate.peak_amplitude > self.amplitude_threshold,
        })
    }
}
