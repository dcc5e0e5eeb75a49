//! Pulse shaping: maps a locked frequency to an actuation duration.

use crate::config::LiveConfig;
use std::time::Duration;

/// Clamped linear map from frequency (Hz) to pulse width (seconds).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseShaper {
    scale: f64,
    min_secs: f64,
    max_secs: f64,
}

impl PulseShaper {
    /// Create a shaper with the given scale and bounds.
    ///
    /// # Arguments
    /// * `scale` - Seconds of pulse per Hz
    /// * `min_secs` - Shortest pulse (negative values become 0)
    /// * `max_secs` - Longest pulse
    pub fn new(scale: f64, min_secs: f64, max_secs: f64) -> Self {
        let lo = min_secs.max(0.0);
        let hi = max_secs.max(0.0);

        // Ensure min <= max
        let (final_min, final_max) = if lo > hi { (hi, lo) } else { (lo, hi) };

        Self {
            scale,
            min_secs: final_min,
            max_secs: final_max,
        }
    }

    pub fn from_config(config: &LiveConfig) -> Self {
        Self::new(config.pulse_scale, config.min_pulse, config.max_pulse)
    }

    /// Pulse width in seconds for a frequency, always within bounds.
    ///
    /// Non-finite products saturate at the nearest bound; NaN maps to the
    /// shortest pulse.
    pub fn width_secs(&self, frequency: f64) -> f64 {
        let raw = frequency * self.scale;
        if raw.is_nan() {
            return self.min_secs;
        }
        raw.clamp(self.min_secs, self.max_secs)
    }

    /// Pulse width as a `Duration`, saturating at `Duration::MAX`.
    pub fn duration(&self, frequency: f64) -> Duration {
        Duration::try_from_secs_f64(self.width_secs(frequency)).unwrap_or(Duration::MAX)
    }

    pub fn min_secs(&self) -> f64 {
        self.min_secs
    }

    pub fn max_secs(&self) -> f64 {
        self.max_secs
    }
}
