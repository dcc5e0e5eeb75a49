//! Recursive tuner for the simulated resonance body.
//!
//! This module contains the two-regime state machine that walks a candidate
//! frequency toward the target resonance and integrates the resulting drive
//! force into a velocity/position trace.

use crate::config::SimulationConfig;
use serde::Serialize;
use std::f64::consts::PI;

/// Tuner regime, chosen from the feedback gain at each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    /// Fixed-size steps toward the target (bang-bang)
    #[default]
    Coarse,
    /// Sinusoidal perturbation around the converged frequency
    Dither,
}

/// Feedback gain of the simulated body at `frequency`.
///
/// Peaks at `amplification` on target and decreases strictly with |error|.
pub fn feedback_gain(frequency: f64, target: f64, amplification: f64, sensitivity: f64) -> f64 {
    let delta = frequency - target;
    amplification / (1.0 + sensitivity * delta * delta)
}

/// One logged simulation step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TunerRecord {
    pub step: u64,
    /// Candidate frequency the step was driven at.
    pub frequency: f64,
    pub gain: f64,
    pub velocity: f64,
    pub position: f64,
    /// Regime used to pick the next candidate.
    pub regime: Regime,
}

/// Mutable tuner state between steps.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TunerState {
    pub candidate_frequency: f64,
    pub gain: f64,
    pub velocity: f64,
    pub position: f64,
    pub step_index: u64,
    pub regime: Regime,
}

/// Finished, read-only simulation trace.
#[derive(Debug, Clone, Serialize)]
pub struct TunerLog {
    records: Vec<TunerRecord>,
    final_state: TunerState,
}

impl TunerLog {
    pub fn records(&self) -> &[TunerRecord] {
        &self.records
    }

    pub fn final_state(&self) -> &TunerState {
        &self.final_state
    }

    /// Number of leading steps spent in the coarse regime.
    pub fn coarse_steps_before_dither(&self) -> usize {
        self.records
            .iter()
            .take_while(|r| r.regime == Regime::Coarse)
            .count()
    }
}

/// Fixed-horizon tuner.
pub struct RecursiveTuner {
    config: SimulationConfig,
    state: TunerState,
    records: Vec<TunerRecord>,
}

impl RecursiveTuner {
    /// Create a tuner at the configured start frequency, at rest.
    pub fn new(config: SimulationConfig) -> Self {
        let state = TunerState {
            candidate_frequency: config.start_frequency,
            ..TunerState::default()
        };
        let capacity = usize::try_from(config.max_steps).unwrap_or(0);
        Self {
            config,
            state,
            records: Vec::with_capacity(capacity),
        }
    }

    /// Get the current tuner state.
    #[cfg(test)]
    pub fn state(&self) -> &TunerState {
        &self.state
    }

    /// Check whether the fixed horizon has been reached.
    pub fn is_finished(&self) -> bool {
        self.state.step_index >= self.config.max_steps
    }

    /// Advance one step. Returns `None` once the horizon is reached.
    ///
    /// # Algorithm
    /// - Gain is evaluated at the current candidate
    /// - Force `gain * A * (2πf)^2` drives a semi-implicit Euler update
    /// - If gain < convergence gain → step candidate toward target by `step_size`
    /// - Otherwise → perturb candidate by `dither_amplitude * sin(step / dither_period)`
    pub fn step(&mut self) -> Option<TunerRecord> {
        if self.is_finished() {
            return None;
        }

        let cfg = &self.config;
        let step = self.state.step_index;
        let frequency = self.state.candidate_frequency;

        let gain = feedback_gain(frequency, cfg.target_frequency, cfg.amplification, cfg.sensitivity);
        let omega = 2.0 * PI * frequency;
        let force = gain * cfg.drive_amplitude * omega * omega;
        let acceleration = force / cfg.mass;

        let velocity = self.state.velocity + acceleration * cfg.timestep;
        let position = self.state.position + velocity * cfg.timestep;

        let regime = if gain < cfg.convergence_gain {
            Regime::Coarse
        } else {
            Regime::Dither
        };

        let next_frequency = match regime {
            Regime::Coarse if frequency < cfg.target_frequency => frequency + cfg.step_size,
            Regime::Coarse => frequency - cfg.step_size,
            Regime::Dither => {
                frequency + cfg.dither_amplitude * (step as f64 / cfg.dither_period).sin()
            }
        };

        if regime != self.state.regime {
            tracing::debug!(
                "Tuner entered {:?} regime at step {} ({:.3} Hz, gain {:.4})",
                regime,
                step,
                frequency,
                gain
            );
        }

        let record = TunerRecord {
            step,
            frequency,
            gain,
            velocity,
            position,
            regime,
        };
        self.records.push(record);

        self.state = TunerState {
            candidate_frequency: next_frequency,
            gain,
            velocity,
            position,
            step_index: step + 1,
            regime,
        };

        Some(record)
    }

    /// Run the remaining steps and finalize the log.
    #[cfg(test)]
    pub fn run(mut self) -> TunerLog {
        while self.step().is_some() {}
        self.finish()
    }

    /// Finalize into a read-only log without running further steps.
    pub fn finish(self) -> TunerLog {
        TunerLog {
            records: self.records,
            final_state: self.state,
        }
    }
}
