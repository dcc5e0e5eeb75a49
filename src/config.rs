//! Configuration module for tracker parameters.
//!
//! This module handles loading, saving, and validating the tracker
//! configuration. The configuration is read once at startup and passed by
//! reference into every component afterwards.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Parameters of the live acquisition/actuation loop.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LiveConfig {
    /// Sampling rate in Hz; the loop period is `1 / sample_rate`.
    pub sample_rate: f64,
    /// Number of samples in one analysis window.
    pub window_size: usize,
    /// Minimum last-peak amplitude for a lock.
    pub amplitude_threshold: f64,
    /// Minimum height of a detected peak. Falls back to `amplitude_threshold`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_peak_height: Option<f64>,
    /// Minimum distance between accepted peaks, in samples.
    pub min_peak_separation: usize,
    /// Centre of the resonance band in Hz.
    pub target_frequency: f64,
    /// Half-width of the resonance band in Hz.
    pub tolerance: f64,
    /// Seconds of pulse per Hz of locked frequency.
    pub pulse_scale: f64,
    /// Shortest pulse in seconds.
    pub min_pulse: f64,
    /// Longest pulse in seconds.
    pub max_pulse: f64,
    /// Publish a window snapshot every N cycles.
    pub telemetry_every: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            sample_rate: 1000.0,
            window_size: 500,
            amplitude_threshold: 700.0,
            min_peak_height: None,
            min_peak_separation: 20,
            target_frequency: 38.0,
            tolerance: 2.0,
            pulse_scale: 0.001,
            min_pulse: 0.005,
            max_pulse: 0.05,
            telemetry_every: 50,
        }
    }
}

impl LiveConfig {
    /// Effective minimum peak height used by the estimator.
    pub fn peak_height(&self) -> f64 {
        self.min_peak_height.unwrap_or(self.amplitude_threshold)
    }
}

/// Parameters of the recursive tuning simulation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Initial candidate frequency in Hz.
    pub start_frequency: f64,
    /// Natural resonance of the simulated body in Hz.
    pub target_frequency: f64,
    /// Coarse frequency step in Hz.
    pub step_size: f64,
    /// Gain at which the tuner switches from coarse steps to dither.
    pub convergence_gain: f64,
    /// Peak of the feedback gain law.
    pub amplification: f64,
    /// Curvature of the feedback gain law.
    pub sensitivity: f64,
    /// Vibration amplitude in metres.
    pub drive_amplitude: f64,
    /// Mass of the driven body in kg.
    pub mass: f64,
    /// Integration timestep in seconds.
    pub timestep: f64,
    /// Fixed number of simulation steps.
    pub max_steps: u64,
    /// Amplitude of the dither perturbation in Hz.
    pub dither_amplitude: f64,
    /// Period divisor of the dither phase, in steps.
    pub dither_period: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start_frequency: 300.0,
            target_frequency: 980.0,
            step_size: 0.5,
            convergence_gain: 0.995,
            amplification: 2.0,
            sensitivity: 20.0,
            drive_amplitude: 0.0001,
            mass: 0.1,
            timestep: 0.01,
            max_steps: 2000,
            dither_amplitude: 0.1,
            dither_period: 30.0,
        }
    }
}

/// Settings for the Linux ADC/GPIO backend.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HardwareConfig {
    pub spi_device: PathBuf,
    pub spi_speed_hz: u32,
    pub adc_channel: u8,
    pub output_pin: u32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            spi_device: PathBuf::from("/dev/spidev0.0"),
            spi_speed_hz: 1_350_000,
            adc_channel: 0,
            output_pin: 18,
        }
    }
}

/// Telemetry channel settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Snapshots buffered before the oldest is dropped.
    pub capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

/// Tracker configuration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub live: LiveConfig,
    pub simulation: SimulationConfig,
    pub hardware: HardwareConfig,
    pub telemetry: TelemetryConfig,
}

/// Longest pulse the actuator may be held for, in seconds
pub const MAX_PULSE_SECS: f64 = 10.0;

fn require_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::ValidationError(format!(
            "{} ({}) must be a positive finite number",
            name, value
        )));
    }
    Ok(())
}

fn require_finite(name: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::ValidationError(format!(
            "{} ({}) must be finite",
            name, value
        )));
    }
    Ok(())
}

impl LiveConfig {
    /// Validate live loop parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("live.sample_rate", self.sample_rate)?;
        match Duration::try_from_secs_f64(1.0 / self.sample_rate) {
            Ok(period) if !period.is_zero() => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "live.sample_rate ({}) gives a sample period below 1ns",
                    self.sample_rate
                )));
            }
        }

        if self.window_size == 0 {
            return Err(ConfigError::ValidationError(
                "live.window_size must be greater than zero".to_string(),
            ));
        }

        if self.min_peak_separation == 0 {
            return Err(ConfigError::ValidationError(
                "live.min_peak_separation must be at least 1 sample".to_string(),
            ));
        }

        require_finite("live.amplitude_threshold", self.amplitude_threshold)?;
        if let Some(height) = self.min_peak_height {
            require_finite("live.min_peak_height", height)?;
        }
        require_finite("live.target_frequency", self.target_frequency)?;
        require_positive("live.tolerance", self.tolerance)?;
        require_positive("live.pulse_scale", self.pulse_scale)?;
        require_finite("live.min_pulse", self.min_pulse)?;
        require_finite("live.max_pulse", self.max_pulse)?;

        if self.min_pulse < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "live.min_pulse ({}) cannot be negative",
                self.min_pulse
            )));
        }

        if self.max_pulse > MAX_PULSE_SECS {
            return Err(ConfigError::ValidationError(format!(
                "live.max_pulse ({}) cannot exceed {} seconds",
                self.max_pulse, MAX_PULSE_SECS
            )));
        }

        if self.min_pulse > self.max_pulse {
            return Err(ConfigError::ValidationError(format!(
                "live.min_pulse ({}) cannot be greater than live.max_pulse ({})",
                self.min_pulse, self.max_pulse
            )));
        }

        Ok(())
    }
}

impl SimulationConfig {
    /// Validate simulation parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("simulation.mass", self.mass)?;
        require_positive("simulation.timestep", self.timestep)?;
        require_positive("simulation.dither_period", self.dither_period)?;
        require_finite("simulation.start_frequency", self.start_frequency)?;
        require_finite("simulation.target_frequency", self.target_frequency)?;
        require_positive("simulation.step_size", self.step_size)?;
        require_finite("simulation.convergence_gain", self.convergence_gain)?;
        require_finite("simulation.amplification", self.amplification)?;
        require_finite("simulation.drive_amplitude", self.drive_amplitude)?;
        require_finite("simulation.dither_amplitude", self.dither_amplitude)?;

        if !self.sensitivity.is_finite() || self.sensitivity < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "simulation.sensitivity ({}) must be a non-negative finite number",
                self.sensitivity
            )));
        }

        Ok(())
    }
}

impl Config {
    /// Validate configuration values.
    /// Returns Ok(()) if valid, Err with descriptive message if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.live.validate()?;
        self.simulation.validate()?;

        if self.hardware.adc_channel > 7 {
            return Err(ConfigError::ValidationError(format!(
                "hardware.adc_channel ({}) must be between 0 and 7",
                self.hardware.adc_channel
            )));
        }

        if self.telemetry.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "telemetry.capacity must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from file or use defaults.
    /// If the file doesn't exist, returns the default config.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let contents = fs::read_to_string(path).map_err(|e| {
                ConfigError::ParseError(format!("Failed to read config file: {}", e))
            })?;

            serde_json::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(format!("Invalid JSON: {}", e)))?
        } else {
            Config::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file using atomic write.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {}", e)))?;

        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Get the default config path (`<config_dir>/resonance-tracker/config.json`).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("resonance-tracker")
            .join("config.json")
    }
}
