//! Error types for the resonance tracker.
//!
//! This module defines custom error enums for each component of the tracker,
//! providing descriptive error messages with context information.

use thiserror::Error;

/// Errors reported by a hardware backend (ADC read or actuator output).
#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("Failed to open device '{path}': {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("SPI transfer failed: {0}")]
    TransferFailed(std::io::Error),

    #[error("GPIO operation on '{path}' failed: {source}")]
    GpioFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ADC channel {0} is out of range (0-7)")]
    ChannelOutOfRange(u8),

    #[error("Actuator is already asserted")]
    AlreadyAsserted,

    #[error("Hardware backend not available on this platform")]
    #[cfg_attr(target_os = "linux", allow(dead_code))]
    NotAvailable,
}

/// Errors related to configuration management.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Failed to write configuration: {0}")]
    WriteError(#[from] std::io::Error),
}

/// Errors that terminate the control loop.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Telemetry trace error: {0}")]
    Trace(#[from] std::io::Error),
}
