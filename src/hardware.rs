//! Hardware seam: sensor reads and actuator pulses.
//!
//! The control loop only depends on the timing contract of these two
//! operations. Backends live behind the [`HardwareIo`] trait so the loop can
//! be driven by a synthetic source in tests.

use crate::error::HardwareError;
use std::f64::consts::PI;
use std::future::Future;
use std::time::Duration;

/// Sensor input and actuator output used by the control loop.
pub trait HardwareIo: Send {
    /// Read one amplitude sample.
    fn read_sample(&mut self) -> impl Future<Output = Result<f64, HardwareError>> + Send;

    /// Assert the actuator for roughly `duration`, then deassert.
    ///
    /// Resolves once the pulse has ended. Calling while a pulse is still
    /// asserted is an error.
    fn actuate(
        &mut self,
        duration: Duration,
    ) -> impl Future<Output = Result<(), HardwareError>> + Send;
}

/// Deterministic sine source with a recording actuator.
///
/// Produces `offset + amplitude * sin(2π f n / sample_rate + phase)` for the
/// n-th read.
#[derive(Debug, Clone)]
pub struct SyntheticSensor {
    frequency: f64,
    amplitude: f64,
    offset: f64,
    phase: f64,
    sample_rate: f64,
    index: u64,
    asserted: bool,
    actuations: Vec<Duration>,
}

impl SyntheticSensor {
    /// Mid-scale offset of a 10-bit ADC.
    pub const DEFAULT_OFFSET: f64 = 512.0;

    pub fn new(frequency: f64, amplitude: f64, sample_rate: f64) -> Self {
        Self {
            frequency,
            amplitude,
            offset: Self::DEFAULT_OFFSET,
            phase: 0.0,
            sample_rate,
            index: 0,
            asserted: false,
            actuations: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn with_phase(mut self, phase: f64) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    /// Pulse widths requested so far, in order.
    #[cfg(test)]
    pub fn actuations(&self) -> &[Duration] {
        &self.actuations
    }

    /// Number of samples produced so far.
    #[cfg(test)]
    pub fn samples_read(&self) -> u64 {
        self.index
    }

    fn value_at(&self, n: u64) -> f64 {
        let t = n as f64 / self.sample_rate;
        self.offset + self.amplitude * (2.0 * PI * self.frequency * t + self.phase).sin()
    }
}

impl HardwareIo for SyntheticSensor {
    async fn read_sample(&mut self) -> Result<f64, HardwareError> {
        let value = self.value_at(self.index);
        self.index += 1;
        Ok(value)
    }

    async fn actuate(&mut self, duration: Duration) -> Result<(), HardwareError> {
        if self.asserted {
            return Err(HardwareError::AlreadyAsserted);
        }
        self.asserted = true;
        tokio::time::sleep(duration).await;
        self.asserted = false;
        self.actuations.push(duration);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_synthetic_sensor_follows_sine() {
        let mut sensor = SyntheticSensor::new(250.0, 100.0, 1000.0);

        // quarter-period steps: offset, peak, offset, trough
        let values = [
            sensor.read_sample().await.unwrap(),
            sensor.read_sample().await.unwrap(),
            sensor.read_sample().await.unwrap(),
            sensor.read_sample().await.unwrap(),
        ];

        assert!((values[0] - 512.0).abs() < 1e-9);
        assert!((values[1] - 612.0).abs() < 1e-9);
        assert!((values[2] - 512.0).abs() < 1e-9);
        assert!((values[3] - 412.0).abs() < 1e-9);
        assert_eq!(sensor.samples_read(), 4);
    }

    #[tokio::test]
    async fn test_offset_and_phase() {
        let mut sensor = SyntheticSensor::new(10.0, 50.0, 1000.0)
            .with_offset(0.0)
            .with_phase(PI / 2.0);
        assert!((sensor.read_sample().await.unwrap() - 50.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_actuate_blocks_for_duration_and_records() {
        let mut sensor = SyntheticSensor::new(38.0, 400.0, 1000.0);
        let start = tokio::time::Instant::now();

        sensor.actuate(Duration::from_millis(38)).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(38));
        assert_eq!(sensor.actuations(), &[Duration::from_millis(38)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_pulse_leaves_actuator_asserted() {
        let mut sensor = SyntheticSensor::new(38.0, 400.0, 1000.0);

        let cancelled = tokio::time::timeout(
            Duration::from_millis(1),
            sensor.actuate(Duration::from_millis(50)),
        )
        .await;
        assert!(cancelled.is_err());

        let err = sensor.actuate(Duration::from_millis(5)).await.unwrap_err();
        assert!(matches!(err, HardwareError::AlreadyAsserted));
        assert!(sensor.actuations().is_empty());
    }
}
