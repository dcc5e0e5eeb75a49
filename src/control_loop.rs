//! Control loop orchestration.
//!
//! The live variant samples the sensor on a fixed cadence, estimates the
//! dominant frequency once a full window is buffered, and fires a pulse on
//! lock. The simulation variant runs the recursive tuner over a fixed
//! horizon. Both publish read-only snapshots to the telemetry channel.

use crate::config::{LiveConfig, SimulationConfig};
use crate::error::ControlError;
use crate::estimator::{FrequencyEstimate, FrequencyEstimator};
use crate::hardware::HardwareIo;
use crate::lock::{LockCriteria, LockState};
use crate::metrics::LoopMetrics;
use crate::pulse::PulseShaper;
use crate::sample_buffer::SampleBuffer;
use crate::telemetry::{Snapshot, TelemetryChannel};
use crate::tuner::{RecursiveTuner, TunerLog};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Why a cycle produced no decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Window not yet full
    BufferFilling,
    /// Fewer than two peaks in the window
    TooFewPeaks,
}

/// Result of one live cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    NoLock {
        estimate: FrequencyEstimate,
        lock: LockState,
    },
    Actuated {
        frequency: f64,
        duration: Duration,
    },
}

/// Live acquisition → estimation → decision → actuation loop.
pub struct ControlLoop<H: HardwareIo> {
    hardware: H,
    buffer: SampleBuffer,
    estimator: FrequencyEstimator,
    criteria: LockCriteria,
    shaper: PulseShaper,
    telemetry: TelemetryChannel,
    metrics: Arc<LoopMetrics>,
    period: Duration,
    telemetry_every: u64,
    cycles_run: u64,
}

impl<H: HardwareIo> ControlLoop<H> {
    /// Build a loop from validated configuration.
    pub fn new(
        config: &LiveConfig,
        hardware: H,
        telemetry: TelemetryChannel,
    ) -> Result<Self, ControlError> {
        config.validate()?;

        Ok(Self {
            hardware,
            buffer: SampleBuffer::with_capacity(config.window_size),
            estimator: FrequencyEstimator::from_config(config),
            criteria: LockCriteria::from_config(config),
            shaper: PulseShaper::from_config(config),
            telemetry,
            metrics: Arc::new(LoopMetrics::new()),
            period: Duration::from_secs_f64(1.0 / config.sample_rate),
            telemetry_every: config.telemetry_every,
            cycles_run: 0,
        })
    }

    #[cfg(test)]
    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn metrics(&self) -> Arc<LoopMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Nominal cycle period (`1 / sample_rate`).
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run one cycle: read, buffer, analyse, and actuate on lock.
    ///
    /// A pulse is awaited to completion before returning, so the next cycle
    /// never starts while the actuator is asserted.
    pub async fn cycle(&mut self) -> Result<CycleOutcome, ControlError> {
        let sample = self.hardware.read_sample().await?;
        self.buffer.push(sample);
        self.cycles_run += 1;

        let Some(window) = self.buffer.snapshot() else {
            self.publish(None, None);
            self.metrics.record_filling();
            return Ok(CycleOutcome::Skipped(SkipReason::BufferFilling));
        };

        let estimate = self.estimator.estimate(&window);
        self.publish(Some(window), Some(estimate));

        let lock = self.criteria.evaluate(&estimate);
        let (Some(frequency), Some(lock)) = (estimate.frequency, lock) else {
            self.metrics.record_no_peaks();
            return Ok(CycleOutcome::Skipped(SkipReason::TooFewPeaks));
        };

        debug!("Frequency: {:.2} Hz ({} peaks)", frequency, estimate.peak_count);

        if !lock.qualifies() {
            self.metrics.record_no_lock();
            return Ok(CycleOutcome::NoLock { estimate, lock });
        }

        let duration = self.shaper.duration(frequency);
        info!(
            "Resonance locked at {:.2} Hz, pulse width {:.3}s",
            frequency,
            duration.as_secs_f64()
        );
        self.hardware.actuate(duration).await?;
        self.metrics.record_actuation(duration);

        Ok(CycleOutcome::Actuated { frequency, duration })
    }

    /// Run cycles at the configured cadence until the stop signal is set.
    ///
    /// The signal is only checked between cycles; hardware errors end the
    /// loop immediately.
    pub async fn run(
        &mut self,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), ControlError> {
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Control loop running every {:?} (window {} samples, pulse {:.3}-{:.3}s)",
            self.period,
            self.buffer.capacity(),
            self.shaper.min_secs(),
            self.shaper.max_secs()
        );

        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Control loop shutting down after {} cycles", self.cycles_run);
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.cycle().await?;
                }
            }
        }

        Ok(())
    }

    /// Publish the current window every `telemetry_every` cycles.
    fn publish(&self, window: Option<Vec<f64>>, estimate: Option<FrequencyEstimate>) {
        if self.telemetry_every == 0 || self.cycles_run % self.telemetry_every != 0 {
            return;
        }
        self.telemetry.observe(Snapshot::Window {
            cycle: self.cycles_run,
            capacity: self.buffer.capacity(),
            samples: window.unwrap_or_else(|| self.buffer.contents()),
            estimate,
        });
    }
}

/// Run the tuning simulation over its fixed horizon.
///
/// Every step is published to telemetry; the finished log is returned.
pub fn run_simulation(
    config: &SimulationConfig,
    telemetry: &TelemetryChannel,
) -> Result<TunerLog, ControlError> {
    config.validate()?;

    let mut tuner = RecursiveTuner::new(config.clone());
    while let Some(record) = tuner.step() {
        telemetry.observe(Snapshot::Tuner(record));
    }

    let log = tuner.finish();
    info!(
        "Simulation finished after {} steps ({} coarse before dither)",
        log.records().len(),
        log.coarse_steps_before_dither()
    );
    Ok(log)
}
