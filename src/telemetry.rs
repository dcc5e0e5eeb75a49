//! Telemetry: best-effort, non-blocking snapshots for an observer task.
//!
//! The control loop publishes copies of its state over a bounded broadcast
//! channel. A lagging observer loses the oldest snapshots; the publisher
//! never waits.

use crate::estimator::FrequencyEstimate;
use crate::tuner::{TunerLog, TunerRecord};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Read-only view handed to the observer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Snapshot {
    /// Sample window of the live loop; may still be filling.
    Window {
        cycle: u64,
        capacity: usize,
        samples: Vec<f64>,
        estimate: Option<FrequencyEstimate>,
    },
    /// One step of the tuning simulation.
    Tuner(TunerRecord),
}

/// Publishing side of the telemetry channel.
#[derive(Debug, Clone)]
pub struct TelemetryChannel {
    tx: broadcast::Sender<Snapshot>,
}

impl TelemetryChannel {
    /// Create a channel holding at most `capacity` unread snapshots.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a snapshot. Never blocks; dropped if nobody is listening.
    pub fn observe(&self, snapshot: Snapshot) {
        let _ = self.tx.send(snapshot);
    }

    /// Attach a new observer.
    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.tx.subscribe()
    }
}

/// Counters kept by the observer task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObserverStats {
    pub received: u64,
    pub dropped: u64,
}

/// Consume snapshots until the channel closes or shutdown is signalled.
///
/// Snapshots are summarised at debug level and, when `trace_path` is set,
/// appended to a JSON-lines file.
pub async fn run_observer(
    mut rx: broadcast::Receiver<Snapshot>,
    mut shutdown_rx: watch::Receiver<bool>,
    trace_path: Option<PathBuf>,
) -> std::io::Result<ObserverStats> {
    let mut trace = match trace_path {
        Some(path) => {
            info!("Writing telemetry trace to {:?}", path);
            Some(BufWriter::new(File::create(path).await?))
        }
        None => None,
    };

    let mut stats = ObserverStats::default();

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    drain(&mut rx, &mut trace, &mut stats).await?;
                    break;
                }
            }
            received = rx.recv() => {
                match received {
                    Ok(snapshot) => record(&snapshot, &mut trace, &mut stats).await?,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        stats.dropped += skipped;
                        debug!("Telemetry observer lagged, dropped {} snapshots", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    if let Some(writer) = trace.as_mut() {
        writer.flush().await?;
    }

    if stats.dropped > 0 {
        warn!(
            "Telemetry observer dropped {} of {} snapshots",
            stats.dropped,
            stats.received + stats.dropped
        );
    }

    Ok(stats)
}

/// Record everything already queued, counting snapshots lost to lag.
async fn drain(
    rx: &mut broadcast::Receiver<Snapshot>,
    trace: &mut Option<BufWriter<File>>,
    stats: &mut ObserverStats,
) -> std::io::Result<()> {
    loop {
        match rx.try_recv() {
            Ok(snapshot) => record(&snapshot, trace, stats).await?,
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => stats.dropped += skipped,
            Err(broadcast::error::TryRecvError::Empty)
            | Err(broadcast::error::TryRecvError::Closed) => return Ok(()),
        }
    }
}

async fn record(
    snapshot: &Snapshot,
    trace: &mut Option<BufWriter<File>>,
    stats: &mut ObserverStats,
) -> std::io::Result<()> {
    stats.received += 1;

    match snapshot {
        Snapshot::Window {
            cycle,
            capacity,
            samples,
            estimate,
        } => {
            let (lo, hi) = samples
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(*v), hi.max(*v))
                });
            debug!(
                "cycle {}: window {}/{} range [{:.1}, {:.1}] frequency {:?}",
                cycle,
                samples.len(),
                capacity,
                lo,
                hi,
                estimate.and_then(|e| e.frequency)
            );
        }
        Snapshot::Tuner(r) => {
            debug!(
                "step {}: {:.3} Hz gain {:.4} v {:.4} x {:.4} ({:?})",
                r.step, r.frequency, r.gain, r.velocity, r.position, r.regime
            );
        }
    }

    if let Some(writer) = trace.as_mut() {
        let mut line = serde_json::to_vec(snapshot)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
    }

    Ok(())
}

/// Write every record of a finished simulation as JSON lines.
pub async fn write_tuner_trace(path: &Path, log: &TunerLog) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path).await?);
    for record in log.records() {
        let mut line = serde_json::to_vec(&Snapshot::Tuner(*record))?;
        line.push(b'\n');
        writer.write_all(&line).await?;
    }
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuner::Regime;
    use tempfile::tempdir;

    fn tuner_snapshot(step: u64) -> Snapshot {
        Snapshot::Tuner(TunerRecord {
            step,
            frequency: 300.0 + step as f64 * 0.5,
            gain: 0.1,
            velocity: 0.0,
            position: 0.0,
            regime: Regime::Coarse,
        })
    }

    #[test]
    fn test_observe_without_subscribers_does_not_fail() {
        let channel = TelemetryChannel::new(4);
        channel.observe(tuner_snapshot(0));
    }

    #[test]
    fn test_lagging_observer_loses_oldest() {
        let channel = TelemetryChannel::new(2);
        let mut rx = channel.subscribe();

        for step in 0..5 {
            channel.observe(tuner_snapshot(step));
        }

        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(3))
        ));
        match rx.try_recv() {
            Ok(Snapshot::Tuner(r)) => assert_eq!(r.step, 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_observer_writes_json_lines_until_closed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        let channel = TelemetryChannel::new(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let observer = tokio::spawn(run_observer(
            channel.subscribe(),
            shutdown_rx,
            Some(path.clone()),
        ));

        for step in 0..3 {
            channel.observe(tuner_snapshot(step));
        }
        channel.observe(Snapshot::Window {
            cycle: 7,
            capacity: 4,
            samples: vec![1.0, 2.0],
            estimate: None,
        });
        drop(channel);

        let stats = observer.await.unwrap().unwrap();
        assert_eq!(stats, ObserverStats { received: 4, dropped: 0 });

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["kind"], "tuner");
        assert_eq!(lines[2]["step"], 2);
        assert_eq!(lines[3]["kind"], "window");
        assert_eq!(lines[3]["samples"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_observer_stops_on_shutdown() {
        let channel = TelemetryChannel::new(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let observer = tokio::spawn(run_observer(channel.subscribe(), shutdown_rx, None));

        channel.observe(tuner_snapshot(0));
        shutdown_tx.send(true).unwrap();

        let stats = observer.await.unwrap().unwrap();
        assert!(stats.received <= 1);
        // channel is still open; the observer left because of the signal
        channel.observe(tuner_snapshot(1));
    }

    #[tokio::test]
    async fn test_drain_continues_past_lag() {
        let channel = TelemetryChannel::new(2);
        let mut rx = channel.subscribe();
        for step in 0..5 {
            channel.observe(tuner_snapshot(step));
        }

        let mut stats = ObserverStats::default();
        drain(&mut rx, &mut None, &mut stats).await.unwrap();

        assert_eq!(stats, ObserverStats { received: 2, dropped: 3 });
    }

    #[tokio::test]
    async fn test_tuner_trace_holds_every_step() {
        use crate::config::SimulationConfig;
        use crate::tuner::RecursiveTuner;

        let dir = tempdir().unwrap();
        let path = dir.path().join("sim.jsonl");
        let config = SimulationConfig {
            max_steps: 25,
            ..SimulationConfig::default()
        };
        let log = RecursiveTuner::new(config).run();

        write_tuner_trace(&path, &log).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let steps: Vec<u64> = contents
            .lines()
            .map(|l| {
                let value: serde_json::Value = serde_json::from_str(l).unwrap();
                value["step"].as_u64().unwrap()
            })
            .collect();
        assert_eq!(steps, (0..25).collect::<Vec<u64>>());
    }
}
