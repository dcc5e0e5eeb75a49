//! Resonance tracker - closed-loop resonance tracking and actuation.
//!
//! The `live` mode samples a vibration sensor, estimates the dominant
//! frequency of the most recent window and fires a frequency-modulated pulse
//! when the signal locks onto the target band. The `simulate` mode runs the
//! recursive tuner against a modelled feedback response.

mod config;
mod control_loop;
mod error;
mod estimator;
mod gpio_adc;
mod hardware;
mod lock;
mod logging;
mod metrics;
mod pulse;
mod sample_buffer;
mod telemetry;
mod tuner;

use clap::{Parser, Subcommand};
use config::Config;
use control_loop::ControlLoop;
use gpio_adc::LinuxHardware;
use hardware::{HardwareIo, SyntheticSensor};
use std::path::PathBuf;
use std::time::Duration;
use telemetry::{run_observer, TelemetryChannel};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Graceful shutdown timeout for the observer task, in seconds
const SHUTDOWN_TIMEOUT_SECS: u64 = 2;

/// Resonance tracking controller
#[derive(Parser, Debug)]
#[command(name = "resonance-tracker")]
#[command(about = "Track a mechanical resonance and fire pulses on lock")]
#[command(version)]
struct Args {
    /// Configuration file (JSON)
    #[arg(long, value_name = "FILE", env = "RESONANCE_TRACKER_CONFIG")]
    config: Option<PathBuf>,

    /// Also write logs to a rotating file in the local data directory
    #[arg(long)]
    log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the live sensing and actuation loop
    Live {
        /// Use a synthetic sine sensor instead of the SPI ADC and GPIO pin
        #[arg(long)]
        synthetic: bool,

        /// Frequency of the synthetic sensor (Hz)
        #[arg(long, default_value = "38.0")]
        synthetic_frequency: f64,

        /// Amplitude of the synthetic sensor around mid-scale
        #[arg(long, default_value = "400.0")]
        synthetic_amplitude: f64,

        /// DC offset of the synthetic sensor (ADC counts)
        #[arg(long, default_value = "512.0")]
        synthetic_offset: f64,

        /// Write telemetry snapshots as JSON lines
        #[arg(long, value_name = "FILE")]
        trace: Option<PathBuf>,
    },
    /// Run the recursive tuning simulation
    Simulate {
        /// Write every simulation step as JSON lines
        #[arg(long, value_name = "FILE")]
        trace: Option<PathBuf>,
    },
    /// Write the default configuration file
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let _log_guard = logging::init_logging(args.log_file).map_err(|e| {
        eprintln!("Failed to initialize logging: {}", e);
        e
    })?;

    info!("Resonance tracker starting...");

    let result = run(args).await;

    match &result {
        Ok(()) => info!("Resonance tracker shut down gracefully"),
        Err(e) => error!("Resonance tracker error: {}", e),
    }

    result
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = args.config.unwrap_or_else(Config::default_path);

    if let Command::InitConfig = args.command {
        Config::default().save(&config_path)?;
        info!("Default configuration written to {:?}", config_path);
        return Ok(());
    }

    let config = Config::load_or_default(&config_path)?;
    info!("Configuration loaded from {:?}", config_path);

    match args.command {
        Command::Live {
            synthetic,
            synthetic_frequency,
            synthetic_amplitude,
            synthetic_offset,
            trace,
        } => {
            if synthetic {
                let sensor = SyntheticSensor::new(
                    synthetic_frequency,
                    synthetic_amplitude,
                    config.live.sample_rate,
                )
                .with_offset(synthetic_offset);
                run_live(&config, sensor, trace).await
            } else {
                let hardware = LinuxHardware::open(&config.hardware)?;
                run_live(&config, hardware, trace).await
            }
        }
        Command::Simulate { trace } => run_simulate(&config, trace).await,
        Command::InitConfig => Ok(()),
    }
}

/// Run the live loop until SIGINT/SIGTERM or a hardware failure.
async fn run_live<H: HardwareIo>(
    config: &Config,
    hardware: H,
    trace: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let telemetry = TelemetryChannel::new(config.telemetry.capacity);
    let mut control = ControlLoop::new(&config.live, hardware, telemetry.clone())?;
    let metrics = control.metrics();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = setup_signal_handlers(signal_tx).await {
            error!("Signal handler error: {}", e);
        }
    });

    let observer = spawn_observer(&telemetry, shutdown_rx.clone(), trace);
    drop(telemetry);

    info!(
        "Resonance tracker initialized, sampling every {:?}",
        control.period()
    );
    let result = control.run(shutdown_rx).await;

    // Stop the observer whether the loop ended by signal or by error
    let _ = shutdown_tx.send(true);
    drop(control);
    join_observer(observer).await;

    let summary = metrics.snapshot();
    info!(
        cycles = summary.cycles,
        actuations = summary.actuations,
        lock_toggles = summary.lock_toggles,
        total_pulse_sec = summary.total_pulse_sec,
        "Control loop summary"
    );

    result.map_err(Into::into)
}

/// Run the fixed-horizon simulation and report the final kinematic state.
async fn run_simulate(
    config: &Config,
    trace: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let telemetry = TelemetryChannel::new(config.telemetry.capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let observer = spawn_observer(&telemetry, shutdown_rx, None);

    let sim_config = config.simulation.clone();

    // The tuner is CPU-bound; keep it off the async workers
    let log = tokio::task::spawn_blocking(move || {
        control_loop::run_simulation(&sim_config, &telemetry)
    })
    .await??;

    join_observer(observer).await;
    drop(shutdown_tx);

    // The live observer may drop steps; the trace comes from the full log
    if let Some(path) = trace {
        telemetry::write_tuner_trace(&path, &log).await?;
        info!("Simulation trace written to {:?}", path);
    }

    let final_state = log.final_state();
    info!(
        steps = log.records().len(),
        coarse_steps = log.coarse_steps_before_dither(),
        final_frequency = final_state.candidate_frequency,
        "Simulation complete"
    );
    println!("Final Velocity (m/s): {}", final_state.velocity);
    println!("Final Position (m): {}", final_state.position);

    Ok(())
}

fn spawn_observer(
    telemetry: &TelemetryChannel,
    shutdown_rx: watch::Receiver<bool>,
    trace: Option<PathBuf>,
) -> JoinHandle<std::io::Result<telemetry::ObserverStats>> {
    tokio::spawn(run_observer(telemetry.subscribe(), shutdown_rx, trace))
}

async fn join_observer(observer: JoinHandle<std::io::Result<telemetry::ObserverStats>>) {
    let timeout = Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);
    match tokio::time::timeout(timeout, observer).await {
        Ok(Ok(Ok(stats))) => info!(
            received = stats.received,
            dropped = stats.dropped,
            "Telemetry observer stopped"
        ),
        Ok(Ok(Err(e))) => warn!("Telemetry trace failed: {}", e),
        Ok(Err(e)) => error!("Telemetry observer task failed: {}", e),
        Err(_) => warn!("Telemetry observer did not stop within {:?}", timeout),
    }
}

/// Set up signal handlers for graceful shutdown.
/// Handles SIGTERM and SIGINT.
#[cfg(unix)]
async fn setup_signal_handlers(
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    let _ = shutdown_tx.send(true);
    Ok(())
}

/// Ctrl+C handler for non-Unix platforms
#[cfg(not(unix))]
async fn setup_signal_handlers(
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    let _ = shutdown_tx.send(true);
    Ok(())
}
