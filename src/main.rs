//! CLI entry point for scan_daq.
//!
//! Runs the scanning core against simulated hardware:
//!
//! ```bash
//! scan_daq constraints
//! scan_daq scan --axis x --range 0 20e-6 --resolution 40 --slow-axis y --slow-range 0 20e-6 --slow-resolution 40 --frequency 200
//! scan_daq monitor --duration-ms 2000
//! scan_daq default-config > config/scanner.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scan_daq::config::{ScannerConfig, DEFAULT_CONFIG_PATH};
use scan_daq::hardware::mock::{
    MockActuator, MockActuatorBuilder, MockDetector, MockMode, MockModeController,
};
use scan_daq::logging;
use scan_daq::model::{AxisPosition, ScanSettings};
use scan_daq::monitor::{CountMonitor, PositionMonitor};
use scan_daq::poll::PollLoop;
use scan_daq::runner::ScanLogic;
use scan_daq::session::ScanSession;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "scan_daq")]
#[command(about = "Confocal scanning core on simulated hardware", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/scanner.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the scanner constraints as JSON
    Constraints,

    /// Print the built-in configuration as TOML
    DefaultConfig,

    /// Run a 1-D or 2-D scan
    Scan {
        /// Fast axis
        #[arg(long)]
        axis: String,
        /// Fast axis range
        #[arg(long, num_args = 2, allow_negative_numbers = true)]
        range: Vec<f64>,
        /// Points per line
        #[arg(long)]
        resolution: usize,
        /// Slow axis, omitted for a line scan
        #[arg(long, requires_all = ["slow_range", "slow_resolution"])]
        slow_axis: Option<String>,
        #[arg(long, num_args = 2, allow_negative_numbers = true)]
        slow_range: Option<Vec<f64>>,
        #[arg(long)]
        slow_resolution: Option<usize>,
        /// Fast-axis sample rate in Hz
        #[arg(long)]
        frequency: f64,
        /// Write the final snapshot as JSON
        #[arg(long)]
        output: Option<PathBuf>,
        /// Simulate settle and integration times
        #[arg(long)]
        realistic: bool,
    },

    /// Poll position and count rates for a while
    Monitor {
        #[arg(long, default_value = "1000")]
        duration_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Constraints => {
            println!("{}", serde_json::to_string_pretty(&config.constraints())?);
            Ok(())
        }
        Commands::DefaultConfig => {
            print!("{}", ScannerConfig::default().to_toml_string()?);
            Ok(())
        }
        Commands::Scan {
            axis,
            range,
            resolution,
            slow_axis,
            slow_range,
            slow_resolution,
            frequency,
            output,
            realistic,
        } => {
            let mut settings = ScanSettings::line(axis, (range[0], range[1]), resolution, frequency);
            if let (Some(slow), Some(slow_range), Some(slow_resolution)) =
                (slow_axis, slow_range, slow_resolution)
            {
                settings.axes.push(slow);
                settings.ranges.push((slow_range[0], slow_range[1]));
                settings.resolution.push(slow_resolution);
            }
            run_scan(&config, settings, output, realistic).await
        }
        Commands::Monitor { duration_ms } => run_monitor(&config, Duration::from_millis(duration_ms)).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<ScannerConfig> {
    let path = match path {
        Some(path) => path,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Path::new(DEFAULT_CONFIG_PATH),
        None => return Ok(ScannerConfig::default()),
    };
    ScannerConfig::load_validated(path).with_context(|| format!("loading {}", path.display()))
}

/// Mock stage plus a detector imaging a square lattice of bright emitters.
fn simulated_hardware(config: &ScannerConfig, realistic: bool) -> (MockActuator, MockDetector) {
    let mode = if realistic { MockMode::Realistic } else { MockMode::Instant };
    let actuator = MockActuatorBuilder::from_constraints(&config.constraints())
        .mode(mode)
        .build();

    let position = actuator.clone();
    let detector = MockDetector::builder()
        .channels(config.detector_inputs())
        .signal(emitter_lattice)
        .position_source(move || position.position())
        .noise(0.05)
        .mode(mode)
        .build();
    (actuator, detector)
}

fn emitter_lattice(channel: u32, position: &AxisPosition) -> f64 {
    const PITCH: f64 = 10e-6;
    const WIDTH: f64 = 0.6e-6;
    let offset = |axis: &str| {
        let value = position.get(axis).copied().unwrap_or(0.0);
        value - (value / PITCH).round() * PITCH
    };
    let r2 = offset("x").powi(2) + offset("y").powi(2);
    let brightness = if channel == 0 { 4.0e5 } else { 2.5e5 };
    2.0e3 + brightness * (-r2 / (2.0 * WIDTH * WIDTH)).exp()
}

async fn run_scan(
    config: &ScannerConfig,
    settings: ScanSettings,
    output: Option<PathBuf>,
    realistic: bool,
) -> Result<()> {
    let (actuator, detector) = simulated_hardware(config, realistic);
    let session = ScanSession::builder(config.constraints())
        .actuator(Arc::new(actuator))
        .detector(Arc::new(detector))
        .mode_controller(Arc::new(MockModeController::new()))
        .move_policy(config.scanner.move_policy)
        .build()
        .await?;

    let logic = ScanLogic::new(Arc::new(session), config.polling.scan_poll());
    let settings = logic.configure_scan(settings).await?;
    let lines = settings.line_count();

    let mut updates = logic.subscribe();
    logic.start_scan().await?;
    info!(axes = ?settings.axes, lines, "scanning");

    while let Ok(snapshot) = updates.recv().await {
        info!(line = snapshot.lines_completed, of = lines, "line done");
        if snapshot.is_complete() {
            break;
        }
    }
    logic.wait_finished().await?;

    let snapshot = logic
        .session()
        .get_scan_data()
        .await
        .context("scan produced no data")?;
    if !snapshot.failed_lines.is_empty() {
        tracing::warn!(lines = ?snapshot.failed_lines, "some lines failed");
    }
    for channel in &snapshot.channels {
        let (sum, count) = channel
            .values
            .iter()
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
        let max = channel.values.iter().copied().fold(f64::NAN, f64::max);
        println!(
            "{:>8}: mean {:>12.1} {}  max {:>12.1} {}",
            channel.name,
            if count > 0 { sum / count as f64 } else { f64::NAN },
            channel.unit,
            max,
            channel.unit
        );
    }

    if let Some(path) = output {
        let file = std::fs::File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), &snapshot)?;
        info!(path = %path.display(), "snapshot written");
    }

    logic.shutdown().await
}

async fn run_monitor(config: &ScannerConfig, duration: Duration) -> Result<()> {
    let (actuator, detector) = simulated_hardware(config, false);
    let poll = config.polling.query_poll();

    let positions = PollLoop::spawn(PositionMonitor::new(Arc::new(actuator)), poll);
    let counts = PollLoop::spawn(
        CountMonitor::new(
            Arc::new(detector),
            config.constraints().channels().to_vec(),
            poll.interval.as_secs_f64().max(1e-3),
        ),
        poll,
    );

    let mut position_rx = positions.subscribe();
    let mut count_rx = counts.subscribe();
    positions.start().await?;
    counts.start().await?;

    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            Ok(position) = position_rx.recv() => info!(?position, "position"),
            Ok(sample) = count_rx.recv() => info!(rates = ?sample.rates, "counts"),
        }
    }

    positions.shutdown().await?;
    counts.shutdown().await
}
