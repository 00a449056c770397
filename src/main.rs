// src/main.rs
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mocap_filter::data::DataExporter;
use mocap_filter::{FilterConfig, FrameSource, MocapSession, ReplaySource, SessionConfig, SimulatedSource};

#[derive(Parser, Debug)]
#[command(name = "mocap_filter", version, about = "Kalman smoothing for body-tracking joint streams")]
struct Cli {
    /// Session configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tracking frame rate, overrides the configured dt
    #[arg(long)]
    fps: Option<f64>,

    #[arg(long)]
    sensor_noise: Option<f64>,

    #[arg(long)]
    accel_noise: Option<f64>,

    /// Re-symmetrize the covariance after each update
    #[arg(long)]
    symmetrize: bool,

    /// Skip floor tilt correction
    #[arg(long)]
    no_tilt: bool,

    /// Feed inferred joints to the filters as well
    #[arg(long)]
    keep_inferred: bool,

    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long)]
    session: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Filter a recorded capture
    Replay { input: PathBuf },
    /// Filter a synthetic skeleton
    Simulate {
        #[arg(long, default_value_t = 300)]
        frames: u64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = 0.02)]
        noise: f64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;

    match &cli.command {
        Command::Replay { input } => run(&cli, config, ReplaySource::from_csv(input)),
        Command::Simulate { frames, seed, noise } => {
            let source = SimulatedSource::new(config.filter.dt, *frames, *seed).with_noise(*noise);
            run(&cli, config, source)
        }
    }
}

fn build_config(cli: &Cli) -> Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SessionConfig::default(),
    };

    if let Some(fps) = cli.fps {
        config.filter.dt = FilterConfig::with_fps(fps)?.dt;
    }
    if let Some(noise) = cli.sensor_noise {
        config.filter.sensor_noise = noise;
    }
    if let Some(noise) = cli.accel_noise {
        config.filter.accel_noise = noise;
    }
    config.filter.symmetrize |= cli.symmetrize;
    if cli.no_tilt {
        config.tilt_correction = false;
    }
    if cli.keep_inferred {
        config.require_tracked = false;
    }
    if let Some(dir) = &cli.output {
        config.output_directory = dir.clone();
    }

    config.filter.validate()?;
    Ok(config)
}

fn run<S: FrameSource>(cli: &Cli, config: SessionConfig, source: S) -> Result<()> {
    let mut exporter = DataExporter::new(&config.output_directory, cli.session.clone());
    let mut session = MocapSession::new(config, source);

    if !session.open()? {
        bail!("Failed to open frame source");
    }

    while let Some(frame) = session.poll().context("Frame processing failed")? {
        exporter.add_frame(frame);
    }
    session.close();

    if exporter.frame_count() == 0 {
        warn!("no frames captured, nothing to export");
        return Ok(());
    }

    let csv_path = exporter.export_csv().context("Failed to export CSV")?;
    let summary_path = exporter.export_summary().context("Failed to export summary")?;

    let summary = exporter.summary();
    for (joint, stats) in &summary.joints {
        info!(
            joint = %joint,
            samples = stats.samples,
            raw_jitter = stats.raw_jitter,
            filtered_jitter = stats.filtered_jitter,
            "joint summary"
        );
    }
    println!("Filtered {} frames", summary.frames);
    println!("  joints:  {}", csv_path.display());
    println!("  summary: {}", summary_path.display());
    Ok(())
}
