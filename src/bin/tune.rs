// src/bin/tune.rs
//! Sweeps sensor/acceleration noise over a capture and reports how smooth
//! and how accurate the filtered joints come out.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mocap_filter::data::DataExporter;
use mocap_filter::{FrameSource, MocapSession, ReplaySource, SessionConfig, SimulatedSource};

#[derive(Parser, Debug)]
#[command(name = "mocap_tune", about = "Noise parameter sweep for the joint filters")]
struct Args {
    /// Recorded capture; a synthetic skeleton is used when omitted
    #[arg(long)]
    input: Option<PathBuf>,

    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    #[arg(long, value_delimiter = ',', default_values_t = [0.0001, 0.0005, 0.002])]
    sensor_noise: Vec<f64>,

    #[arg(long, value_delimiter = ',', default_values_t = [1.0, 3.0, 10.0])]
    accel_noise: Vec<f64>,

    #[arg(long, default_value_t = 300)]
    frames: u64,
}

struct Score {
    raw_jitter: f64,
    filtered_jitter: f64,
    rms_error: Option<f64>,
}

fn score<S: FrameSource>(config: SessionConfig, source: S, truth: bool) -> Result<Score> {
    let mut exporter = DataExporter::new(&config.output_directory, Some("tune".to_string()));
    let dt = config.filter.dt;
    let mut session = MocapSession::new(config, source);
    if !session.open()? {
        bail!("Failed to open frame source");
    }

    let mut squared = 0.0;
    let mut count = 0usize;
    while let Some(frame) = session.poll()? {
        if truth {
            let t = frame.index as f64 * dt;
            for joint in &frame.joints {
                if let Some(filtered) = joint.filtered {
                    let expected = SimulatedSource::true_position(joint.joint, t);
                    squared += (filtered - expected).norm_squared();
                    count += 1;
                }
            }
        }
        exporter.add_frame(frame);
    }
    session.close();

    let summary = exporter.summary();
    let n = summary.joints.len().max(1) as f64;
    Ok(Score {
        raw_jitter: summary.joints.values().map(|j| j.raw_jitter).sum::<f64>() / n,
        filtered_jitter: summary.joints.values().map(|j| j.filtered_jitter).sum::<f64>() / n,
        rms_error: (truth && count > 0).then(|| (squared / count as f64).sqrt()),
    })
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();
    let base = SessionConfig {
        filter: mocap_filter::FilterConfig::with_fps(args.fps)?,
        ..SessionConfig::default()
    };

    println!("{:>12} {:>12} {:>12} {:>12} {:>12}", "sensor", "accel", "raw jitter", "filt jitter", "rms error");
    for &sensor_noise in &args.sensor_noise {
        for &accel_noise in &args.accel_noise {
            let mut config = base.clone();
            config.filter.sensor_noise = sensor_noise;
            config.filter.accel_noise = accel_noise;
            config.filter.validate()?;

            let result = match &args.input {
                Some(path) => score(config, ReplaySource::from_csv(path), false)?,
                None => {
                    let source = SimulatedSource::new(config.filter.dt, args.frames, 42);
                    score(config, source, true)?
                }
            };

            println!(
                "{:>12.5} {:>12.2} {:>12.6} {:>12.6} {:>12}",
                sensor_noise,
                accel_noise,
                result.raw_jitter,
                result.filtered_jitter,
                result
                    .rms_error
                    .map_or_else(|| "-".to_string(), |e| format!("{:.6}", e)),
            );
        }
    }
    Ok(())
}
