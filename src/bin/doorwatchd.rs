//! doorwatchd - doorway monitor daemon
//!
//! This daemon:
//! 1. Loads configuration (TOML file, environment, command line)
//! 2. Opens the configured frame source
//! 3. Runs every frame through motion detection and door-state classification
//! 4. Prints one report line per frame to stdout
//! 5. Raises an alert when the door has been open and unattended too long

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use doorwatch::{
    open_source, run_monitor, AlertPolicy, AlertingReporter, DoorMonitor, DoorwatchdConfig,
    LineReporter, LogAlertSink, MqttAlertSink, ReportFormat, ReportSink, RunOptions,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TOML configuration file.
    #[arg(long, env = "DOORWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Frame source URL (stub://, rtsp://, http://, or a local path).
    #[arg(long)]
    source: Option<String>,
    /// Report line format.
    #[arg(long)]
    format: Option<ReportFormat>,
    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = DoorwatchdConfig::load_from(args.config.as_deref())?;
    if let Some(source) = args.source {
        cfg.source.url = source;
    }
    if let Some(format) = args.format {
        cfg.report_format = format;
    }
    cfg.validate()?;

    log::info!(
        "doorwatchd {} starting: source={} nominal_fps={} format={:?}",
        env!("CARGO_PKG_VERSION"),
        cfg.source.url,
        cfg.source.target_fps,
        cfg.report_format
    );
    log::info!(
        "left door {}, right door {}, movement cutoff {}, color cutoff {}",
        cfg.monitor.left_door,
        cfg.monitor.right_door,
        cfg.monitor.movement_cutoff,
        cfg.monitor.color_cutoff
    );

    let mut source = open_source(&cfg.source, &cfg.monitor)?;
    source
        .connect()
        .with_context(|| format!("connect to {}", cfg.source.url))?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .context("install Ctrl-C handler")?;
    }

    let lines = LineReporter::stdout(cfg.report_format);
    let mut sink: Box<dyn ReportSink> = match cfg.alert.frames_threshold {
        Some(threshold) => {
            log::info!("alerting after {} unattended open frames", threshold);
            let mut reporter = AlertingReporter::new(lines, AlertPolicy::new(threshold))
                .with_sink(Box::new(LogAlertSink));
            if let Some(mqtt) = &cfg.alert.mqtt {
                let mqtt_sink = MqttAlertSink::connect(mqtt)?;
                log::info!("publishing alerts to {}", mqtt_sink.topic());
                reporter = reporter.with_sink(Box::new(mqtt_sink));
            }
            Box::new(reporter)
        }
        None => Box::new(lines),
    };

    let mut monitor = DoorMonitor::new(&cfg.monitor);
    let options = RunOptions {
        max_frames: args.max_frames,
        stop: Some(stop),
        ..RunOptions::default()
    };
    let summary = run_monitor(source.as_mut(), &mut monitor, sink.as_mut(), &options)?;

    log::info!(
        "doorwatchd stopped ({:?}): ingested={} reported={} last_movement={} last_closed={}",
        summary.stop_reason,
        summary.frames_ingested,
        summary.frames_reported,
        monitor.timers().frames_since_movement,
        monitor.timers().frames_since_closed
    );
    Ok(())
}
