//! demo - scripted synthetic doorway run
//!
//! Renders a doorway scene (closed, opened with someone walking through, left
//! propped open, one leaf ajar) and prints the per-frame report lines.

use anyhow::{anyhow, Result};
use clap::Parser;

use doorwatch::ingest::{FrameSource, SyntheticScene, SyntheticSource};
use doorwatch::{
    run_monitor, AlertPolicy, AlertingReporter, DoorMonitor, LineReporter, LogAlertSink,
    MonitorConfig, ReportFormat, ReportSink, RunOptions,
};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Number of synthetic frames to run.
    #[arg(long, default_value_t = 100)]
    frames: u64,
    /// Report line format.
    #[arg(long, default_value = "text")]
    format: ReportFormat,
    /// Alert once the door has been open and still for this many frames.
    #[arg(long)]
    alert_frames: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.alert_frames == Some(0) {
        return Err(anyhow!("alert-frames must be >= 1"));
    }

    let config = MonitorConfig::default();
    config.validate_for_frame(WIDTH, HEIGHT)?;

    stage("render synthetic doorway");
    let scene = SyntheticScene::doorway(WIDTH, HEIGHT, &config);
    let mut source = SyntheticSource::new(scene, Some(args.frames));
    source.connect()?;

    stage("run monitor");
    let lines = LineReporter::stdout(args.format);
    let mut sink: Box<dyn ReportSink> = match args.alert_frames {
        Some(threshold) => Box::new(
            AlertingReporter::new(lines, AlertPolicy::new(threshold))
                .with_sink(Box::new(LogAlertSink)),
        ),
        None => Box::new(lines),
    };
    let mut monitor = DoorMonitor::new(&config);
    let summary = run_monitor(
        &mut source,
        &mut monitor,
        sink.as_mut(),
        &RunOptions::default(),
    )?;

    stage("done");
    eprintln!(
        "frames ingested: {}, reports: {}, stop: {:?}",
        summary.frames_ingested, summary.frames_reported, summary.stop_reason
    );
    Ok(())
}

fn stage(msg: &str) {
    eprintln!("demo: {}", msg);
}
