//! Per-frame orchestration and the acquisition loop.
//!
//! `DoorMonitor` owns the only mutable state of the pipeline: the previous
//! grayscale frame and the two elapsed-frame counters. `run_monitor` pulls
//! frames from a `FrameSource`, feeds them through the monitor and hands every
//! report to a `ReportSink`.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::MonitorConfig;
use crate::door::{DoorClassifier, DoorError};
use crate::frame::{Frame, GrayFrame};
use crate::ingest::{FrameSource, IngestError};
use crate::motion::{DifferenceEngine, MotionError};
use crate::report::{FrameReport, ReportSink};
use crate::timers::{TimerState, TimerTracker};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Motion(#[from] MotionError),
    #[error(transparent)]
    Door(#[from] DoorError),
}

/// The first frame only seeds the comparison baseline.
#[derive(Debug)]
pub enum MonitorState {
    AwaitingFirstFrame,
    Running { previous: GrayFrame },
}

pub struct DoorMonitor {
    engine: DifferenceEngine,
    classifier: DoorClassifier,
    timers: TimerTracker,
    state: MonitorState,
}

impl DoorMonitor {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            engine: DifferenceEngine::from_config(config),
            classifier: DoorClassifier::from_config(config),
            timers: TimerTracker::new(config.movement_cutoff),
            state: MonitorState::AwaitingFirstFrame,
        }
    }

    /// Process one frame. Returns `None` for the first frame of a stream.
    ///
    /// On error the monitor state is left untouched.
    pub fn process(&mut self, frame: &Frame) -> Result<Option<FrameReport>, MonitorError> {
        let current = frame.to_grayscale();
        let previous = match &self.state {
            MonitorState::AwaitingFirstFrame => {
                self.state = MonitorState::Running { previous: current };
                return Ok(None);
            }
            MonitorState::Running { previous } => previous,
        };

        let motion = self.engine.compute_motion(previous, &current)?;
        let door = self.classifier.classify(frame)?;
        let timers = self.timers.update(motion, door.closed);
        self.state = MonitorState::Running { previous: current };

        log::debug!(
            "frame {}: motion={} left_distance={:.2} right_distance={:.2} closed={}",
            frame.sequence(),
            motion,
            door.left_distance,
            door.right_distance,
            door.closed
        );

        Ok(Some(FrameReport {
            sequence: frame.sequence(),
            motion,
            left_distance: door.left_distance,
            right_distance: door.right_distance,
            door_closed: door.closed,
            timers,
        }))
    }

    pub fn timers(&self) -> TimerState {
        self.timers.state()
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, MonitorState::Running { .. })
    }
}

// ----------------------------------------------------------------------------
// Acquisition loop
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    StreamEnded,
    RetrieveFailed(String),
    Stopped,
    FrameLimit,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_ingested: u64,
    pub frames_reported: u64,
    pub stop_reason: StopReason,
}

#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Stop after this many ingested frames.
    pub max_frames: Option<u64>,
    /// Checked between frames.
    pub stop: Option<Arc<AtomicBool>>,
    pub health_log_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_frames: None,
            stop: None,
            health_log_interval: Duration::from_secs(5),
        }
    }
}

impl RunOptions {
    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

/// Pull frames until the source ends or fails, a stop is requested, or the
/// frame limit is reached.
///
/// Source failures end the run with `Ok`; monitor and sink errors are returned.
pub fn run_monitor<S: FrameSource + ?Sized>(
    source: &mut S,
    monitor: &mut DoorMonitor,
    sink: &mut dyn ReportSink,
    options: &RunOptions,
) -> Result<RunSummary> {
    let mut frames_ingested = 0u64;
    let mut frames_reported = 0u64;
    let mut last_health_log = Instant::now();

    let stop_reason = loop {
        if options.stop_requested() {
            log::info!("stop requested");
            break StopReason::Stopped;
        }
        if options
            .max_frames
            .is_some_and(|limit| frames_ingested >= limit)
        {
            break StopReason::FrameLimit;
        }

        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(IngestError::StreamEnded) => {
                log::info!("stream ended after {} frames", frames_ingested);
                break StopReason::StreamEnded;
            }
            Err(err) => {
                log::warn!("frame retrieval failed: {}", err);
                break StopReason::RetrieveFailed(err.to_string());
            }
        };
        frames_ingested += 1;

        if let Some(report) = monitor
            .process(&frame)
            .with_context(|| format!("process frame {}", frame.sequence()))?
        {
            sink.report(&report)?;
            frames_reported += 1;
        }

        if last_health_log.elapsed() >= options.health_log_interval {
            let stats = source.stats();
            log::info!(
                "source health={} frames={} source={}",
                source.is_healthy(),
                stats.frames_captured,
                stats.source
            );
            last_health_log = Instant::now();
        }
    };

    Ok(RunSummary {
        frames_ingested,
        frames_reported,
        stop_reason,
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::door::Region;
    use crate::ingest::ReplaySource;
    use image::{Rgb, RgbImage};

    const DOOR: [u8; 3] = [115, 113, 73];

    fn config() -> MonitorConfig {
        MonitorConfig {
            left_door: Region::new(4, 20, 8, 10),
            right_door: Region::new(20, 20, 8, 10),
            ..MonitorConfig::default()
        }
    }

    fn doorway(left: [u8; 3], right: [u8; 3], block: Option<[u8; 3]>, sequence: u64) -> Frame {
        let cfg = config();
        let mut img = RgbImage::from_pixel(32, 32, Rgb([50, 50, 50]));
        for (region, color) in [(cfg.left_door, left), (cfg.right_door, right)] {
            for y in region.y..region.y + region.height {
                for x in region.x..region.x + region.width {
                    img.put_pixel(x, y, Rgb(color));
                }
            }
        }
        if let Some(color) = block {
            for y in 2..16 {
                for x in 2..30 {
                    img.put_pixel(x, y, Rgb(color));
                }
            }
        }
        Frame::from_image(img, sequence)
    }

    #[test]
    fn first_frame_only_seeds_baseline() {
        let mut monitor = DoorMonitor::new(&config());
        assert!(matches!(monitor.state(), MonitorState::AwaitingFirstFrame));
        let report = monitor.process(&doorway(DOOR, DOOR, None, 1)).unwrap();
        assert!(report.is_none());
        assert!(monitor.is_running());
        match monitor.state() {
            MonitorState::Running { previous } => {
                assert_eq!((previous.width(), previous.height()), (32, 32));
            }
            MonitorState::AwaitingFirstFrame => panic!("baseline not retained"),
        }
        assert_eq!(monitor.timers(), TimerState::default());
    }

    #[test]
    fn still_closed_door_counts_up_movement_only() {
        let mut monitor = DoorMonitor::new(&config());
        monitor.process(&doorway(DOOR, DOOR, None, 1)).unwrap();

        let second = monitor.process(&doorway(DOOR, DOOR, None, 2)).unwrap().unwrap();
        assert_eq!(second.motion, 0);
        assert!(second.door_closed);
        assert_eq!(
            second.timers,
            TimerState {
                frames_since_movement: 1,
                frames_since_closed: 0,
            }
        );

        let third = monitor.process(&doorway(DOOR, DOOR, None, 3)).unwrap().unwrap();
        assert_eq!(third.sequence, 3);
        assert_eq!(third.timers.frames_since_movement, 2);
        assert_eq!(third.timers.frames_since_closed, 0);
    }

    #[test]
    fn motion_and_open_leaf_reset_and_increment() {
        let mut monitor = DoorMonitor::new(&config());
        monitor.process(&doorway(DOOR, DOOR, None, 1)).unwrap();

        let report = monitor
            .process(&doorway([20, 20, 20], DOOR, Some([240, 240, 240]), 2))
            .unwrap()
            .unwrap();
        assert!(report.motion > 100);
        assert!(!report.door_closed);
        assert_eq!(
            report.timers,
            TimerState {
                frames_since_movement: 0,
                frames_since_closed: 1,
            }
        );
    }

    #[test]
    fn red_shift_stays_below_threshold_blue_shift_does_not() {
        let mut monitor = DoorMonitor::new(&config());
        monitor.process(&doorway(DOOR, DOOR, None, 1)).unwrap();

        let red = monitor
            .process(&doorway(DOOR, DOOR, Some([150, 50, 50]), 2))
            .unwrap()
            .unwrap();
        assert_eq!(red.motion, 0);
        assert_eq!(red.timers.frames_since_movement, 1);

        monitor.process(&doorway(DOOR, DOOR, None, 3)).unwrap();
        let blue = monitor
            .process(&doorway(DOOR, DOOR, Some([50, 50, 150]), 4))
            .unwrap()
            .unwrap();
        assert!(blue.motion > 100);
        assert_eq!(blue.timers.frames_since_movement, 0);
    }

    #[test]
    fn dimension_change_is_an_error() {
        let mut monitor = DoorMonitor::new(&config());
        monitor.process(&doorway(DOOR, DOOR, None, 1)).unwrap();
        let smaller = Frame::from_image(RgbImage::new(30, 32), 2);
        let err = monitor.process(&smaller).unwrap_err();
        assert!(matches!(err, MonitorError::Motion(_)));
        assert_eq!(monitor.timers(), TimerState::default());
    }

    #[test]
    fn run_stops_cleanly_on_retrieval_failure() -> Result<()> {
        let frames = (1..=3).map(|i| doorway(DOOR, DOOR, None, i)).collect();
        let mut source = ReplaySource::new(frames).then_fail(IngestError::retrieve("decode"));
        let mut monitor = DoorMonitor::new(&config());
        let mut reports: Vec<FrameReport> = Vec::new();

        let summary = run_monitor(&mut source, &mut monitor, &mut reports, &RunOptions::default())?;
        assert_eq!(summary.frames_ingested, 3);
        assert_eq!(summary.frames_reported, 2);
        assert!(matches!(summary.stop_reason, StopReason::RetrieveFailed(_)));
        assert_eq!(reports.len(), 2);
        Ok(())
    }

    #[test]
    fn run_honors_frame_limit_and_stop_flag() -> Result<()> {
        let frames: Vec<Frame> = (1..=5).map(|i| doorway(DOOR, DOOR, None, i)).collect();
        let mut source = ReplaySource::new(frames.clone());
        let mut reports: Vec<FrameReport> = Vec::new();
        let options = RunOptions {
            max_frames: Some(2),
            ..RunOptions::default()
        };
        let summary = run_monitor(
            &mut source,
            &mut DoorMonitor::new(&config()),
            &mut reports,
            &options,
        )?;
        assert_eq!(summary.stop_reason, StopReason::FrameLimit);
        assert_eq!(summary.frames_ingested, 2);

        let stop = Arc::new(AtomicBool::new(true));
        let options = RunOptions {
            stop: Some(stop),
            ..RunOptions::default()
        };
        let summary = run_monitor(
            &mut ReplaySource::new(frames),
            &mut DoorMonitor::new(&config()),
            &mut reports,
            &options,
        )?;
        assert_eq!(summary.stop_reason, StopReason::Stopped);
        assert_eq!(summary.frames_ingested, 0);
        Ok(())
    }
}
