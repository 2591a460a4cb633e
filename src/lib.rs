//! Doorway monitor
//!
//! Watches a camera pointed at a pair of doors and keeps two counters per
//! processed frame: frames since significant movement was last seen, and
//! frames since the door was last seen closed. When both grow large, the door
//! has been left propped open with nobody around.
//!
//! # Pipeline
//!
//! Each frame goes through:
//!
//! 1. **Motion**: grayscale difference against the previous frame, thresholded,
//!    dilated then eroded, and counted (`motion`).
//! 2. **Door state**: mean color of the two door-leaf regions compared with the
//!    expected closed-door color (`door`).
//! 3. **Counters**: both elapsed-frame counters advance or reset (`timers`).
//! 4. **Report**: one line per frame (`report`), optionally feeding an alert
//!    policy (`alert`).
//!
//! The first frame of a stream only seeds the comparison baseline.
//!
//! # Module Structure
//!
//! - `frame`: RGB and grayscale frame containers
//! - `ingest`: frame sources (synthetic, RTSP, HTTP MJPEG, local files)
//! - `motion`, `door`, `timers`: per-frame analysis
//! - `monitor`: orchestration and the acquisition loop
//! - `report`, `alert`: output
//! - `config`: defaults, TOML file and environment overrides

pub mod alert;
pub mod config;
pub mod door;
pub mod frame;
pub mod ingest;
pub mod monitor;
pub mod motion;
pub mod report;
pub mod timers;

pub use alert::{AlertPolicy, AlertSink, AlertingReporter, DoorAlert, LogAlertSink, MqttAlertSink};
pub use config::{DoorwatchdConfig, MonitorConfig, SourceSettings};
pub use door::{color_distance, is_door_closed, ColorSample, DoorClassifier, Region};
pub use frame::{Frame, GrayFrame};
pub use ingest::{open_source, FrameSource, IngestError};
pub use monitor::{run_monitor, DoorMonitor, RunOptions, RunSummary, StopReason};
pub use motion::{DifferenceEngine, StructuringElement};
pub use report::{FrameReport, LineReporter, ReportFormat, ReportSink};
pub use timers::{TimerState, TimerTracker};
