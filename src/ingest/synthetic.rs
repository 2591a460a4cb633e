//! Synthetic frame sources.
//!
//! `SyntheticSource` renders a doorway scene following a looping timeline of
//! segments (door pose plus whether someone is walking through the frame). It
//! backs `stub://` URLs so the daemon and the demo run without a camera.
//!
//! `ReplaySource` hands out a fixed list of frames, optionally followed by an
//! error. Tests use it to drive the monitor through exact sequences.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use std::collections::VecDeque;

use super::{FrameSource, IngestError, SourceStats};
use crate::config::MonitorConfig;
use crate::door::{ColorSample, Region};
use crate::frame::Frame;

const BACKGROUND: [u8; 3] = [60, 60, 60];
/// Dark hallway visible through an open leaf.
const OPENING: [u8; 3] = [20, 20, 20];
const WALKER: [u8; 3] = [230, 230, 230];
const WALKER_SIZE: u32 = 40;
const WALKER_STEP: u32 = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DoorPose {
    Closed,
    LeftOpen,
    RightOpen,
    Open,
}

impl DoorPose {
    fn left_closed(self) -> bool {
        matches!(self, DoorPose::Closed | DoorPose::RightOpen)
    }

    fn right_closed(self) -> bool {
        matches!(self, DoorPose::Closed | DoorPose::LeftOpen)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SceneSegment {
    pub frames: u64,
    pub door: DoorPose,
    pub walker: bool,
}

impl SceneSegment {
    pub const fn new(frames: u64, door: DoorPose, walker: bool) -> Self {
        Self {
            frames,
            door,
            walker,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SyntheticScene {
    pub width: u32,
    pub height: u32,
    pub left_door: Region,
    pub right_door: Region,
    pub door_color: [u8; 3],
    pub timeline: Vec<SceneSegment>,
}

impl SyntheticScene {
    /// Scene laid out from the monitor's door regions and expected color, with
    /// a loop of: closed and quiet, opened with someone walking through, left
    /// propped open and quiet, one leaf ajar.
    pub fn doorway(width: u32, height: u32, monitor: &MonitorConfig) -> Self {
        Self {
            width,
            height,
            left_door: monitor.left_door,
            right_door: monitor.right_door,
            door_color: color_to_rgb(&monitor.expected_color),
            timeline: vec![
                SceneSegment::new(30, DoorPose::Closed, false),
                SceneSegment::new(20, DoorPose::Open, true),
                SceneSegment::new(40, DoorPose::Open, false),
                SceneSegment::new(10, DoorPose::LeftOpen, false),
            ],
        }
    }

    pub fn with_timeline(mut self, timeline: Vec<SceneSegment>) -> Self {
        self.timeline = timeline;
        self
    }

    fn cycle_len(&self) -> u64 {
        self.timeline.iter().map(|s| s.frames).sum()
    }

    /// Segment and offset within it for the zero-based frame `index`.
    fn segment_at(&self, index: u64) -> Option<(SceneSegment, u64)> {
        let cycle = self.cycle_len();
        if cycle == 0 {
            return None;
        }
        let mut offset = index % cycle;
        for segment in &self.timeline {
            if offset < segment.frames {
                return Some((*segment, offset));
            }
            offset -= segment.frames;
        }
        None
    }

    pub fn render(&self, index: u64) -> RgbImage {
        let mut img = RgbImage::from_pixel(self.width, self.height, Rgb(BACKGROUND));
        let Some((segment, offset)) = self.segment_at(index) else {
            return img;
        };

        let left = if segment.door.left_closed() {
            self.door_color
        } else {
            OPENING
        };
        let right = if segment.door.right_closed() {
            self.door_color
        } else {
            OPENING
        };
        fill_clipped(&mut img, &self.left_door, left);
        fill_clipped(&mut img, &self.right_door, right);

        if segment.walker {
            let size = WALKER_SIZE.min(self.width / 4).min(self.height / 4).max(1);
            let span = self.width.saturating_sub(size).max(1) as u64;
            let x = ((offset * WALKER_STEP as u64) % span) as u32;
            let y = self.height / 8;
            fill_clipped(&mut img, &Region::new(x, y, size, size), WALKER);
        }
        img
    }
}

fn fill_clipped(img: &mut RgbImage, region: &Region, color: [u8; 3]) {
    let x_end = region.x.saturating_add(region.width).min(img.width());
    let y_end = region.y.saturating_add(region.height).min(img.height());
    for y in region.y.min(y_end)..y_end {
        for x in region.x.min(x_end)..x_end {
            img.put_pixel(x, y, Rgb(color));
        }
    }
}

fn color_to_rgb(color: &ColorSample) -> [u8; 3] {
    let [r, g, b, _] = color.channels();
    [r, g, b].map(|c| c.round().clamp(0.0, 255.0) as u8)
}

// ----------------------------------------------------------------------------
// SyntheticSource
// ----------------------------------------------------------------------------

pub struct SyntheticSource {
    url: String,
    scene: SyntheticScene,
    frame_limit: Option<u64>,
    frame_count: u64,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(scene: SyntheticScene, frame_limit: Option<u64>) -> Self {
        Self {
            url: "stub://synthetic".to_string(),
            scene,
            frame_limit,
            frame_count: 0,
            connected: false,
        }
    }

    /// Parse `stub://<name>[?frames=N]`; without `frames` the stream never ends.
    pub fn from_url(url: &str, scene: SyntheticScene) -> Result<Self> {
        let rest = url
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic source url must start with stub://"))?;
        let frame_limit = match rest.split_once('?') {
            Some((_, query)) => {
                let value = query
                    .strip_prefix("frames=")
                    .ok_or_else(|| anyhow!("unsupported stub query '{}'", query))?;
                Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| anyhow!("stub frames must be an integer, got '{}'", value))?,
                )
            }
            None => None,
        };
        let mut source = Self::new(scene, frame_limit);
        source.url = url.to_string();
        Ok(source)
    }
}

impl FrameSource for SyntheticSource {
    /// Synthetic sources are always "connected".
    fn connect(&mut self) -> Result<(), IngestError> {
        self.connected = true;
        log::info!("SyntheticSource: connected to {}", self.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, IngestError> {
        if !self.connected {
            return Err(IngestError::retrieve("synthetic source not connected"));
        }
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            return Err(IngestError::StreamEnded);
        }
        let image = self.scene.render(self.frame_count);
        self.frame_count += 1;
        Ok(Frame::from_image(image, self.frame_count))
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.url.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// ReplaySource
// ----------------------------------------------------------------------------

/// Replays prepared frames, then ends with `StreamEnded` or the configured
/// error.
pub struct ReplaySource {
    frames: VecDeque<Frame>,
    terminal: Option<IngestError>,
    frame_count: u64,
    connects: u32,
}

impl ReplaySource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
            terminal: None,
            frame_count: 0,
            connects: 0,
        }
    }

    pub fn then_fail(mut self, err: IngestError) -> Self {
        self.terminal = Some(err);
        self
    }

    /// Number of `connect` calls so far.
    pub fn connects(&self) -> u32 {
        self.connects
    }
}

impl FrameSource for ReplaySource {
    fn connect(&mut self) -> Result<(), IngestError> {
        self.connects += 1;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, IngestError> {
        match self.frames.pop_front() {
            Some(frame) => {
                self.frame_count += 1;
                Ok(frame)
            }
            None => Err(self.terminal.take().unwrap_or(IngestError::StreamEnded)),
        }
    }

    fn is_healthy(&self) -> bool {
        !self.frames.is_empty()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: "replay".to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::door::{mean_color, ColorSample};

    fn scene() -> SyntheticScene {
        SyntheticScene::doorway(1280, 720, &MonitorConfig::default())
    }

    #[test]
    fn synthetic_source_produces_sequenced_frames() -> Result<()> {
        let mut source = SyntheticSource::from_url("stub://test?frames=3", scene())?;
        source.connect()?;
        let frame = source.next_frame()?;
        assert_eq!((frame.width(), frame.height()), (1280, 720));
        assert_eq!(frame.sequence(), 1);
        assert_eq!(source.next_frame()?.sequence(), 2);
        assert_eq!(source.next_frame()?.sequence(), 3);
        assert!(matches!(source.next_frame(), Err(IngestError::StreamEnded)));
        assert_eq!(source.stats().frames_captured, 3);
        Ok(())
    }

    #[test]
    fn unbounded_stub_url_has_no_limit() -> Result<()> {
        let source = SyntheticSource::from_url("stub://front", scene())?;
        assert_eq!(source.frame_limit, None);
        assert!(SyntheticSource::from_url("stub://front?frames=x", scene()).is_err());
        assert!(SyntheticSource::from_url("rtsp://front", scene()).is_err());
        Ok(())
    }

    #[test]
    fn closed_segment_renders_expected_door_color() {
        let cfg = MonitorConfig::default();
        let frame = Frame::from_image(scene().render(0), 1);
        let left = mean_color(&frame, &cfg.left_door).unwrap();
        assert_eq!(left, ColorSample::rgb(115.0, 113.0, 73.0));
    }

    #[test]
    fn open_segment_renders_dark_opening() {
        let cfg = MonitorConfig::default();
        // Frame 30 is the first frame of the open segment.
        let frame = Frame::from_image(scene().render(30), 31);
        let right = mean_color(&frame, &cfg.right_door).unwrap();
        assert_eq!(right, ColorSample::rgb(20.0, 20.0, 20.0));
    }

    #[test]
    fn custom_timeline_replaces_default_script() {
        let cfg = MonitorConfig::default();
        let s = scene().with_timeline(vec![
            SceneSegment::new(2, DoorPose::Closed, false),
            SceneSegment::new(1, DoorPose::RightOpen, false),
        ]);
        assert_eq!(s.cycle_len(), 3);

        let ajar = Frame::from_image(s.render(2), 3);
        assert_eq!(
            mean_color(&ajar, &cfg.left_door).unwrap(),
            ColorSample::rgb(115.0, 113.0, 73.0)
        );
        assert_eq!(
            mean_color(&ajar, &cfg.right_door).unwrap(),
            ColorSample::rgb(20.0, 20.0, 20.0)
        );
        assert_eq!(s.render(3), s.render(0));
    }

    #[test]
    fn timeline_loops() {
        let s = scene();
        assert_eq!(s.render(0), s.render(s.cycle_len()));
    }

    #[test]
    fn replay_source_ends_with_configured_error() {
        let frame = Frame::from_image(RgbImage::new(2, 2), 1);
        let mut source = ReplaySource::new(vec![frame])
            .then_fail(IngestError::retrieve("corrupted frame"));
        assert!(source.next_frame().is_ok());
        assert!(matches!(
            source.next_frame(),
            Err(IngestError::RetrieveFailed(_))
        ));
        assert!(matches!(source.next_frame(), Err(IngestError::StreamEnded)));
    }
}
