//! RTSP frame source.
//!
//! Decodes IP camera streams through a GStreamer pipeline
//! (`rtspsrc ! decodebin ! videoconvert ! appsink`) delivering packed RGB.
//! Without the `rtsp-gstreamer` feature, constructing an `RtspSource` fails.

#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;
use anyhow::Result;
use std::time::Duration;
#[cfg(feature = "rtsp-gstreamer")]
use std::time::Instant;

use super::{FrameSource, IngestError, SourceStats};
use crate::frame::Frame;

/// Configuration for an RTSP source.
#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// RTSP URL (e.g., "rtsp://192.168.1.100:554/stream")
    pub url: String,
    /// Target frame rate; 0 keeps every decoded frame.
    pub target_fps: u32,
    /// Output size requested from the pipeline; 0 keeps the camera's size.
    pub width: u32,
    pub height: u32,
    /// Longest wait for one decoded frame.
    pub frame_timeout: Duration,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "rtsp://localhost:554/stream".to_string(),
            target_fps: 10,
            width: 1280,
            height: 720,
            frame_timeout: Duration::from_secs(5),
        }
    }
}

pub struct RtspSource {
    #[cfg(feature = "rtsp-gstreamer")]
    inner: GstreamerRtspSource,
    #[cfg(not(feature = "rtsp-gstreamer"))]
    url: String,
}

impl RtspSource {
    #[cfg(feature = "rtsp-gstreamer")]
    pub fn new(config: RtspConfig) -> Result<Self> {
        Ok(Self {
            inner: GstreamerRtspSource::new(config)?,
        })
    }

    #[cfg(not(feature = "rtsp-gstreamer"))]
    pub fn new(config: RtspConfig) -> Result<Self> {
        anyhow::bail!(
            "RTSP source {} requires the rtsp-gstreamer feature",
            config.url
        )
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl FrameSource for RtspSource {
    fn connect(&mut self) -> Result<(), IngestError> {
        self.inner.connect()
    }

    fn next_frame(&mut self) -> Result<Frame, IngestError> {
        self.inner.next_frame()
    }

    fn is_healthy(&self) -> bool {
        self.inner.is_healthy()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.inner.frame_count,
            source: self.inner.config.url.clone(),
        }
    }
}

#[cfg(not(feature = "rtsp-gstreamer"))]
impl RtspSource {
    fn unsupported(&self) -> IngestError {
        IngestError::Unsupported(format!(
            "RTSP source {} requires the rtsp-gstreamer feature",
            self.url
        ))
    }
}

#[cfg(not(feature = "rtsp-gstreamer"))]
impl FrameSource for RtspSource {
    fn connect(&mut self) -> Result<(), IngestError> {
        Err(self.unsupported())
    }

    fn next_frame(&mut self) -> Result<Frame, IngestError> {
        Err(self.unsupported())
    }

    fn is_healthy(&self) -> bool {
        false
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: 0,
            source: self.url.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// GStreamer backend
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerRtspSource {
    config: RtspConfig,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    last_error: Option<String>,
    ended: bool,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerRtspSource {
    fn new(config: RtspConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! videoscale ! videorate ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            config.url
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;

        appsink.set_caps(Some(&output_caps(&config)));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok(Self {
            config,
            pipeline,
            appsink,
            frame_count: 0,
            last_frame_at: None,
            connected_at: None,
            last_error: None,
            ended: false,
        })
    }

    fn connect(&mut self) -> Result<(), IngestError> {
        // A reconnect restarts the pipeline from scratch.
        let _ = self.pipeline.set_state(gstreamer::State::Null);
        self.last_error = None;
        self.ended = false;
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(IngestError::connect)?;
        self.connected_at = Some(Instant::now());
        log::info!("RtspSource: connected to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, IngestError> {
        self.poll_bus();
        if self.ended {
            return Err(IngestError::StreamEnded);
        }
        if let Some(err) = &self.last_error {
            return Err(IngestError::retrieve(err));
        }

        let timeout = self.config.frame_timeout;
        let sample = self
            .appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(timeout.as_millis() as u64))
            .ok_or_else(|| {
                if self.appsink.is_eos() {
                    IngestError::StreamEnded
                } else {
                    IngestError::Timeout(timeout)
                }
            })?;

        let (pixels, width, height) = sample_to_pixels(&sample).map_err(IngestError::retrieve)?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());

        Frame::from_rgb(pixels, width, height, self.frame_count).map_err(IngestError::retrieve)
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() || self.ended {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= self.config.frame_timeout;
        };
        last_frame_at.elapsed() <= self.config.frame_timeout
    }

    fn poll_bus(&mut self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => self.ended = true,
                _ => {}
            }
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl Drop for GstreamerRtspSource {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn output_caps(config: &RtspConfig) -> gstreamer::Caps {
    let mut caps = gstreamer::Caps::builder("video/x-raw").field("format", "RGB");
    if config.width > 0 && config.height > 0 {
        caps = caps
            .field("width", config.width as i32)
            .field("height", config.height as i32);
    }
    if config.target_fps > 0 {
        caps = caps.field(
            "framerate",
            gstreamer::Fraction::new(config.target_fps as i32, 1),
        );
    }
    caps.build()
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let frame = data
            .get(..row_bytes * height as usize)
            .context("RTSP buffer is shorter than its caps")?;
        return Ok((frame.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}

#[cfg(all(test, not(feature = "rtsp-gstreamer")))]
mod tests {
    use super::*;

    #[test]
    fn rtsp_without_backend_is_rejected() {
        let err = RtspSource::new(RtspConfig::default()).err().unwrap();
        assert!(err.to_string().contains("rtsp-gstreamer"));
    }
}
