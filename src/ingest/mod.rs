//! Frame ingestion sources.
//!
//! This module provides the sources the monitor pulls frames from:
//! - Synthetic doorway scenes (`stub://` URLs, tests and demos)
//! - RTSP streams (IP cameras, feature: rtsp-gstreamer)
//! - HTTP MJPEG / JPEG snapshot cameras (feature: ingest-mjpeg)
//! - Local image sequences, and video files (feature: ingest-file-ffmpeg)
//!
//! Every source implements `FrameSource`. Acquisition is pull-based and
//! blocking; sources that talk to the network bound each pull with the
//! configured frame timeout. Retrying is not a source concern: wrap a source in
//! `ReconnectingSource` to get it.

use anyhow::Result;
use std::time::Duration;
use thiserror::Error;

use crate::config::{MonitorConfig, SourceSettings};
use crate::frame::Frame;

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg(feature = "ingest-mjpeg")]
pub mod mjpeg;
pub mod reconnect;
pub mod rtsp;
pub mod synthetic;

pub use file::{FileConfig, FileSource};
#[cfg(feature = "ingest-mjpeg")]
pub use mjpeg::{MjpegConfig, MjpegSource};
pub use reconnect::{ReconnectPolicy, ReconnectingSource};
pub use rtsp::{RtspConfig, RtspSource};
pub use synthetic::{DoorPose, ReplaySource, SceneSegment, SyntheticScene, SyntheticSource};

#[derive(Debug, Error)]
pub enum IngestError {
    /// The source has no more frames. Never retried.
    #[error("stream ended")]
    StreamEnded,
    #[error("frame retrieval failed: {0}")]
    RetrieveFailed(String),
    #[error("no frame within {0:?}")]
    Timeout(Duration),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("{0}")]
    Unsupported(String),
}

impl IngestError {
    pub fn retrieve(err: impl std::fmt::Display) -> Self {
        IngestError::RetrieveFailed(err.to_string())
    }

    pub fn connect(err: impl std::fmt::Display) -> Self {
        IngestError::Connect(err.to_string())
    }

    /// Whether a reconnect might help.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IngestError::RetrieveFailed(_) | IngestError::Timeout(_) | IngestError::Connect(_)
        )
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Sequential supply of frames.
pub trait FrameSource {
    /// Connect to the underlying transport.
    fn connect(&mut self) -> Result<(), IngestError>;

    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame, IngestError>;

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn connect(&mut self) -> Result<(), IngestError> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Frame, IngestError> {
        (**self).next_frame()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

/// Build the source named by `settings.url`.
///
/// - `stub://<name>[?frames=N]`: synthetic doorway scene laid out from `monitor`
/// - `rtsp://` / `rtsps://`: RTSP camera
/// - `http://` / `https://`: MJPEG or JPEG snapshot camera
/// - anything else: local path (image directory or video file)
///
/// The source is wrapped in `ReconnectingSource` when reconnect attempts are
/// configured.
pub fn open_source(
    settings: &SourceSettings,
    monitor: &MonitorConfig,
) -> Result<Box<dyn FrameSource>> {
    let url = settings.url.as_str();
    let source: Box<dyn FrameSource> = if url.starts_with("stub://") {
        let scene = SyntheticScene::doorway(settings.width, settings.height, monitor);
        Box::new(SyntheticSource::from_url(url, scene)?)
    } else if url.starts_with("rtsp://") || url.starts_with("rtsps://") {
        Box::new(RtspSource::new(RtspConfig {
            url: settings.url.clone(),
            target_fps: settings.target_fps,
            width: settings.width,
            height: settings.height,
            frame_timeout: settings.frame_timeout,
        })?)
    } else if url.starts_with("http://") || url.starts_with("https://") {
        open_http_source(settings)?
    } else {
        Box::new(FileSource::new(FileConfig {
            path: settings.url.clone(),
            frame_timeout: settings.frame_timeout,
        })?)
    };

    if settings.reconnect_attempts == 0 {
        return Ok(source);
    }
    let policy = ReconnectPolicy {
        attempts: settings.reconnect_attempts,
        backoff: settings.reconnect_backoff,
    };
    Ok(Box::new(ReconnectingSource::new(source, policy)))
}

#[cfg(feature = "ingest-mjpeg")]
fn open_http_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(MjpegSource::new(MjpegConfig {
        url: settings.url.clone(),
        target_fps: settings.target_fps,
        frame_timeout: settings.frame_timeout,
    })?))
}

#[cfg(not(feature = "ingest-mjpeg"))]
fn open_http_source(_settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!("HTTP cameras require the ingest-mjpeg feature")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_classified() {
        assert!(IngestError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(IngestError::retrieve("corrupt").is_transient());
        assert!(IngestError::connect("refused").is_transient());
        assert!(!IngestError::StreamEnded.is_transient());
        assert!(!IngestError::Unsupported("x".into()).is_transient());
    }

    #[test]
    fn stub_url_opens_synthetic_source() -> Result<()> {
        let settings = SourceSettings {
            url: "stub://doorway?frames=2".to_string(),
            ..SourceSettings::default()
        };
        let mut source = open_source(&settings, &MonitorConfig::default())?;
        source.connect()?;
        assert_eq!(source.next_frame()?.sequence(), 1);
        assert_eq!(source.next_frame()?.sequence(), 2);
        assert!(matches!(source.next_frame(), Err(IngestError::StreamEnded)));
        Ok(())
    }
}
