//! HTTP camera frame source.
//!
//! Handles the two shapes consumer IP cameras serve over HTTP:
//! - `multipart/x-mixed-replace` MJPEG streams, split on JPEG SOI/EOI markers
//! - single JPEG snapshots, re-fetched for every frame
//!
//! Frames are decimated to `target_fps`. Reads are bounded by the frame
//! timeout.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::{Duration, Instant};

use url::Url;

use super::{FrameSource, IngestError, SourceStats};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct MjpegConfig {
    /// Stream or snapshot URL, http(s) only.
    pub url: String,
    /// Target frame rate; 0 keeps every frame.
    pub target_fps: u32,
    pub frame_timeout: Duration,
}

impl Default for MjpegConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:81/stream".to_string(),
            target_fps: 10,
            frame_timeout: Duration::from_secs(5),
        }
    }
}

pub struct MjpegSource {
    config: MjpegConfig,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    frame_count: u64,
    last_error: Option<String>,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl MjpegSource {
    pub fn new(config: MjpegConfig) -> Result<Self> {
        let url = Url::parse(&config.url).context("parse camera url")?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported camera scheme '{}'; expected http(s)",
                url.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.frame_timeout)
            .timeout_read(config.frame_timeout)
            .build();
        Ok(Self {
            config,
            agent,
            stream: None,
            last_frame_at: None,
            connected_at: None,
            frame_count: 0,
            last_error: None,
        })
    }
}

impl FrameSource for MjpegSource {
    fn connect(&mut self) -> Result<(), IngestError> {
        let response = self
            .agent
            .get(&self.config.url)
            .call()
            .map_err(IngestError::connect)?;
        let content_type = response.header("Content-Type").unwrap_or("");
        self.stream = if content_type.to_lowercase().contains("multipart") {
            Some(HttpStream::Mjpeg(MjpegStream::new(response.into_reader())))
        } else {
            Some(HttpStream::SingleJpeg)
        };
        self.connected_at = Some(Instant::now());
        self.last_error = None;
        log::info!("MjpegSource: connected to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, IngestError> {
        let min_interval = frame_interval(self.config.target_fps);
        loop {
            let timeout = self.config.frame_timeout;
            let fetched = match &mut self.stream {
                None => return Err(IngestError::retrieve("camera not connected")),
                Some(HttpStream::Mjpeg(stream)) => stream.read_next_jpeg(timeout),
                Some(HttpStream::SingleJpeg) => {
                    let wait = snapshot_wait(self.last_frame_at, min_interval, Instant::now());
                    if !wait.is_zero() {
                        std::thread::sleep(wait);
                    }
                    fetch_single_jpeg(&self.agent, &self.config.url, timeout)
                }
            };
            let jpeg_bytes = match fetched {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.last_error = Some(e.to_string());
                    return Err(e);
                }
            };

            let now = Instant::now();
            if let Some(last) = self.last_frame_at {
                if now.duration_since(last) < min_interval {
                    continue;
                }
            }

            let image = image::load_from_memory(&jpeg_bytes)
                .map_err(|e| IngestError::retrieve(format!("decode jpeg: {}", e)))?
                .into_rgb8();
            self.frame_count += 1;
            self.last_frame_at = Some(now);
            return Ok(Frame::from_image(image, self.frame_count));
        }
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
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

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.url.clone(),
        }
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self, timeout: Duration) -> Result<Vec<u8>, IngestError> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self
                .reader
                .read(&mut chunk)
                .map_err(|e| io_error(e, timeout))?;
            if read == 0 {
                return Err(IngestError::StreamEnded);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            // Keep the last byte in case it starts a marker.
            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let drain_len = self.buffer.len() - 1;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(
    agent: &ureq::Agent,
    url: &str,
    timeout: Duration,
) -> Result<Vec<u8>, IngestError> {
    let response = agent.get(url).call().map_err(IngestError::connect)?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .map_err(|e| io_error(e, timeout))?;
    if bytes.is_empty() {
        return Err(IngestError::retrieve("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn io_error(err: std::io::Error, timeout: Duration) -> IngestError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            IngestError::Timeout(timeout)
        }
        _ => IngestError::retrieve(err),
    }
}

/// Byte range of the first complete JPEG (SOI..=EOI) in `buffer`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

/// Time left before the next snapshot may be fetched.
fn snapshot_wait(last: Option<Instant>, min_interval: Duration, now: Instant) -> Duration {
    match last {
        Some(last) => min_interval.saturating_sub(now.saturating_duration_since(last)),
        None => Duration::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_bounds_span_soi_to_eoi() {
        let buf = [0x00, 0x11, 0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9, 0x33];
        assert_eq!(find_jpeg_bounds(&buf), Some((2, 8)));
        assert_eq!(find_jpeg_bounds(&buf[..7]), None);
        assert_eq!(find_jpeg_bounds(&[0xFF, 0xD9]), None);
    }

    #[test]
    fn mjpeg_stream_splits_consecutive_frames() {
        let parts: [&[u8]; 4] = [
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\n",
            &[0xFF, 0xD8, 0xAA, 0xFF, 0xD9],
            b"\r\n--frame\r\n\r\n",
            &[0xFF, 0xD8, 0xBB, 0xFF, 0xD9],
        ];
        let body = parts.concat();
        let mut stream = MjpegStream::new(Box::new(std::io::Cursor::new(body)));
        let timeout = Duration::from_secs(1);
        assert_eq!(
            stream.read_next_jpeg(timeout).unwrap(),
            vec![0xFF, 0xD8, 0xAA, 0xFF, 0xD9]
        );
        assert_eq!(
            stream.read_next_jpeg(timeout).unwrap(),
            vec![0xFF, 0xD8, 0xBB, 0xFF, 0xD9]
        );
        assert!(matches!(
            stream.read_next_jpeg(timeout),
            Err(IngestError::StreamEnded)
        ));
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(MjpegSource::new(MjpegConfig {
            url: "udp://0.0.0.0:5000".to_string(),
            ..MjpegConfig::default()
        })
        .is_err());
    }

    #[test]
    fn decimation_interval() {
        assert_eq!(frame_interval(0), Duration::ZERO);
        assert_eq!(frame_interval(10), Duration::from_millis(100));
    }

    #[test]
    fn snapshot_polling_waits_out_the_interval() {
        let interval = Duration::from_millis(100);
        let last = Instant::now();
        assert_eq!(snapshot_wait(None, interval, last), Duration::ZERO);
        assert_eq!(snapshot_wait(Some(last), interval, last), interval);
        assert_eq!(
            snapshot_wait(Some(last), interval, last + Duration::from_millis(30)),
            Duration::from_millis(70)
        );
        assert_eq!(
            snapshot_wait(Some(last), interval, last + Duration::from_millis(250)),
            Duration::ZERO
        );
    }
}
