//! Video file decoding through FFmpeg.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use std::time::Instant;

use super::file::FileConfig;
use super::{IngestError, SourceStats};
use crate::frame::Frame;

pub(crate) struct FfmpegFileSource {
    config: FileConfig,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: u64,
    connected: bool,
    flushed: bool,
    ended: bool,
}

impl FfmpegFileSource {
    pub(crate) fn new(config: FileConfig) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&config.path)
            .with_context(|| format!("failed to open file input '{}' with ffmpeg", config.path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            config,
            input,
            stream_index,
            decoder,
            scaler,
            frame_count: 0,
            connected: false,
            flushed: false,
            ended: false,
        })
    }

    pub(crate) fn connect(&mut self) -> Result<(), IngestError> {
        self.connected = true;
        log::info!("FileSource: decoding {} (ffmpeg)", self.config.path);
        Ok(())
    }

    pub(crate) fn next_frame(&mut self) -> Result<Frame, IngestError> {
        if self.ended {
            return Err(IngestError::StreamEnded);
        }
        let started = Instant::now();
        let mut decoded = ffmpeg::frame::Video::empty();

        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded);
            }
            if self.flushed {
                self.ended = true;
                return Err(IngestError::StreamEnded);
            }
            if started.elapsed() > self.config.frame_timeout {
                return Err(IngestError::Timeout(self.config.frame_timeout));
            }

            let next = self
                .input
                .packets()
                .find(|(stream, _)| stream.index() == self.stream_index);
            match next {
                Some((_, packet)) => self
                    .decoder
                    .send_packet(&packet)
                    .map_err(IngestError::retrieve)?,
                None => {
                    self.decoder.send_eof().map_err(IngestError::retrieve)?;
                    self.flushed = true;
                }
            }
        }
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.connected && !self.ended
    }

    pub(crate) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.path.clone(),
        }
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame, IngestError> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .map_err(IngestError::retrieve)?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame).map_err(IngestError::retrieve)?;
        self.frame_count += 1;
        Frame::from_rgb(pixels, width, height, self.frame_count).map_err(IngestError::retrieve)
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
