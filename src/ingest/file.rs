//! Local file frame source.
//!
//! A directory is replayed as an image sequence (png, jpg/jpeg, bmp) in file
//! name order. A single image file yields one frame. Video files go through
//! FFmpeg when the `ingest-file-ffmpeg` feature is enabled.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::{FrameSource, IngestError, SourceStats};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Image directory, image file, or video file.
    pub path: String,
    /// Longest a video decode may stall between frames.
    pub frame_timeout: Duration,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            frame_timeout: Duration::from_secs(5),
        }
    }
}

pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Images(ImageSequence),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths, got '{}'",
                config.path
            ));
        }
        let path = Path::new(&config.path);
        if path.is_dir() || is_image_file(path) {
            return Ok(Self {
                backend: FileBackend::Images(ImageSequence::new(config)?),
            });
        }
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            Ok(Self {
                backend: FileBackend::Ffmpeg(FfmpegFileSource::new(config)?),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(anyhow!(
                "video file '{}' requires the ingest-file-ffmpeg feature",
                config.path
            ))
        }
    }
}

impl FrameSource for FileSource {
    fn connect(&mut self) -> Result<(), IngestError> {
        match &mut self.backend {
            FileBackend::Images(source) => source.connect(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Frame, IngestError> {
        match &mut self.backend {
            FileBackend::Images(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            FileBackend::Images(source) => source.is_healthy(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.is_healthy(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            FileBackend::Images(source) => source.stats(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.stats(),
        }
    }
}

// ----------------------------------------------------------------------------
// Image sequence
// ----------------------------------------------------------------------------

struct ImageSequence {
    config: FileConfig,
    files: Vec<PathBuf>,
    cursor: usize,
    frame_count: u64,
    connected: bool,
}

impl ImageSequence {
    fn new(config: FileConfig) -> Result<Self> {
        let path = Path::new(&config.path);
        let files = if path.is_dir() {
            let mut files = std::fs::read_dir(path)
                .with_context(|| format!("read image directory {}", config.path))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| is_image_file(p))
                .collect::<Vec<_>>();
            files.sort();
            files
        } else {
            vec![path.to_path_buf()]
        };
        if files.is_empty() {
            return Err(anyhow!("no images found in {}", config.path));
        }
        Ok(Self {
            config,
            files,
            cursor: 0,
            frame_count: 0,
            connected: false,
        })
    }

    fn connect(&mut self) -> Result<(), IngestError> {
        self.connected = true;
        log::info!(
            "FileSource: replaying {} image(s) from {}",
            self.files.len(),
            self.config.path
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, IngestError> {
        let Some(path) = self.files.get(self.cursor) else {
            return Err(IngestError::StreamEnded);
        };
        self.cursor += 1;
        let image = image::open(path)
            .map_err(|e| IngestError::retrieve(format!("{}: {}", path.display(), e)))?
            .to_rgb8();
        self.frame_count += 1;
        Ok(Frame::from_image(image, self.frame_count))
    }

    fn is_healthy(&self) -> bool {
        self.connected && self.cursor < self.files.len()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.path.clone(),
        }
    }
}

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn is_local_file_path(path: &str) -> bool {
    !path.trim().is_empty() && !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_png(dir: &Path, name: &str, value: u8) {
        RgbImage::from_pixel(8, 6, Rgb([value, value, value]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn directory_replays_in_name_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_png(dir.path(), "002.png", 20);
        write_png(dir.path(), "001.png", 10);
        std::fs::write(dir.path().join("notes.txt"), "ignored")?;

        let mut source = FileSource::new(FileConfig {
            path: dir.path().to_string_lossy().into_owned(),
            ..FileConfig::default()
        })?;
        source.connect()?;

        let first = source.next_frame()?;
        assert_eq!((first.width(), first.height()), (8, 6));
        assert_eq!(first.pixels().get_pixel(0, 0), &Rgb([10, 10, 10]));
        let second = source.next_frame()?;
        assert_eq!(second.sequence(), 2);
        assert_eq!(second.pixels().get_pixel(0, 0), &Rgb([20, 20, 20]));
        assert!(matches!(source.next_frame(), Err(IngestError::StreamEnded)));
        Ok(())
    }

    #[test]
    fn undecodable_image_is_a_retrieval_failure() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("broken.png"), b"not a png")?;
        let mut source = FileSource::new(FileConfig {
            path: dir.path().to_string_lossy().into_owned(),
            ..FileConfig::default()
        })?;
        source.connect()?;
        assert!(matches!(
            source.next_frame(),
            Err(IngestError::RetrieveFailed(_))
        ));
        Ok(())
    }

    #[test]
    fn rejects_urls_and_empty_directories() -> Result<()> {
        assert!(FileSource::new(FileConfig {
            path: "ftp://camera/feed".to_string(),
            ..FileConfig::default()
        })
        .is_err());

        let dir = tempfile::tempdir()?;
        assert!(FileSource::new(FileConfig {
            path: dir.path().to_string_lossy().into_owned(),
            ..FileConfig::default()
        })
        .is_err());
        Ok(())
    }
}
