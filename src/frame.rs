//! Frame containers.
//!
//! - `Frame`: captured RGB frame as delivered by an ingest source.
//! - `GrayFrame`: single-channel frame derived from a `Frame`.
//!
//! Frames are immutable once built. Every processing step produces a new
//! buffer; nothing in the pipeline writes into a frame it did not create.

use anyhow::{anyhow, Result};
use image::{GrayImage, Luma, RgbImage};

// ----------------------------------------------------------------------------
// Frame: captured RGB pixels
// ----------------------------------------------------------------------------

/// Captured RGB24 frame.
///
/// `sequence` is assigned by the source, starting at 1 for the first frame it
/// delivers. It is carried through to reports so consumers can line reports up
/// with the stream.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    sequence: u64,
}

impl Frame {
    /// Build a frame from tightly packed RGB24 bytes.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = width
            .checked_mul(height)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))? as usize;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| anyhow!("RGB buffer does not match {}x{}", width, height))?;
        Ok(Self { image, sequence })
    }

    pub fn from_image(image: RgbImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.image
    }

    /// Luma in 14-bit fixed point, rounded, with BT.601 weights applied in
    /// camera channel order: blue 0.299, green 0.587, red 0.114.
    pub fn to_grayscale(&self) -> GrayFrame {
        let gray = GrayImage::from_fn(self.width(), self.height(), |x, y| {
            let [r, g, b] = self.image.get_pixel(x, y).0;
            Luma([luma(r, g, b)])
        });
        GrayFrame { image: gray }
    }
}

const LUMA_R: u32 = 1868;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 4899;
const LUMA_SHIFT: u32 = 14;

fn luma(r: u8, g: u8, b: u8) -> u8 {
    let y = r as u32 * LUMA_R + g as u32 * LUMA_G + b as u32 * LUMA_B + (1 << (LUMA_SHIFT - 1));
    (y >> LUMA_SHIFT).min(255) as u8
}

// ----------------------------------------------------------------------------
// GrayFrame: derived single-channel pixels
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayFrame {
    image: GrayImage,
}

impl GrayFrame {
    pub fn from_luma(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let image = GrayImage::from_raw(width, height, data)
            .ok_or_else(|| anyhow!("grayscale buffer does not match {}x{}", width, height))?;
        Ok(Self { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixels(&self) -> &GrayImage {
        &self.image
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn rgb_frame_validates_length() {
        assert!(Frame::from_rgb(vec![0u8; 11], 2, 2, 1).is_err());
        let frame = Frame::from_rgb(vec![0u8; 12], 2, 2, 7).unwrap();
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.sequence(), 7);
    }

    #[test]
    fn grayscale_of_neutral_gray_is_identity() -> Result<()> {
        let frame = Frame::from_rgb(vec![128u8; 4 * 4 * 3], 4, 4, 1)?;
        let gray = frame.to_grayscale();
        assert_eq!(gray.width(), 4);
        assert_eq!(gray.height(), 4);
        assert!(gray.pixels().pixels().all(|p| p.0[0] == 128));
        Ok(())
    }

    #[test]
    fn grayscale_weights_green_heaviest() {
        assert_eq!(luma(255, 255, 255), 255);
        assert_eq!(luma(0, 0, 0), 0);
        assert_eq!(luma(255, 0, 0), 29);
        assert_eq!(luma(0, 255, 0), 150);
        assert_eq!(luma(0, 0, 255), 76);
    }

    #[test]
    fn red_and_blue_shifts_weigh_differently() -> Result<()> {
        let base = Frame::from_rgb(vec![50u8; 2 * 2 * 3], 2, 2, 1)?;
        let red = Frame::from_image(RgbImage::from_pixel(2, 2, Rgb([150, 50, 50])), 2);
        let blue = Frame::from_image(RgbImage::from_pixel(2, 2, Rgb([50, 50, 150])), 3);
        assert!(base.to_grayscale().pixels().pixels().all(|p| p.0[0] == 50));
        assert!(red.to_grayscale().pixels().pixels().all(|p| p.0[0] == 61));
        assert!(blue.to_grayscale().pixels().pixels().all(|p| p.0[0] == 80));
        Ok(())
    }

    #[test]
    fn grayscale_frame_rejects_short_buffer() {
        assert!(GrayFrame::from_luma(vec![0u8; 3], 2, 2).is_err());
    }
}
