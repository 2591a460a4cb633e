//! Motion magnitude between consecutive grayscale frames.
//!
//! The engine thresholds the absolute difference of two frames into a binary
//! mask, dilates it with a small structuring element, erodes the result with a
//! larger one and counts the surviving pixels. Only blobs that are still solid
//! after the larger erosion count as motion.

use image::{GrayImage, Luma};
use serde::Deserialize;
use thiserror::Error;

use crate::config::MonitorConfig;
use crate::frame::GrayFrame;

const MASK_ON: u8 = 255;
const MASK_OFF: u8 = 0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MotionError {
    #[error("frame dimensions differ: previous {prev_width}x{prev_height}, current {width}x{height}")]
    DimensionMismatch {
        prev_width: u32,
        prev_height: u32,
        width: u32,
        height: u32,
    },
}

// ----------------------------------------------------------------------------
// Structuring elements
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelShape {
    Rect,
    Cross,
    #[default]
    Ellipse,
}

/// Binary structuring element with its anchor at `(width / 2, height / 2)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructuringElement {
    width: u32,
    height: u32,
    rows: Vec<Vec<bool>>,
    /// (dx, dy) of every set cell relative to the anchor.
    offsets: Vec<(i64, i64)>,
}

impl StructuringElement {
    pub fn new(shape: KernelShape, width: u32, height: u32) -> Self {
        let w = width.max(1);
        let h = height.max(1);
        let anchor_x = (w / 2) as i64;
        let anchor_y = (h / 2) as i64;

        let mut rows = Vec::with_capacity(h as usize);
        for i in 0..h as i64 {
            let (start, end) = match shape {
                KernelShape::Rect => (0, w as i64),
                KernelShape::Cross if i == anchor_y => (0, w as i64),
                KernelShape::Cross => (anchor_x, anchor_x + 1),
                KernelShape::Ellipse => ellipse_span(i, w as i64, h as i64),
            };
            rows.push((0..w as i64).map(|j| j >= start && j < end).collect());
        }

        let offsets = rows
            .iter()
            .enumerate()
            .flat_map(|(i, row): (usize, &Vec<bool>)| {
                row.iter()
                    .enumerate()
                    .filter(|(_, set)| **set)
                    .map(move |(j, _)| (j as i64 - anchor_x, i as i64 - anchor_y))
            })
            .collect();

        Self {
            width: w,
            height: h,
            rows,
            offsets,
        }
    }

    pub fn ellipse(width: u32, height: u32) -> Self {
        Self::new(KernelShape::Ellipse, width, height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn contains(&self, col: u32, row: u32) -> bool {
        self.rows
            .get(row as usize)
            .and_then(|r| r.get(col as usize))
            .copied()
            .unwrap_or(false)
    }

    pub fn offsets(&self) -> &[(i64, i64)] {
        &self.offsets
    }
}

/// Half-open column span of row `i` of an elliptical element.
fn ellipse_span(i: i64, width: i64, height: i64) -> (i64, i64) {
    let r = height / 2;
    let c = width / 2;
    let inv_r2 = if r > 0 { 1.0 / (r * r) as f64 } else { 0.0 };
    let dy = i - r;
    if dy.abs() > r {
        return (0, 0);
    }
    let dx = (c as f64 * (((r * r - dy * dy) as f64) * inv_r2).sqrt()).round() as i64;
    ((c - dx).max(0), (c + dx + 1).min(width))
}

// ----------------------------------------------------------------------------
// DifferenceEngine
// ----------------------------------------------------------------------------

pub struct DifferenceEngine {
    intensity_threshold: u8,
    dilation: StructuringElement,
    erosion: StructuringElement,
}

impl DifferenceEngine {
    pub fn new(
        intensity_threshold: u8,
        dilation: StructuringElement,
        erosion: StructuringElement,
    ) -> Self {
        Self {
            intensity_threshold,
            dilation,
            erosion,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            config.intensity_threshold,
            config.dilation.element(),
            config.erosion.element(),
        )
    }

    /// Count of changed pixels between `previous` and `current` after noise
    /// suppression.
    pub fn compute_motion(
        &self,
        previous: &GrayFrame,
        current: &GrayFrame,
    ) -> Result<u64, MotionError> {
        let mask = self.motion_mask(previous, current)?;
        Ok(mask.pixels().filter(|p| p.0[0] != MASK_OFF).count() as u64)
    }

    /// Final binary mask (0 or 255 per pixel) used by `compute_motion`.
    pub fn motion_mask(
        &self,
        previous: &GrayFrame,
        current: &GrayFrame,
    ) -> Result<GrayImage, MotionError> {
        if previous.width() != current.width() || previous.height() != current.height() {
            return Err(MotionError::DimensionMismatch {
                prev_width: previous.width(),
                prev_height: previous.height(),
                width: current.width(),
                height: current.height(),
            });
        }
        let thresh = threshold_diff(previous.pixels(), current.pixels(), self.intensity_threshold);
        let dilated = dilate(&thresh, &self.dilation);
        Ok(erode(&dilated, &self.erosion))
    }
}

fn threshold_diff(a: &GrayImage, b: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        let diff = a.get_pixel(x, y).0[0].abs_diff(b.get_pixel(x, y).0[0]);
        Luma([if diff > threshold { MASK_ON } else { MASK_OFF }])
    })
}

/// Out-of-frame cells are skipped, so they never switch a pixel on.
fn dilate(mask: &GrayImage, kernel: &StructuringElement) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        let hit = kernel
            .offsets()
            .iter()
            .filter_map(|&(dx, dy)| sample(mask, x, y, dx, dy))
            .any(|v| v != MASK_OFF);
        Luma([if hit { MASK_ON } else { MASK_OFF }])
    })
}

/// Out-of-frame cells count as "off", so blobs touching the border erode
/// like interior ones.
fn erode(mask: &GrayImage, kernel: &StructuringElement) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        let keep = kernel
            .offsets()
            .iter()
            .all(|&(dx, dy)| sample(mask, x, y, dx, dy).is_some_and(|v| v != MASK_OFF));
        Luma([if keep { MASK_ON } else { MASK_OFF }])
    })
}

fn sample(mask: &GrayImage, x: u32, y: u32, dx: i64, dy: i64) -> Option<u8> {
    let sx = x as i64 + dx;
    let sy = y as i64 + dy;
    if sx < 0 || sy < 0 || sx >= mask.width() as i64 || sy >= mask.height() as i64 {
        return None;
    }
    Some(mask.get_pixel(sx as u32, sy as u32).0[0])
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
