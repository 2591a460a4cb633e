//! Door-leaf classification by region color.
//!
//! Each door leaf is a fixed rectangle of the captured frame. Its average color
//! is compared with the known color of a closed leaf; the door counts as closed
//! only when both leaves are within the cutoff.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::MonitorConfig;
use crate::frame::Frame;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DoorError {
    #[error("region {region} is empty")]
    EmptyRegion { region: Region },
    #[error("region {region} does not fit inside a {width}x{height} frame")]
    RegionOutOfBounds {
        region: Region,
        width: u32,
        height: u32,
    },
}

/// Axis-aligned rectangle in frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Checks the region is non-empty and lies fully inside `width` x `height`.
    pub fn check_fits(&self, width: u32, height: u32) -> Result<(), DoorError> {
        if self.width == 0 || self.height == 0 {
            return Err(DoorError::EmptyRegion { region: *self });
        }
        let right = self.x as u64 + self.width as u64;
        let bottom = self.y as u64 + self.height as u64;
        if right > width as u64 || bottom > height as u64 {
            return Err(DoorError::RegionOutOfBounds {
                region: *self,
                width,
                height,
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {}x{})",
            self.x, self.y, self.width, self.height
        )
    }
}

/// Four-channel average color. The fourth channel is unused and stays 0 for
/// samples taken from RGB frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ColorSample(pub [f64; 4]);

impl ColorSample {
    pub const fn rgb(r: f64, g: f64, b: f64) -> Self {
        Self([r, g, b, 0.0])
    }

    pub fn channels(&self) -> [f64; 4] {
        self.0
    }
}

/// Sum of absolute per-channel differences.
pub fn color_distance(observed: &ColorSample, expected: &ColorSample) -> f64 {
    observed
        .0
        .iter()
        .zip(expected.0.iter())
        .map(|(a, b)| (a - b).abs())
        .sum()
}

/// Average color of every pixel inside `region`.
pub fn mean_color(frame: &Frame, region: &Region) -> Result<ColorSample, DoorError> {
    region.check_fits(frame.width(), frame.height())?;
    let pixels = frame.pixels();
    let mut sums = [0u64; 3];
    for y in region.y..region.y + region.height {
        for x in region.x..region.x + region.width {
            let px = pixels.get_pixel(x, y).0;
            for (sum, value) in sums.iter_mut().zip(px) {
                *sum += value as u64;
            }
        }
    }
    let count = region.area() as f64;
    Ok(ColorSample([
        sums[0] as f64 / count,
        sums[1] as f64 / count,
        sums[2] as f64 / count,
        0.0,
    ]))
}

/// Both leaves must be strictly within `cutoff`; one open leaf means open.
pub fn is_door_closed(left_distance: f64, right_distance: f64, cutoff: f64) -> bool {
    left_distance < cutoff && right_distance < cutoff
}

// ----------------------------------------------------------------------------
// DoorClassifier
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DoorObservation {
    pub left_color: ColorSample,
    pub right_color: ColorSample,
    pub left_distance: f64,
    pub right_distance: f64,
    pub closed: bool,
}

pub struct DoorClassifier {
    left: Region,
    right: Region,
    expected: ColorSample,
    cutoff: f64,
}

impl DoorClassifier {
    pub fn new(left: Region, right: Region, expected: ColorSample, cutoff: f64) -> Self {
        Self {
            left,
            right,
            expected,
            cutoff,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            config.left_door,
            config.right_door,
            config.expected_color,
            config.color_cutoff,
        )
    }

    pub fn classify(&self, frame: &Frame) -> Result<DoorObservation, DoorError> {
        let left_color = mean_color(frame, &self.left)?;
        let right_color = mean_color(frame, &self.right)?;
        let left_distance = color_distance(&left_color, &self.expected);
        let right_distance = color_distance(&right_color, &self.expected);
        Ok(DoorObservation {
            left_color,
            right_color,
            left_distance,
            right_distance,
            closed: is_door_closed(left_distance, right_distance, self.cutoff),
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
