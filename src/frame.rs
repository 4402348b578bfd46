//! Captured frame containers.
//!
//! - `RawFrame`: pixels as handed back by a camera source, tagged with channel order.
//! - `Rotation`: the per-slot rotation applied before a frame is persisted.
//!
//! Sources never rotate or re-order channels themselves. The capture path calls
//! `RawFrame::into_oriented_image()` once, so every backend gets the same treatment.

use anyhow::{anyhow, Result};
use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};

use crate::ingest::normalize::{normalize_to_rgb, PixelFormat};

/// Frame captured from a single camera slot.
pub struct RawFrame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl RawFrame {
    pub(crate) fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() || self.width == 0 || self.height == 0
    }

    pub(crate) fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Reorder channels to RGB and apply `rotation`.
    pub fn into_oriented_image(self, rotation: Rotation) -> Result<RgbImage> {
        let rgb = normalize_to_rgb(&self.data, self.width, self.height, self.format)?;
        let image = RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))?;
        Ok(rotation.apply(image))
    }
}

/// Rotation applied to a slot's frames.
///
/// `Ccw90` is what the configuration calls 270 degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Half,
    Ccw90,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Result<Self> {
        match degrees {
            0 => Ok(Self::None),
            90 => Ok(Self::Cw90),
            180 => Ok(Self::Half),
            270 => Ok(Self::Ccw90),
            other => Err(anyhow!(
                "rotation must be one of 0, 90, 180, 270 (got {})",
                other
            )),
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Cw90 => 90,
            Self::Half => 180,
            Self::Ccw90 => 270,
        }
    }

    pub fn apply(self, image: RgbImage) -> RgbImage {
        match self {
            Self::None => image,
            Self::Cw90 => imageops::rotate90(&image),
            Self::Half => imageops::rotate180(&image),
            Self::Ccw90 => imageops::rotate270(&image),
        }
    }
}
