use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Pixel formats the capture path understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit interleaved RGB
    Rgb8,
    /// 16-bit native depth units
    Z16,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Z16 => 2,
        }
    }
}

/// Stream configuration requested from the device.
///
/// Color and depth share the same resolution and rate; no alignment or
/// resampling is requested from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamProfile {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub color_format: PixelFormat,
    pub depth_format: PixelFormat,
}

impl StreamProfile {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps,
            color_format: PixelFormat::Rgb8,
            depth_format: PixelFormat::Z16,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Byte length of one color frame (width×height×3)
    pub fn color_bytes(&self) -> usize {
        self.pixel_count() * self.color_format.bytes_per_pixel()
    }

    /// Byte length of one depth frame (width×height×2)
    pub fn depth_bytes(&self) -> usize {
        self.pixel_count() * self.depth_format.bytes_per_pixel()
    }
}

/// One synchronized capture from the device.
///
/// Either stream may be missing from a composite frame.
#[derive(Debug, Clone, Default)]
pub struct FramePair {
    pub color: Option<Bytes>,
    pub depth: Option<Bytes>,
}

impl FramePair {
    pub fn new(color: impl Into<Bytes>, depth: impl Into<Bytes>) -> Self {
        Self {
            color: Some(color.into()),
            depth: Some(depth.into()),
        }
    }

    pub fn color_only(color: impl Into<Bytes>) -> Self {
        Self {
            color: Some(color.into()),
            depth: None,
        }
    }

    pub fn depth_only(depth: impl Into<Bytes>) -> Self {
        Self {
            color: None,
            depth: Some(depth.into()),
        }
    }
}
