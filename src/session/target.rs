//! Frame sinks attached to a session at configuration time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Encoding of frames written to a still target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Yuv420,
    Rgb8,
}

impl ImageFormat {
    /// File extension used when persisting this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Yuv420 => "yuv",
            ImageFormat::Rgb8 => "rgb",
        }
    }
}

/// Opaque handle of a renderable preview surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(u64);

impl SurfaceId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Continuous preview output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PreviewTarget {
    pub surface: SurfaceId,
    /// Buffer size requested from the surface.
    pub size: Resolution,
}

impl PreviewTarget {
    pub fn new(surface: SurfaceId, size: Resolution) -> Self {
        Self { surface, size }
    }
}

/// Single-frame, compressed still output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StillTarget {
    pub size: Resolution,
    pub format: ImageFormat,
    /// Buffers the target can hold before frames must be consumed.
    pub max_images: usize,
}

/// A sink for frames from a session. Immutable for the session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputTarget {
    Preview(PreviewTarget),
    Still(StillTarget),
}

impl OutputTarget {
    pub fn is_still(&self) -> bool {
        matches!(self, OutputTarget::Still(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution() {
        let res = Resolution::new(1920, 1080);
        assert_eq!(res.pixel_count(), 1920 * 1080);
        assert_eq!(res.to_string(), "1920x1080");
        assert!(!res.is_empty());
        assert!(Resolution::new(0, 10).is_empty());
    }

    #[test]
    fn test_format_extension() {
        assert_eq!(ImageFormat::Jpeg.extension(), "jpg");
    }
}
