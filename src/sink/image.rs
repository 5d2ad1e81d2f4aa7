//! Captured still images.

use crate::device::Facing;
use crate::hardware::StillFrame;
use crate::session::{ImageFormat, Resolution};
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;

/// An immutable still capture plus its metadata.
#[derive(Clone)]
pub struct CapturedImage {
    bytes: Vec<u8>,
    size: Resolution,
    format: ImageFormat,
    timestamp: DateTime<Utc>,
    facing: Facing,
    /// Per-controller capture sequence number, starting at 1.
    sequence: u64,
}

impl CapturedImage {
    pub fn new(frame: StillFrame, facing: Facing, sequence: u64) -> Self {
        Self {
            bytes: frame.bytes,
            size: frame.size,
            format: frame.format,
            timestamp: frame.timestamp,
            facing,
            sequence,
        }
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn size(&self) -> Resolution {
        self.size
    }

    #[inline]
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    #[inline]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[inline]
    pub fn facing(&self) -> Facing {
        self.facing
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// BLAKE3 digest of the image bytes, hex encoded.
    pub fn digest(&self) -> String {
        blake3::hash(&self.bytes).to_hex().to_string()
    }
}

impl fmt::Debug for CapturedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedImage")
            .field("facing", &self.facing)
            .field("sequence", &self.sequence)
            .field("size", &self.size)
            .field("format", &self.format)
            .field("timestamp", &self.timestamp)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Where a sink put an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLocation {
    pub path: PathBuf,
    pub bytes: usize,
    /// BLAKE3 digest of the stored bytes, hex encoded.
    pub digest: String,
}
