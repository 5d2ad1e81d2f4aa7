//! In-memory image sink.

use super::{CapturedImage, ImageSink, SinkError, StoredLocation};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// Keeps every accepted image in memory. Can be told to reject images.
#[derive(Debug, Default)]
pub struct MemorySink {
    images: Mutex<Vec<CapturedImage>>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `accept` calls fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn images(&self) -> Vec<CapturedImage> {
        self.images.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.images.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ImageSink for MemorySink {
    fn accept(&self, image: CapturedImage) -> Result<StoredLocation, SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected("memory sink is failing".into()));
        }

        let mut images = self.images.lock();
        let location = StoredLocation {
            path: PathBuf::from(format!("memory/{}/{}", image.facing(), images.len() + 1)),
            bytes: image.bytes().len(),
            digest: image.digest(),
        };
        images.push(image);
        Ok(location)
    }
}
