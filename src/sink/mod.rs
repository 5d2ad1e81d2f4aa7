//! Still-image persistence boundary.
//!
//! A sink receives each [`CapturedImage`] exactly once, from the worker of
//! the controller that captured it, and reports where it was stored.
//! Sinks must tolerate images from back-to-back captures arriving in quick
//! succession.

mod file;
mod image;
mod memory;

pub use file::FileSink;
pub use image::{CapturedImage, StoredLocation};
pub use memory::MemorySink;

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while persisting an image.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image rejected: {0}")]
    Rejected(String),
}

/// Consumer of finished still captures.
pub trait ImageSink: Send + Sync {
    fn accept(&self, image: CapturedImage) -> Result<StoredLocation, SinkError>;
}
