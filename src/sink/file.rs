//! Directory-backed image sink.

use super::{CapturedImage, ImageSink, SinkError, StoredLocation};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Collision suffixes tried before giving up on a name.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Writes each image to `IMG_<yyyyMMdd_HHmmss>.<ext>` in a directory.
///
/// Names never overwrite an existing file; captures within the same second
/// get a `_N` suffix.
#[derive(Debug, Clone)]
pub struct FileSink {
    directory: PathBuf,
}

impl FileSink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn candidate(&self, stem: &str, ext: &str, attempt: u32) -> PathBuf {
        let name = match attempt {
            0 => format!("{stem}.{ext}"),
            n => format!("{stem}_{n}.{ext}"),
        };
        self.directory.join(name)
    }
}

impl ImageSink for FileSink {
    fn accept(&self, image: CapturedImage) -> Result<StoredLocation, SinkError> {
        fs::create_dir_all(&self.directory).map_err(|source| SinkError::Io {
            path: self.directory.clone(),
            source,
        })?;

        let stem = format!("IMG_{}", image.timestamp().format("%Y%m%d_%H%M%S"));
        let ext = image.format().extension();

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let path = self.candidate(&stem, ext, attempt);
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(SinkError::Io { path, source }),
            };

            if let Err(source) = file.write_all(image.bytes()).and_then(|()| file.sync_all()) {
                let _ = fs::remove_file(&path);
                return Err(SinkError::Io { path, source });
            }

            tracing::debug!(path = %path.display(), bytes = image.bytes().len(), "Image written");
            return Ok(StoredLocation {
                path,
                bytes: image.bytes().len(),
                digest: image.digest(),
            });
        }

        Err(SinkError::Rejected(format!(
            "no free file name for {stem} after {MAX_NAME_ATTEMPTS} attempts"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Facing;
    use crate::hardware::StillFrame;
    use crate::session::{ImageFormat, Resolution};
    use chrono::{TimeZone, Utc};

    fn image(sequence: u64) -> CapturedImage {
        let frame = StillFrame {
            bytes: vec![0xFF, 0xD8, sequence as u8, 0xFF, 0xD9],
            size: Resolution::new(1, 1),
            format: ImageFormat::Jpeg,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap(),
        };
        CapturedImage::new(frame, Facing::Back, sequence)
    }

    #[test]
    fn test_timestamped_name() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path());

        let location = sink.accept(image(1)).unwrap();
        assert_eq!(location.path, dir.path().join("IMG_20240309_140507.jpg"));
        assert_eq!(location.bytes, 5);
        assert_eq!(fs::read(&location.path).unwrap(), image(1).bytes());
    }

    #[test]
    fn test_same_second_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path());

        let first = sink.accept(image(1)).unwrap();
        let second = sink.accept(image(2)).unwrap();

        assert_ne!(first.path, second.path);
        assert_eq!(second.path, dir.path().join("IMG_20240309_140507_1.jpg"));
        assert_ne!(first.digest, second.digest);
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("nested").join("out"));
        assert!(sink.accept(image(1)).is_ok());
    }

    #[test]
    fn test_unwritable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();

        let sink = FileSink::new(blocker.join("sub"));
        assert!(matches!(sink.accept(image(1)), Err(SinkError::Io { .. })));
    }
}
