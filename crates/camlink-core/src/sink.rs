//! Image persistence
//!
//! The protocol layer hands a finished [`ImageBuffer`] to an [`ImageSink`].
//! Failures are returned to the caller, never swallowed.

use chrono::Local;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::protocol::ImageBuffer;

/// Errors raised while persisting an image
#[derive(Error, Debug)]
pub enum SinkError {
    /// Target is not a plain file name
    #[error("Invalid image target '{0}'")]
    InvalidTarget(String),

    /// Filesystem write failed
    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        /// File or directory being written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },
}

/// Destination for captured images
pub trait ImageSink {
    /// Persist `buffer` under `target`, returning where it went
    fn persist(&mut self, buffer: ImageBuffer, target: &str) -> Result<PathBuf, SinkError>;
}

/// Writes images as files in a directory
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    /// Create a sink writing into `dir` (created on first write)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Output directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ImageSink for FileSink {
    fn persist(&mut self, buffer: ImageBuffer, target: &str) -> Result<PathBuf, SinkError> {
        // Targets are plain file names; anything that could escape the directory is rejected
        let name = Path::new(target);
        if target.is_empty() || name.file_name().map(|f| f != name.as_os_str()).unwrap_or(true) {
            return Err(SinkError::InvalidTarget(target.to_string()));
        }

        fs::create_dir_all(&self.dir).map_err(|source| SinkError::Write {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.dir.join(name);
        let len = buffer.len();
        fs::write(&path, buffer.into_bytes()).map_err(|source| SinkError::Write {
            path: path.clone(),
            source,
        })?;

        info!("saved {} bytes to {}", len, path.display());
        Ok(path)
    }
}

/// Timestamped file name for a capture, e.g. `photo_20240101_120000.jpg`
pub fn default_image_name(extension: &str) -> String {
    format!("photo_{}.{}", Local::now().format("%Y%m%d_%H%M%S"), extension)
}
