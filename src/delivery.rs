//! Reply delivery: send the capture (or a failure notice) back to the origin.
//!
//! The chat transport is outside the pipeline; it only sees [`ReplySink`].
//! [`DirectorySink`] is the local transport used by the CLI: images are
//! written into a directory and text replies go to the log and stderr.

use crate::error::CaptureError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

/// Destination for the single reply a capture run produces.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Deliver a PNG attachment named `filename`.
    async fn send_image(&self, filename: &str, png: Vec<u8>) -> Result<(), CaptureError>;

    /// Deliver a plain-text message.
    async fn send_text(&self, text: &str) -> Result<(), CaptureError>;
}

/// Writes images into a directory; prints text replies to stderr.
///
/// Each image gets a sequence-numbered name (`0001-spreadsheet_capture.png`)
/// so a stream of captures does not overwrite itself. Files are written to
/// a temporary name and renamed, so readers never see a partial PNG.
#[derive(Debug)]
pub struct DirectorySink {
    dir: PathBuf,
    counter: AtomicUsize,
    last: std::sync::Mutex<Option<PathBuf>>,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counter: AtomicUsize::new(0),
            last: std::sync::Mutex::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the most recently written image.
    pub fn last_written(&self) -> Option<PathBuf> {
        self.last.lock().ok().and_then(|g| g.clone())
    }
}

#[async_trait]
impl ReplySink for DirectorySink {
    async fn send_image(&self, filename: &str, png: Vec<u8>) -> Result<(), CaptureError> {
        let seq = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.dir.join(format!("{seq:04}-{filename}"));

        let io_err = |e: std::io::Error| {
            CaptureError::Internal(format!("Failed to write '{}': {e}", path.display()))
        };

        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        let tmp_path = path.with_extension("png.tmp");
        tokio::fs::write(&tmp_path, &png).await.map_err(io_err)?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(io_err)?;

        info!("Capture written to {}", path.display());
        if let Ok(mut last) = self.last.lock() {
            *last = Some(path);
        }
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<(), CaptureError> {
        info!("Reply: {}", text);
        eprintln!("{text}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn images_are_numbered_and_written() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path().join("out"));

        sink.send_image("capture.png", vec![1, 2, 3]).await.unwrap();
        sink.send_image("capture.png", vec![4, 5]).await.unwrap();

        let first = dir.path().join("out/0001-capture.png");
        let second = dir.path().join("out/0002-capture.png");
        assert_eq!(std::fs::read(&first).unwrap(), vec![1, 2, 3]);
        assert_eq!(std::fs::read(&second).unwrap(), vec![4, 5]);
        assert_eq!(sink.last_written(), Some(second));
    }

    #[tokio::test]
    async fn text_replies_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());
        tokio_test::assert_ok!(sink.send_text("hello").await);
        assert!(sink.last_written().is_none());
    }
}
