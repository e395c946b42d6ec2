//! Capture sources: where the relay pulls its still images from.
//!
//! A source hands out the current snapshot on demand and never blocks. It
//! does not own the camera: the relay only looks at whatever frame the
//! producer last made available.

use std::path::{Path, PathBuf};

use tokio::sync::watch;
use tracing::debug;

use crate::error::RelayError;
use crate::frame::jpeg_data_uri;

/// Non-blocking snapshot provider.
///
/// Snapshots are encoded images as text, either raw base64 or a data URI.
/// `None` means no frame is available right now (e.g. the camera is still
/// warming up); the caller simply tries again on its next tick.
pub trait CaptureSource {
    fn try_snapshot(&mut self) -> Option<String>;
}

impl<F> CaptureSource for F
where
    F: FnMut() -> Option<String>,
{
    fn try_snapshot(&mut self) -> Option<String> {
        self()
    }
}

/// Create a latest-value slot shared between a frame producer and the relay.
#[must_use]
pub fn snapshot_feed() -> (SnapshotPublisher, SnapshotFeed) {
    let (tx, rx) = watch::channel(None);
    (SnapshotPublisher { tx }, SnapshotFeed { rx })
}

/// Producer half of [`snapshot_feed`], held by whatever drives the camera.
#[derive(Debug)]
pub struct SnapshotPublisher {
    tx: watch::Sender<Option<String>>,
}

impl SnapshotPublisher {
    /// Replace the current snapshot.
    pub fn publish(&self, snapshot: impl Into<String>) {
        self.tx.send_replace(Some(snapshot.into()));
    }

    /// Mark the feed as having no frame (e.g. camera paused).
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }
}

/// Read-only half of [`snapshot_feed`].
#[derive(Clone, Debug)]
pub struct SnapshotFeed {
    rx: watch::Receiver<Option<String>>,
}

impl CaptureSource for SnapshotFeed {
    fn try_snapshot(&mut self) -> Option<String> {
        self.rx.borrow().clone()
    }
}

/// Cycles through JPEG images on disk, one per snapshot.
///
/// Files are read and encoded once at open, so snapshots never touch the
/// filesystem.
#[derive(Debug)]
pub struct ImageDirSource {
    frames: Vec<String>,
    next: usize,
}

impl ImageDirSource {
    /// Open a single JPEG file, or every `.jpg`/`.jpeg` file in a directory
    /// in name order.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::CaptureIo`] if the path or any image in it
    /// cannot be read.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref();
        let io_err = |source| RelayError::CaptureIo {
            path: path.to_path_buf(),
            source,
        };

        let paths = if path.is_dir() {
            let mut paths = std::fs::read_dir(path)
                .map_err(io_err)?
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|p| is_jpeg(p))
                .collect::<Vec<PathBuf>>();
            paths.sort();
            paths
        } else {
            vec![path.to_path_buf()]
        };

        let mut frames = Vec::with_capacity(paths.len());
        for image in &paths {
            let bytes = std::fs::read(image).map_err(|source| RelayError::CaptureIo {
                path: image.clone(),
                source,
            })?;
            frames.push(jpeg_data_uri(&bytes));
        }

        debug!(path = %path.display(), frames = frames.len(), "image capture source opened");
        Ok(Self { frames, next: 0 })
    }

    /// Number of images in the rotation.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl CaptureSource for ImageDirSource {
    fn try_snapshot(&mut self) -> Option<String> {
        let frame = self.frames.get(self.next)?.clone();
        self.next = (self.next + 1) % self.frames.len();
        Some(frame)
    }
}

fn is_jpeg(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
}

#[cfg(test)]
#[path = "capture_test.rs"]
mod tests;
