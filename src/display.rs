//! Display surface holding the latest processed frame.
//!
//! The surface keeps at most one [`ProcessedFrame`]. Every update replaces
//! the previous one (last write wins) and wakes subscribers so they can
//! re-render.

use tokio::sync::watch;

use crate::frame::ProcessedFrame;

/// What the display shows right now.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum View {
    /// Only the live capture preview.
    Preview,
    /// The live preview with the processed frame (as a data URI) on top.
    Overlay(String),
}

impl View {
    fn of(frame: Option<&ProcessedFrame>) -> Self {
        frame.map_or(Self::Preview, |f| Self::Overlay(f.data_uri()))
    }
}

/// Owner side of the display state.
#[derive(Debug)]
pub struct DisplaySurface {
    tx: watch::Sender<Option<ProcessedFrame>>,
}

impl Default for DisplaySurface {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplaySurface {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Replace the current frame and mark the display for re-render.
    pub fn present(&self, frame: ProcessedFrame) {
        self.tx.send_replace(Some(frame));
    }

    /// Drop the current frame, leaving only the preview.
    pub fn clear(&self) {
        self.tx.send_if_modified(|current| current.take().is_some());
    }

    #[must_use]
    pub fn current(&self) -> Option<ProcessedFrame> {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn view(&self) -> View {
        View::of(self.tx.borrow().as_ref())
    }

    /// Read handle for a renderer.
    #[must_use]
    pub fn subscribe(&self) -> DisplayHandle {
        DisplayHandle {
            rx: self.tx.subscribe(),
        }
    }
}

/// Renderer side of the display state.
#[derive(Clone, Debug)]
pub struct DisplayHandle {
    rx: watch::Receiver<Option<ProcessedFrame>>,
}

impl DisplayHandle {
    #[must_use]
    pub fn view(&self) -> View {
        View::of(self.rx.borrow().as_ref())
    }

    #[must_use]
    pub fn latest(&self) -> Option<ProcessedFrame> {
        self.rx.borrow().clone()
    }

    /// Wait until the display needs re-rendering.
    ///
    /// Returns `false` once the surface is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Take the pending re-render flag without waiting, and return the view
    /// to draw if one was pending.
    pub fn poll_view(&mut self) -> Option<View> {
        if self.rx.has_changed().unwrap_or(false) {
            Some(View::of(self.rx.borrow_and_update().as_ref()))
        } else {
            None
        }
    }
}

#[cfg(test)]
#[path = "display_test.rs"]
mod tests;
