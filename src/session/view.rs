// SPDX-License-Identifier: MPL-2.0

//! Presentation-side collaborators held weakly by a session

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::backends::camera::types::{CameraFrame, FrameSink};

/// View showing the preview, source of still images
pub trait CameraView: Send + Sync {
    /// Current image, as shown to the user
    fn capture_still_image(&self) -> Result<CameraFrame, String>;
}

/// Context that owns a session (a window, an activity)
pub trait SessionOwner: Send + Sync {
    fn is_destroyed(&self) -> bool;
}

/// Frame sink that keeps the most recent frame for stills
///
/// Bind it as the preview surface and register it as the session's view.
#[derive(Default)]
pub struct LatestFrameView {
    latest: Mutex<Option<CameraFrame>>,
    presented: AtomicU64,
}

impl LatestFrameView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames presented so far
    pub fn frame_count(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }
}

impl FrameSink for LatestFrameView {
    fn present(&self, frame: &CameraFrame) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame.clone());
        self.presented.fetch_add(1, Ordering::Relaxed);
    }
}

impl CameraView for LatestFrameView {
    fn capture_still_image(&self) -> Result<CameraFrame, String> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| "no frame has been presented yet".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_frame_wins() {
        let view = LatestFrameView::new();
        assert!(view.capture_still_image().is_err());

        view.present(&CameraFrame::rgba(1, 1, vec![1, 2, 3, 4]));
        view.present(&CameraFrame::rgba(1, 1, vec![5, 6, 7, 8]));
        assert_eq!(view.frame_count(), 2);
        assert_eq!(&*view.capture_still_image().unwrap().data, &[5, 6, 7, 8]);
    }
}
