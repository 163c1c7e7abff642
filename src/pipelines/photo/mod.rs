// SPDX-License-Identifier: MPL-2.0

//! Still capture
//!
//! The session actor grabs the current image from the presentation view,
//! plays the shutter sound and hands the frame to [`encode_still`].

pub mod encoding;

pub use encoding::{StillFormat, encode_still};

/// Plays the shutter sound before a still is taken
pub trait ShutterSound: Send + Sync {
    /// # Arguments
    /// * `volume` - Linear gain in 0.0..=1.0
    fn play(&self, volume: f32);
}

/// Shutter that makes no sound
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentShutter;

impl ShutterSound for SilentShutter {
    fn play(&self, volume: f32) {
        tracing::trace!(volume, "Shutter (silent)");
    }
}
