// SPDX-License-Identifier: MPL-2.0

//! Video recording pipeline
//!
//! This module provides the recording side of a camera session:
//! - The muxer/encoder contract implemented by recording backends
//! - [`RecordingPipeline`], built fresh for every recording
//! - A GStreamer MP4 backend (feature `gstreamer`)

pub mod encoder_selection;
#[cfg(feature = "gstreamer")]
pub mod gst;
pub mod muxer;
pub mod recorder;

// Re-export commonly used types
pub use encoder_selection::EncoderType;
#[cfg(feature = "gstreamer")]
pub use gst::GstMuxerFactory;
pub use muxer::{
    EncoderListener, FrameEncoder, Muxer, MuxerFactory, TrackKind, VideoEncoderHandle,
    VideoEncoderKind,
};
pub use recorder::RecordingPipeline;
