// SPDX-License-Identifier: MPL-2.0

//! Muxer and encoder contract used by the recording pipeline
//!
//! A backend creates one [`Muxer`] per recording. Encoders are added before
//! `prepare`; each one reports through its [`EncoderListener`] when it is
//! prepared and when it has drained after `stop`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backends::camera::types::{CameraFrame, FrameSink};
use crate::errors::RecordingResult;

/// Track types inside a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Video encoder input strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoEncoderKind {
    Surface,
    Buffer,
}

/// Encoder fed frame by frame
pub trait FrameEncoder: Send + Sync {
    /// Hint that a frame is about to be encoded
    fn frame_available_soon(&self);

    /// Encode one frame
    fn encode(&self, frame: &CameraFrame);
}

/// Input side of an added video encoder
#[derive(Clone)]
pub enum VideoEncoderHandle {
    /// Surface the driver renders into
    Surface(Arc<dyn FrameSink>),
    /// Encoder fed from the frame callback
    Buffer(Arc<dyn FrameEncoder>),
}

/// Lifecycle notifications of one encoder
///
/// `on_stopped` is called from the backend's own thread once the track has
/// drained. `output_path` is set when the container holds data, `None` when
/// the muxer never started.
pub trait EncoderListener: Send + Sync {
    fn on_prepared(&self, track: TrackKind);
    fn on_stopped(&self, track: TrackKind, output_path: Option<&Path>);
}

/// One recording's container plus its encoders
pub trait Muxer: Send {
    fn output_path(&self) -> &Path;

    /// Add the video encoder; at most one per muxer
    fn add_video_encoder(
        &mut self,
        kind: VideoEncoderKind,
        width: u32,
        height: u32,
        listener: Arc<dyn EncoderListener>,
    ) -> RecordingResult<VideoEncoderHandle>;

    /// Add the audio encoder; at most one per muxer
    fn add_audio_encoder(&mut self, listener: Arc<dyn EncoderListener>) -> RecordingResult<()>;

    /// Allocate encoder resources; listeners get `on_prepared`
    fn prepare(&mut self) -> RecordingResult<()>;

    fn start(&mut self) -> RecordingResult<()>;

    /// Ask every encoder to drain; completion is reported through `on_stopped`
    fn stop(&mut self);
}

/// Creates muxers for a session
pub trait MuxerFactory: Send + Sync {
    fn create_muxer(&self, output_path: PathBuf) -> RecordingResult<Box<dyn Muxer>>;

    /// File extension of the containers this factory writes
    fn extension(&self) -> &str {
        crate::constants::media::RECORDING_EXTENSION
    }
}
