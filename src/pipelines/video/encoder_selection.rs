// SPDX-License-Identifier: MPL-2.0

//! Encoder strategy for recordings

use serde::{Deserialize, Serialize};
use std::fmt;

use super::muxer::VideoEncoderKind;

/// How video frames reach the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EncoderType {
    /// The encoder exposes an input surface the driver renders into
    #[default]
    Surface,
    /// Frames are pushed from the driver's frame callback
    Buffer,
    /// No video track, audio-only recording
    None,
}

impl EncoderType {
    /// Video encoder to add to the muxer, `None` for audio-only
    pub fn video_kind(&self) -> Option<VideoEncoderKind> {
        match self {
            EncoderType::Surface => Some(VideoEncoderKind::Surface),
            EncoderType::Buffer => Some(VideoEncoderKind::Buffer),
            EncoderType::None => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "surface" => Some(EncoderType::Surface),
            "buffer" => Some(EncoderType::Buffer),
            "none" | "audio" => Some(EncoderType::None),
            _ => None,
        }
    }
}

impl fmt::Display for EncoderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderType::Surface => write!(f, "surface"),
            EncoderType::Buffer => write!(f, "buffer"),
            EncoderType::None => write!(f, "none"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_only_has_no_video_kind() {
        assert_eq!(EncoderType::None.video_kind(), None);
        assert_eq!(EncoderType::Buffer.video_kind(), Some(VideoEncoderKind::Buffer));
    }

    #[test]
    fn test_names_round_trip() {
        for ty in [EncoderType::Surface, EncoderType::Buffer, EncoderType::None] {
            assert_eq!(EncoderType::from_name(&ty.to_string()), Some(ty));
        }
    }
}
