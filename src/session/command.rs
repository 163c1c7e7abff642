// SPDX-License-Identifier: MPL-2.0

use std::fmt;
use std::path::PathBuf;

use super::surface::PreviewSurface;
use crate::backends::camera::types::ControlFlag;
use crate::backends::usb::UsbControlBlock;

/// Work item executed by the session actor
pub(crate) enum Command {
    Open(UsbControlBlock),
    Close,
    /// Carries the preview epoch it was posted in
    StartPreview(PreviewSurface, u64),
    StopPreview,
    /// Derived path when `None`
    CaptureStill(Option<PathBuf>),
    StartRecording,
    StopRecording,
    UpdateMedia(PathBuf),
    SetValue(ControlFlag, i32),
    GetValue(ControlFlag),
    ResetValue(ControlFlag),
    Release,
    /// Encoder completion, posted from the encoder's thread
    RecordingStopped(Option<PathBuf>),
    /// Release grace period expired
    ForceRelease,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Open(_) => "open",
            Command::Close => "close",
            Command::StartPreview(..) => "start-preview",
            Command::StopPreview => "stop-preview",
            Command::CaptureStill(_) => "capture-still",
            Command::StartRecording => "start-recording",
            Command::StopRecording => "stop-recording",
            Command::UpdateMedia(_) => "update-media",
            Command::SetValue(..) => "set-value",
            Command::GetValue(_) => "get-value",
            Command::ResetValue(_) => "reset-value",
            Command::Release => "release",
            Command::RecordingStopped(_) => "recording-stopped",
            Command::ForceRelease => "force-release",
        }
    }

    /// Commands that still run after the session was released
    pub fn runs_after_release(&self) -> bool {
        matches!(
            self,
            Command::UpdateMedia(_) | Command::RecordingStopped(_) | Command::ForceRelease
        )
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Open(block) => f.debug_tuple("Open").field(block).finish(),
            Command::StartPreview(surface, epoch) => {
                f.debug_tuple("StartPreview").field(surface).field(epoch).finish()
            }
            Command::CaptureStill(path) => f.debug_tuple("CaptureStill").field(path).finish(),
            Command::UpdateMedia(path) => f.debug_tuple("UpdateMedia").field(path).finish(),
            Command::SetValue(flag, value) => {
                f.debug_tuple("SetValue").field(flag).field(value).finish()
            }
            Command::GetValue(flag) => f.debug_tuple("GetValue").field(flag).finish(),
            Command::ResetValue(flag) => f.debug_tuple("ResetValue").field(flag).finish(),
            Command::RecordingStopped(path) => {
                f.debug_tuple("RecordingStopped").field(path).finish()
            }
            other => f.write_str(other.name()),
        }
    }
}
