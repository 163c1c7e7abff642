// SPDX-License-Identifier: MPL-2.0

//! Error types for camera sessions and USB presence monitoring
//!
//! Facade calls on [`crate::session::SessionHandle`] return [`SessionError`]
//! synchronously for precondition violations. Failures that happen while the
//! session actor executes a command are delivered to observers instead.

use std::fmt;
use std::time::Duration;

use crate::backends::camera::types::ControlFlag;

/// Result type alias using SessionError
pub type SessionResult<T> = Result<T, SessionError>;

/// Result type alias for device driver calls
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Result type alias for recording pipeline calls
pub type RecordingResult<T> = Result<T, RecordingError>;

/// Result type alias for the presence monitor
pub type PresenceResult<T> = Result<T, PresenceError>;

/// Errors reported by a camera session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Caller passed something the session cannot use (surface kind, raw flag)
    InvalidArgument(String),
    /// Operation is not valid in the current session state
    IllegalState(String),
    /// Session has been released
    AlreadyReleased,
    /// Failure surfaced from the device driver
    Device(DeviceError),
    /// Recording pipeline could not be prepared or started
    Encoding(RecordingError),
    /// Still image capture failed
    Photo(PhotoError),
    /// A bounded wait on the actor expired
    Timeout(Duration),
    /// The actor thread could not be spawned
    Spawn(String),
}

/// Errors reported by a device driver
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// Device could not be opened
    OpenFailed(String),
    /// Requested preview configuration was refused by the device
    ConfigurationRejected(String),
    /// Streaming could not be started or broke down
    StreamFailed(String),
    /// Control is not implemented by this device
    UnsupportedControl(ControlFlag),
    /// Control access failed
    ControlFailed(String),
    /// Device went away while in use
    Disconnected,
    /// Low-level I/O failure
    Io(String),
}

/// Recording-specific errors
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingError {
    /// No encoder backend was configured for the session
    NoBackend,
    /// Muxer or encoder could not be created
    EncoderNotAvailable(String),
    /// Pipeline preparation failed
    PrepareFailed(String),
    /// Failed to start recording
    StartFailed(String),
    /// Pipeline error during recording
    PipelineError(String),
}

/// Photo capture errors
#[derive(Debug, Clone, PartialEq)]
pub enum PhotoError {
    /// No frame available for capture
    NoFrameAvailable,
    /// Capture failed
    CaptureFailed(String),
    /// Encoding failed
    EncodingFailed(String),
    /// Save failed
    SaveFailed(String),
}

/// Errors reported by the presence monitor and its platform
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceError {
    /// Monitor was destroyed
    AlreadyDestroyed,
    /// Platform refused to start a permission request
    PermissionRequest(String),
    /// Device cannot be opened without permission
    PermissionDenied(String),
    /// Device node could not be opened
    Io(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            SessionError::IllegalState(msg) => write!(f, "Illegal state: {}", msg),
            SessionError::AlreadyReleased => write!(f, "Session already released"),
            SessionError::Device(e) => write!(f, "Device error: {}", e),
            SessionError::Encoding(e) => write!(f, "Encoding error: {}", e),
            SessionError::Photo(e) => write!(f, "Photo error: {}", e),
            SessionError::Timeout(after) => {
                write!(f, "Timed out after {} ms", after.as_millis())
            }
            SessionError::Spawn(msg) => write!(f, "Failed to spawn session thread: {}", msg),
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::OpenFailed(msg) => write!(f, "Open failed: {}", msg),
            DeviceError::ConfigurationRejected(msg) => {
                write!(f, "Configuration rejected: {}", msg)
            }
            DeviceError::StreamFailed(msg) => write!(f, "Stream failed: {}", msg),
            DeviceError::UnsupportedControl(flag) => write!(f, "Unsupported control: {}", flag),
            DeviceError::ControlFailed(msg) => write!(f, "Control access failed: {}", msg),
            DeviceError::Disconnected => write!(f, "Camera disconnected"),
            DeviceError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl fmt::Display for RecordingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingError::NoBackend => write!(f, "No encoder backend configured"),
            RecordingError::EncoderNotAvailable(msg) => write!(f, "Encoder not available: {}", msg),
            RecordingError::PrepareFailed(msg) => write!(f, "Failed to prepare recording: {}", msg),
            RecordingError::StartFailed(msg) => write!(f, "Failed to start recording: {}", msg),
            RecordingError::PipelineError(msg) => write!(f, "Pipeline error: {}", msg),
        }
    }
}

impl fmt::Display for PhotoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhotoError::NoFrameAvailable => write!(f, "No frame available for capture"),
            PhotoError::CaptureFailed(msg) => write!(f, "Capture failed: {}", msg),
            PhotoError::EncodingFailed(msg) => write!(f, "Encoding failed: {}", msg),
            PhotoError::SaveFailed(msg) => write!(f, "Save failed: {}", msg),
        }
    }
}

impl fmt::Display for PresenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresenceError::AlreadyDestroyed => write!(f, "Presence monitor already destroyed"),
            PresenceError::PermissionRequest(msg) => {
                write!(f, "Permission request failed: {}", msg)
            }
            PresenceError::PermissionDenied(device) => {
                write!(f, "No permission to open {}", device)
            }
            PresenceError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}
impl std::error::Error for DeviceError {}
impl std::error::Error for RecordingError {}
impl std::error::Error for PhotoError {}
impl std::error::Error for PresenceError {}

// Conversions from sub-errors to SessionError
impl From<DeviceError> for SessionError {
    fn from(err: DeviceError) -> Self {
        SessionError::Device(err)
    }
}

impl From<RecordingError> for SessionError {
    fn from(err: RecordingError) -> Self {
        SessionError::Encoding(err)
    }
}

impl From<PhotoError> for SessionError {
    fn from(err: PhotoError) -> Self {
        SessionError::Photo(err)
    }
}

impl From<std::io::Error> for DeviceError {
    fn from(err: std::io::Error) -> Self {
        DeviceError::Io(err.to_string())
    }
}

impl From<std::io::Error> for PhotoError {
    fn from(err: std::io::Error) -> Self {
        PhotoError::SaveFailed(err.to_string())
    }
}

impl From<std::io::Error> for PresenceError {
    fn from(err: std::io::Error) -> Self {
        PresenceError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_wraps_into_session_error() {
        let err: SessionError = DeviceError::OpenFailed("busy".into()).into();
        assert_eq!(err.to_string(), "Device error: Open failed: busy");
    }

    #[test]
    fn test_timeout_display_uses_millis() {
        let err = SessionError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Timed out after 1500 ms");
    }
}
