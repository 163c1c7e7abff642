// SPDX-License-Identifier: GPL-3.0-only

//! Persistent configuration
//!
//! [`Config`] is the on-disk form (JSON). The session and monitor read the
//! derived [`SessionConfig`] and [`MonitorConfig`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::backends::camera::types::{PixelFormat, PreviewGeometry};
use crate::backends::usb::DeviceFilter;
use crate::constants::{BitratePreset, media, timing};
use crate::pipelines::photo::StillFormat;
use crate::pipelines::video::EncoderType;

/// Settings of one camera session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub preview: PreviewGeometry,
    /// Video encoder strategy used for recordings
    pub encoder_type: EncoderType,
    /// Format delivered to buffer-fed encoders
    pub frame_format: PixelFormat,
    pub still_format: StillFormat,
    /// Add an audio track to recordings
    pub record_audio: bool,
    pub shutter_volume: f32,
    /// Directory for derived capture paths, platform media dirs when unset
    pub capture_dir: Option<PathBuf>,
    pub media_update_delay: Duration,
    /// Bound of the stop-preview wait, `None` waits as long as the actor lives
    pub preview_stop_timeout: Option<Duration>,
    /// How long a release waits for an in-flight recording
    pub release_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            preview: PreviewGeometry::default(),
            encoder_type: EncoderType::default(),
            frame_format: PixelFormat::RGBA,
            still_format: StillFormat::default(),
            record_audio: true,
            shutter_volume: media::SHUTTER_VOLUME,
            capture_dir: None,
            media_update_delay: timing::MEDIA_UPDATE_DELAY,
            preview_stop_timeout: Some(timing::PREVIEW_STOP_TIMEOUT),
            release_grace: timing::RELEASE_GRACE,
        }
    }
}

/// Settings of the presence monitor
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub scan_interval: Duration,
    pub initial_delay: Duration,
    /// Empty accepts every device
    pub filters: Vec<DeviceFilter>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            scan_interval: timing::SCAN_INTERVAL,
            initial_delay: timing::SCAN_INITIAL_DELAY,
            filters: DeviceFilter::uvc_defaults(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Preview size, frame rates, mode and bandwidth
    pub preview: PreviewGeometry,
    pub encoder_type: EncoderType,
    pub frame_format: PixelFormat,
    pub still_format: StillFormat,
    /// Video encoder bitrate preset (Low, Medium, High)
    pub bitrate_preset: BitratePreset,
    /// Record microphone audio alongside video
    pub record_audio: bool,
    pub shutter_volume: f32,
    pub capture_dir: Option<PathBuf>,
    pub media_update_delay_ms: u64,
    /// 0 disables the bound
    pub preview_stop_timeout_ms: u64,
    pub release_grace_ms: u64,
    pub scan_interval_ms: u64,
    pub scan_initial_delay_ms: u64,
    pub device_filters: Vec<DeviceFilter>,
}

impl Default for Config {
    fn default() -> Self {
        let session = SessionConfig::default();
        let monitor = MonitorConfig::default();
        Self {
            preview: session.preview,
            encoder_type: session.encoder_type,
            frame_format: session.frame_format,
            still_format: session.still_format,
            bitrate_preset: BitratePreset::default(),
            record_audio: session.record_audio,
            shutter_volume: session.shutter_volume,
            capture_dir: None,
            media_update_delay_ms: session.media_update_delay.as_millis() as u64,
            preview_stop_timeout_ms: timing::PREVIEW_STOP_TIMEOUT.as_millis() as u64,
            release_grace_ms: session.release_grace.as_millis() as u64,
            scan_interval_ms: monitor.scan_interval.as_millis() as u64,
            scan_initial_delay_ms: monitor.initial_delay.as_millis() as u64,
            device_filters: monitor.filters,
        }
    }
}

impl Config {
    /// Default location, `<config dir>/uvc-session/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(media::CAPTURE_SUBDIR).join("config.json"))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                Self::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, text)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            preview: self.preview,
            encoder_type: self.encoder_type,
            frame_format: self.frame_format,
            still_format: self.still_format,
            record_audio: self.record_audio,
            shutter_volume: self.shutter_volume.clamp(0.0, 1.0),
            capture_dir: self.capture_dir.clone(),
            media_update_delay: Duration::from_millis(self.media_update_delay_ms),
            preview_stop_timeout: (self.preview_stop_timeout_ms > 0)
                .then(|| Duration::from_millis(self.preview_stop_timeout_ms)),
            release_grace: Duration::from_millis(self.release_grace_ms),
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            scan_interval: Duration::from_millis(self.scan_interval_ms.max(1)),
            initial_delay: Duration::from_millis(self.scan_initial_delay_ms),
            filters: self.device_filters.clone(),
        }
    }
}
