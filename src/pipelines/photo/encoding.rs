// SPDX-License-Identifier: GPL-3.0-only

//! Still image encoding
//!
//! Frames are converted to RGBA first, then written as:
//! - PNG (lossless, default)
//! - JPEG (alpha dropped)

use image::{ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::backends::camera::format_converters;
use crate::backends::camera::types::CameraFrame;
use crate::errors::PhotoError;

/// JPEG quality used for stills (0-100)
const JPEG_QUALITY: u8 = 92;

/// Supported still formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StillFormat {
    /// PNG format (lossless compression)
    #[default]
    Png,
    /// JPEG format (lossy compression)
    Jpeg,
}

impl StillFormat {
    /// Get file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            StillFormat::Png => "png",
            StillFormat::Jpeg => "jpg",
        }
    }

    /// Guess the format from a file name, `None` for unknown extensions
    pub fn from_path(path: &Path) -> Option<Self> {
        match ImageFormat::from_path(path).ok()? {
            ImageFormat::Png => Some(StillFormat::Png),
            ImageFormat::Jpeg => Some(StillFormat::Jpeg),
            _ => None,
        }
    }
}

/// Encode a frame and write it to `path`
///
/// The extension of `path` wins over `format` when it names a known format.
pub fn encode_still(frame: &CameraFrame, path: &Path, format: StillFormat) -> Result<(), PhotoError> {
    let format = StillFormat::from_path(path).unwrap_or(format);
    debug!(
        width = frame.width,
        height = frame.height,
        pixel_format = ?frame.format,
        ?format,
        "Encoding still"
    );

    let rgba = format_converters::to_rgba(frame).map_err(PhotoError::EncodingFailed)?;
    let image = RgbaImage::from_raw(frame.width, frame.height, rgba).ok_or_else(|| {
        PhotoError::EncodingFailed(format!(
            "frame data does not fill {}x{}",
            frame.width, frame.height
        ))
    })?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    match format {
        StillFormat::Png => image
            .save_with_format(path, ImageFormat::Png)
            .map_err(|e| PhotoError::SaveFailed(format!("PNG encoding failed: {}", e)))?,
        StillFormat::Jpeg => {
            let rgb = image::DynamicImage::ImageRgba8(image).to_rgb8();
            let file = std::fs::File::create(path)?;
            let mut writer = std::io::BufWriter::new(file);
            let mut encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
            encoder
                .encode(
                    rgb.as_raw(),
                    rgb.width(),
                    rgb.height(),
                    image::ExtendedColorType::Rgb8,
                )
                .map_err(|e| PhotoError::EncodingFailed(format!("JPEG encoding failed: {}", e)))?;
        }
    }

    info!(path = %path.display(), "Still saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::PixelFormat;
    use std::sync::Arc;
    use std::time::Instant;

    fn gray_frame(width: u32, height: u32) -> CameraFrame {
        CameraFrame::rgba(width, height, vec![128; (width * height * 4) as usize])
    }

    #[test]
    fn test_format_extensions() {
        assert_eq!(StillFormat::Png.extension(), "png");
        assert_eq!(StillFormat::Jpeg.extension(), "jpg");
        assert_eq!(StillFormat::default(), StillFormat::Png);
    }

    #[test]
    fn test_png_round_trip_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        encode_still(&gray_frame(8, 4), &path, StillFormat::Png).unwrap();

        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 4));
    }

    #[test]
    fn test_extension_overrides_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("still.jpg");
        encode_still(&gray_frame(16, 16), &path, StillFormat::Png).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_short_buffer_is_encoding_error() {
        let frame = CameraFrame {
            width: 4,
            height: 4,
            data: Arc::from(vec![0u8; 10].into_boxed_slice()),
            format: PixelFormat::RGB24,
            stride: 12,
            sequence: 0,
            captured_at: Instant::now(),
        };
        let dir = tempfile::tempdir().unwrap();
        let err = encode_still(&frame, &dir.path().join("x.png"), StillFormat::Png).unwrap_err();
        assert!(matches!(err, PhotoError::EncodingFailed(_)));
    }
}
