// SPDX-License-Identifier: GPL-3.0-only
//! Pixel format conversion for frames leaving a driver
//!
//! Drivers deliver YUYV or MJPEG; sinks, still encoding and frame callbacks
//! want RGBA or NV21. Conversions use BT.601 full-range coefficients.

use std::sync::Arc;

use super::types::{CameraFrame, PixelFormat};

fn yuv_to_rgb(y: f32, u: f32, v: f32) -> [u8; 3] {
    let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
    let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
    let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
    [r, g, b]
}

/// Convert YUYV (YUV 4:2:2) to RGBA
///
/// YUYV format: Y0 U Y1 V - each 4-byte group encodes 2 pixels.
pub fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let pixel_count = (width * height) as usize;
    let mut rgba = Vec::with_capacity(pixel_count * 4);

    for chunk in data.chunks_exact(4) {
        let y0 = chunk[0] as f32;
        let u = chunk[1] as f32 - 128.0;
        let y1 = chunk[2] as f32;
        let v = chunk[3] as f32 - 128.0;

        for y in [y0, y1] {
            if rgba.len() >= pixel_count * 4 {
                break;
            }
            let [r, g, b] = yuv_to_rgb(y, u, v);
            rgba.extend_from_slice(&[r, g, b, 255]);
        }
    }

    rgba
}

/// Convert NV12/NV21 (semi-planar 4:2:0) to RGBA
pub fn semi_planar_to_rgba(data: &[u8], width: u32, height: u32, vu_order: bool) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let mut rgba = vec![0u8; w * h * 4];
    if data.len() < w * h + w * h / 2 {
        return rgba;
    }
    let (luma, chroma) = data.split_at(w * h);

    for row in 0..h {
        for col in 0..w {
            let c = (row / 2) * w + (col / 2) * 2;
            let (u, v) = if vu_order {
                (chroma[c + 1], chroma[c])
            } else {
                (chroma[c], chroma[c + 1])
            };
            let [r, g, b] = yuv_to_rgb(
                luma[row * w + col] as f32,
                u as f32 - 128.0,
                v as f32 - 128.0,
            );
            let idx = (row * w + col) * 4;
            rgba[idx..idx + 4].copy_from_slice(&[r, g, b, 255]);
        }
    }

    rgba
}

/// Convert RGBA to NV21 (Y plane followed by interleaved V/U at quarter size)
pub fn rgba_to_nv21(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let mut out = vec![0u8; w * h + w * h / 2];
    let (luma, chroma) = out.split_at_mut(w * h);

    for row in 0..h {
        for col in 0..w {
            let idx = (row * w + col) * 4;
            let (r, g, b) = (data[idx] as f32, data[idx + 1] as f32, data[idx + 2] as f32);
            luma[row * w + col] = (0.299 * r + 0.587 * g + 0.114 * b).clamp(0.0, 255.0) as u8;

            if row % 2 == 0 && col % 2 == 0 {
                let u = (-0.169 * r - 0.331 * g + 0.5 * b + 128.0).clamp(0.0, 255.0) as u8;
                let v = (0.5 * r - 0.419 * g - 0.081 * b + 128.0).clamp(0.0, 255.0) as u8;
                let c = (row / 2) * w + col;
                if c + 1 < chroma.len() {
                    chroma[c] = v;
                    chroma[c + 1] = u;
                }
            }
        }
    }

    out
}

/// Decode or convert any frame into tightly packed RGBA
pub fn to_rgba(frame: &CameraFrame) -> Result<Vec<u8>, String> {
    let (w, h) = (frame.width, frame.height);
    match frame.format {
        PixelFormat::RGBA => {
            let row = w as usize * 4;
            if frame.stride as usize == row {
                return Ok(frame.data.to_vec());
            }
            Ok(frame
                .data
                .chunks(frame.stride as usize)
                .take(h as usize)
                .flat_map(|line| line[..row.min(line.len())].iter().copied())
                .collect())
        }
        PixelFormat::RGB24 => Ok(frame
            .data
            .chunks_exact(3)
            .flat_map(|px| [px[0], px[1], px[2], 255])
            .collect()),
        PixelFormat::YUYV => Ok(yuyv_to_rgba(&frame.data, w, h)),
        PixelFormat::NV12 => Ok(semi_planar_to_rgba(&frame.data, w, h, false)),
        PixelFormat::NV21 => Ok(semi_planar_to_rgba(&frame.data, w, h, true)),
        PixelFormat::MJPEG => image::load_from_memory_with_format(&frame.data, image::ImageFormat::Jpeg)
            .map(|img| img.to_rgba8().into_raw())
            .map_err(|e| format!("MJPEG decode failed: {}", e)),
    }
}

/// Convert a frame into the requested format
///
/// Returns the frame itself when it already has that format. Only RGBA and
/// NV21 are produced as targets.
pub fn convert(frame: &CameraFrame, target: PixelFormat) -> Result<CameraFrame, String> {
    if frame.format == target {
        return Ok(frame.clone());
    }

    let rgba = to_rgba(frame)?;
    let (data, stride) = match target {
        PixelFormat::RGBA => (rgba, frame.width * 4),
        PixelFormat::NV21 => (rgba_to_nv21(&rgba, frame.width, frame.height), frame.width),
        other => return Err(format!("conversion to {:?} is not supported", other)),
    };

    Ok(CameraFrame {
        width: frame.width,
        height: frame.height,
        data: Arc::from(data.into_boxed_slice()),
        format: target,
        stride,
        sequence: frame.sequence,
        captured_at: frame.captured_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_gray_stays_gray() {
        // Y=128, U=V=128 -> mid gray for both pixels
        let rgba = yuyv_to_rgba(&[128, 128, 128, 128], 2, 1);
        assert_eq!(rgba, vec![128, 128, 128, 255, 128, 128, 128, 255]);
    }

    #[test]
    fn test_nv21_round_trip_keeps_luma() {
        let rgba: Vec<u8> = [200u8, 200, 200, 255].repeat(4);
        let nv21 = rgba_to_nv21(&rgba, 2, 2);
        assert_eq!(nv21.len(), 6);
        let back = semi_planar_to_rgba(&nv21, 2, 2, true);
        for px in back.chunks_exact(4) {
            assert!((px[0] as i32 - 200).abs() <= 2);
        }
    }

    #[test]
    fn test_convert_same_format_is_identity() {
        let frame = CameraFrame::rgba(1, 1, vec![1, 2, 3, 4]);
        let out = convert(&frame, PixelFormat::RGBA).unwrap();
        assert_eq!(&*out.data, &[1, 2, 3, 4]);
    }

    #[test]
    fn test_convert_to_yuyv_is_rejected() {
        let frame = CameraFrame::rgba(2, 1, vec![0; 8]);
        assert!(convert(&frame, PixelFormat::YUYV).is_err());
    }
}
