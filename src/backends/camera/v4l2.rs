// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 camera driver
//!
//! The USB device is mapped to its uvcvideo capture node through sysfs.
//! Streaming runs on a dedicated worker thread using memory-mapped buffers;
//! every frame is decoded to RGBA once and then fanned out to the bound
//! surface, the encoder input surface and the frame callback.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::video::capture::Parameters;
use v4l::{Format, FourCC};

use super::format_converters;
use super::types::{
    CameraFrame, ControlFlag, FormatDescriptor, FrameCallback, FrameSink, FrameSize, PixelFormat,
    PreviewGeometry, PreviewMode, SurfaceBinding,
};
use super::v4l2_controls::{self, V4l2Controls};
use super::{CameraDriver, UvcCamera};
use crate::backends::usb::{UsbControlBlock, UsbDevice};
use crate::backends::worker_loop::{LoopAction, LoopController};
use crate::constants::preview;
use crate::errors::{DeviceError, DeviceResult};

/// Memory-mapped buffers per stream
const STREAM_BUFFERS: u32 = 4;

/// Consecutive dequeue failures before the stream gives up
const MAX_CAPTURE_ERRORS: u32 = 30;

/// Opens UVC cameras through their V4L2 capture node
#[derive(Debug, Default, Clone, Copy)]
pub struct V4l2Driver;

impl CameraDriver for V4l2Driver {
    fn open(&self, block: &UsbControlBlock) -> DeviceResult<Arc<dyn UvcCamera>> {
        let device = block.device().clone();
        let sysfs = device
            .sysfs_path
            .as_deref()
            .ok_or_else(|| DeviceError::OpenFailed(format!("{} has no sysfs entry", device)))?;
        let node = v4l2_controls::capture_node(sysfs).ok_or_else(|| {
            DeviceError::OpenFailed(format!("{} has no video capture node", device))
        })?;
        let controls = V4l2Controls::open(&node)?;

        info!(device = %device, node = %node.display(), "Opened V4L2 camera");
        Ok(Arc::new(V4l2Camera {
            device,
            node,
            controls,
            block: block.clone(),
            stream: Mutex::new(StreamState::default()),
            outputs: Arc::new(Mutex::new(Outputs::default())),
        }))
    }
}

#[derive(Default)]
struct StreamState {
    geometry: Option<PreviewGeometry>,
    worker: Option<LoopController>,
    closed: bool,
}

/// Frame destinations, read by the stream thread for every frame
#[derive(Default)]
struct Outputs {
    surface: Option<SurfaceBinding>,
    capture: Option<Arc<dyn FrameSink>>,
    callback: Option<(FrameCallback, PixelFormat)>,
}

fn lock_outputs(outputs: &Mutex<Outputs>) -> MutexGuard<'_, Outputs> {
    outputs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An opened V4L2 camera
pub struct V4l2Camera {
    device: UsbDevice,
    node: PathBuf,
    controls: V4l2Controls,
    block: UsbControlBlock,
    stream: Mutex<StreamState>,
    outputs: Arc<Mutex<Outputs>>,
}

impl V4l2Camera {
    pub fn node(&self) -> &Path {
        &self.node
    }

    fn lock_stream(&self) -> MutexGuard<'_, StreamState> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Apply size, pixel format and frame rate; returns the negotiated format
fn apply_format(dev: &Device, geometry: &PreviewGeometry) -> DeviceResult<Format> {
    let fourcc = FourCC::new(&geometry.mode.pixel_format().fourcc());
    let requested = Format::new(geometry.width, geometry.height, fourcc);
    let actual = dev
        .set_format(&requested)
        .map_err(|e| DeviceError::ConfigurationRejected(format!("set format: {}", e)))?;

    if actual.fourcc != fourcc || actual.width != geometry.width || actual.height != geometry.height {
        return Err(DeviceError::ConfigurationRejected(format!(
            "requested {}x{} {}, device offers {}x{} {}",
            geometry.width, geometry.height, fourcc, actual.width, actual.height, actual.fourcc
        )));
    }

    if let Err(e) = dev.set_params(&Parameters::with_fps(geometry.fps_max)) {
        warn!(fps = geometry.fps_max, error = %e, "Failed to set frame rate");
    }
    Ok(actual)
}

/// Per-thread stream state
struct ActiveStream {
    // Keeps the device open for the stream's lifetime
    _device: Device,
    stream: Stream<'static>,
    format: Format,
    pixel_format: PixelFormat,
    errors: u32,
}

fn deliver(outputs: &Mutex<Outputs>, raw: &CameraFrame) {
    let (surface, capture, callback) = {
        let outputs = lock_outputs(outputs);
        (
            outputs.surface.clone(),
            outputs.capture.clone(),
            outputs.callback.clone(),
        )
    };
    if surface.is_none() && capture.is_none() && callback.is_none() {
        return;
    }

    let rgba = match format_converters::to_rgba(raw) {
        Ok(rgba) => CameraFrame {
            stride: raw.width * 4,
            format: PixelFormat::RGBA,
            data: Arc::from(rgba.into_boxed_slice()),
            ..raw.clone()
        },
        Err(e) => {
            debug!(error = %e, sequence = raw.sequence, "Dropping undecodable frame");
            return;
        }
    };

    if let Some(surface) = surface {
        surface.sink().present(&rgba);
    }
    if let Some(capture) = capture {
        capture.present(&rgba);
    }
    if let Some((callback, format)) = callback {
        match format_converters::convert(&rgba, format) {
            Ok(frame) => callback(&frame),
            Err(e) => debug!(error = %e, ?format, "Frame callback conversion failed"),
        }
    }
}

impl UvcCamera for V4l2Camera {
    fn device(&self) -> &UsbDevice {
        &self.device
    }

    fn supported_formats(&self) -> DeviceResult<Vec<FormatDescriptor>> {
        let dev = Device::with_path(&self.node)
            .map_err(|e| DeviceError::Io(format!("{}: {}", self.node.display(), e)))?;
        let descriptions = dev
            .enum_formats()
            .map_err(|e| DeviceError::Io(format!("enum formats: {}", e)))?;

        let mut formats = Vec::new();
        for description in descriptions {
            let mode = if description.fourcc == FourCC::new(b"YUYV") {
                PreviewMode::Yuyv
            } else if description.fourcc == FourCC::new(b"MJPG") {
                PreviewMode::Mjpeg
            } else {
                continue;
            };

            let mut sizes = Vec::new();
            for size in dev.enum_framesizes(description.fourcc).into_iter().flatten() {
                match size.size {
                    v4l::framesize::FrameSizeEnum::Discrete(discrete) => {
                        let framerates = dev
                            .enum_frameintervals(description.fourcc, discrete.width, discrete.height)
                            .into_iter()
                            .flatten()
                            .filter_map(|interval| match interval.interval {
                                v4l::frameinterval::FrameIntervalEnum::Discrete(frac)
                                    if frac.numerator > 0 =>
                                {
                                    Some(frac.denominator / frac.numerator)
                                }
                                _ => None,
                            })
                            .collect();
                        sizes.push(FrameSize {
                            width: discrete.width,
                            height: discrete.height,
                            framerates,
                        });
                    }
                    v4l::framesize::FrameSizeEnum::Stepwise(step) => {
                        let (w, h) = (preview::DEFAULT_WIDTH, preview::DEFAULT_HEIGHT);
                        if (step.min_width..=step.max_width).contains(&w)
                            && (step.min_height..=step.max_height).contains(&h)
                        {
                            sizes.push(FrameSize {
                                width: w,
                                height: h,
                                framerates: vec![preview::DEFAULT_FPS_MAX],
                            });
                        }
                    }
                }
            }
            formats.push(FormatDescriptor { mode, sizes });
        }
        Ok(formats)
    }

    fn configure(&self, geometry: &PreviewGeometry) -> DeviceResult<()> {
        let mut state = self.lock_stream();
        if state.closed {
            return Err(DeviceError::Disconnected);
        }
        if state.worker.is_some() {
            return Err(DeviceError::ConfigurationRejected("camera is streaming".into()));
        }

        let dev = Device::with_path(&self.node)
            .map_err(|e| DeviceError::OpenFailed(format!("{}: {}", self.node.display(), e)))?;
        let format = apply_format(&dev, geometry)?;
        info!(
            node = %self.node.display(),
            width = format.width,
            height = format.height,
            fourcc = %format.fourcc,
            fps = geometry.fps_max,
            "V4L2 format configured"
        );
        state.geometry = Some(*geometry);
        Ok(())
    }

    fn bind_surface(&self, binding: SurfaceBinding) -> DeviceResult<()> {
        debug!(node = %self.node.display(), ?binding, "Binding preview surface");
        lock_outputs(&self.outputs).surface = Some(binding);
        Ok(())
    }

    fn start_stream(&self) -> DeviceResult<()> {
        let mut state = self.lock_stream();
        if state.worker.is_some() {
            return Ok(());
        }
        let geometry = state
            .geometry
            .ok_or_else(|| DeviceError::StreamFailed("camera is not configured".into()))?;
        if self.block.is_closed() {
            return Err(DeviceError::Disconnected);
        }

        let node = self.node.clone();
        let outputs = self.outputs.clone();
        let block = self.block.clone();
        let name = format!(
            "uvc-stream-{}",
            self.node.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
        );

        let worker = LoopController::start_with_init(
            &name,
            move || {
                let dev = Device::with_path(&node)
                    .map_err(|e| format!("Failed to open {}: {}", node.display(), e))?;
                let format = apply_format(&dev, &geometry).map_err(|e| e.to_string())?;
                let stream = Stream::with_buffers(&dev, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|e| format!("Failed to create stream: {}", e))?;
                info!(node = %node.display(), fourcc = %format.fourcc, "V4L2 stream started");
                Ok(ActiveStream {
                    _device: dev,
                    stream,
                    format,
                    pixel_format: geometry.mode.pixel_format(),
                    errors: 0,
                })
            },
            move |capture, _stop| {
                if block.is_closed() {
                    warn!("Device detached, ending stream");
                    return LoopAction::Stop;
                }
                let (buf, meta) = match capture.stream.next() {
                    Ok(frame) => frame,
                    Err(e) => {
                        capture.errors += 1;
                        warn!(error = %e, errors = capture.errors, "Failed to dequeue frame");
                        return if capture.errors >= MAX_CAPTURE_ERRORS {
                            LoopAction::Stop
                        } else {
                            LoopAction::Continue
                        };
                    }
                };
                capture.errors = 0;

                let used = (meta.bytesused as usize).min(buf.len());
                let frame = CameraFrame {
                    width: capture.format.width,
                    height: capture.format.height,
                    data: Arc::from(&buf[..used]),
                    format: capture.pixel_format,
                    stride: capture.format.stride,
                    sequence: u64::from(meta.sequence),
                    captured_at: Instant::now(),
                };
                deliver(&outputs, &frame);
                LoopAction::Continue
            },
        )
        .map_err(|e| DeviceError::StreamFailed(format!("Failed to spawn stream thread: {}", e)))?;

        state.worker = Some(worker);
        Ok(())
    }

    fn stop_stream(&self) {
        let worker = self.lock_stream().worker.take();
        if let Some(mut worker) = worker {
            worker.stop();
            debug!(node = %self.node.display(), "V4L2 stream stopped");
        }
    }

    fn start_capture(&self, input: Arc<dyn FrameSink>) -> DeviceResult<()> {
        lock_outputs(&self.outputs).capture = Some(input);
        Ok(())
    }

    fn stop_capture(&self) {
        lock_outputs(&self.outputs).capture = None;
    }

    fn set_frame_callback(&self, callback: Option<FrameCallback>, format: PixelFormat) {
        lock_outputs(&self.outputs).callback = callback.map(|callback| (callback, format));
    }

    fn supports(&self, flag: ControlFlag) -> bool {
        self.controls.supports(flag)
    }

    fn get_property(&self, flag: ControlFlag) -> DeviceResult<i32> {
        self.controls.get(flag)
    }

    fn set_property(&self, flag: ControlFlag, value: i32) -> DeviceResult<i32> {
        self.controls.set(flag, value)
    }

    fn reset_property(&self, flag: ControlFlag) -> DeviceResult<i32> {
        self.controls.reset(flag)
    }

    fn close(&self) {
        self.stop_stream();
        {
            let mut outputs = lock_outputs(&self.outputs);
            *outputs = Outputs::default();
        }
        self.lock_stream().closed = true;
        info!(device = %self.device, "V4L2 camera closed");
    }
}
