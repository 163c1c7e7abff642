// SPDX-License-Identifier: MPL-2.0

//! Test doubles shared by the integration tests
//!
//! - [`MockDriver`] / [`MockCamera`]: scripted camera with an operation log
//! - [`MockMuxerFactory`]: recording backend whose stop completes on demand
//! - [`MockPlatform`]: USB platform with scripted device lists and events
//! - [`RecordingCallback`]: observer collecting every session event

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use uvc_session::backends::camera::types::{
    CameraFrame, ControlFlag, FormatDescriptor, FrameCallback, FrameSink, FrameSize, PixelFormat,
    PreviewGeometry, PreviewMode, SurfaceBinding,
};
use uvc_session::backends::camera::{CameraDriver, UvcCamera};
use uvc_session::backends::usb::{
    DeviceIdentity, InterfaceClass, PlatformEvent, UsbControlBlock, UsbDevice, UsbPlatform,
};
use uvc_session::config::SessionConfig;
use uvc_session::constants::uvc;
use uvc_session::errors::{
    DeviceError, DeviceResult, PresenceError, PresenceResult, RecordingError, RecordingResult,
};
use uvc_session::media::MediaIndex;
use uvc_session::pipelines::video::{
    EncoderListener, FrameEncoder, Muxer, MuxerFactory, TrackKind, VideoEncoderHandle,
    VideoEncoderKind,
};
use uvc_session::session::{CallbackResult, CameraCallback, CameraEvent};

pub const WAIT: Duration = Duration::from_secs(3);

/// Session settings with short delays, writing into `dir`
pub fn test_config(dir: &Path) -> SessionConfig {
    SessionConfig {
        capture_dir: Some(dir.to_path_buf()),
        media_update_delay: Duration::from_millis(10),
        preview_stop_timeout: Some(WAIT),
        release_grace: Duration::from_secs(30),
        record_audio: false,
        ..SessionConfig::default()
    }
}

/// A UVC camera as the platform would enumerate it
pub fn camera_device(index: u8) -> UsbDevice {
    UsbDevice {
        device_name: format!("/dev/bus/usb/001/{:03}", index),
        identity: DeviceIdentity::new(
            0x046d,
            0x0825,
            uvc::CLASS_MISC,
            uvc::SUBCLASS_COMMON,
            0x01,
        )
        .with_serial(format!("CAM{}", index)),
        product_name: Some(format!("Test Camera {}", index)),
        interfaces: vec![InterfaceClass {
            class: uvc::CLASS_VIDEO,
            subclass: uvc::SUBCLASS_VIDEO_CONTROL,
            protocol: 0,
        }],
        sysfs_path: None,
    }
}

/// A USB device that is not a camera
pub fn keyboard_device(index: u8) -> UsbDevice {
    UsbDevice {
        device_name: format!("/dev/bus/usb/002/{:03}", index),
        identity: DeviceIdentity::new(0x045e, 0x0750, 0, 0, 0),
        product_name: Some("Keyboard".into()),
        interfaces: vec![InterfaceClass {
            class: 0x03,
            subclass: 0x01,
            protocol: 0x01,
        }],
        sysfs_path: None,
    }
}

pub fn control_block(index: u8) -> UsbControlBlock {
    UsbControlBlock::new(camera_device(index), None)
}

/// Block until `ready` holds or `timeout` expires
pub fn wait_until(timeout: Duration, mut ready: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if ready() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    ready()
}

// ===== Camera =====

/// Ordered record of driver calls
#[derive(Clone, Default)]
pub struct OpLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl OpLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| e.as_str() == entry).count()
    }

    /// Index of the first occurrence
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

#[derive(Default)]
pub struct MockDriver {
    pub log: OpLog,
    pub fail_open: AtomicBool,
    pub reject_mjpeg: AtomicBool,
    /// Delay inside `stop_stream`, in milliseconds
    pub stop_delay_ms: AtomicUsize,
    cameras: Mutex<Vec<Arc<MockCamera>>>,
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last_camera(&self) -> Option<Arc<MockCamera>> {
        self.cameras.lock().unwrap().last().cloned()
    }
}

impl CameraDriver for MockDriver {
    fn open(&self, block: &UsbControlBlock) -> DeviceResult<Arc<dyn UvcCamera>> {
        self.log.push("open");
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(DeviceError::OpenFailed("device busy".into()));
        }
        let camera = Arc::new(MockCamera {
            device: block.device().clone(),
            log: self.log.clone(),
            reject_mjpeg: self.reject_mjpeg.load(Ordering::SeqCst),
            stop_delay: Duration::from_millis(self.stop_delay_ms.load(Ordering::SeqCst) as u64),
            values: Mutex::new(HashMap::new()),
            surface: Mutex::new(None),
            capture: Mutex::new(None),
            callback: Mutex::new(None),
        });
        self.cameras.lock().unwrap().push(camera.clone());
        Ok(camera)
    }
}

/// Controls the mock camera implements, all with range 0..=255
pub const SUPPORTED_CONTROLS: [ControlFlag; 3] = [
    ControlFlag::Brightness,
    ControlFlag::Contrast,
    ControlFlag::Saturation,
];

pub const CONTROL_DEFAULT: i32 = 128;

pub struct MockCamera {
    device: UsbDevice,
    log: OpLog,
    reject_mjpeg: bool,
    stop_delay: Duration,
    values: Mutex<HashMap<ControlFlag, i32>>,
    surface: Mutex<Option<SurfaceBinding>>,
    capture: Mutex<Option<Arc<dyn FrameSink>>>,
    callback: Mutex<Option<FrameCallback>>,
}

impl MockCamera {
    /// Deliver one frame to the surface, the capture input and the callback
    pub fn push_frame(&self) {
        let frame = CameraFrame::rgba(2, 2, vec![200; 16]);
        if let Some(binding) = self.surface.lock().unwrap().clone() {
            binding.sink().present(&frame);
        }
        if let Some(capture) = self.capture.lock().unwrap().clone() {
            capture.present(&frame);
        }
        if let Some(callback) = self.callback.lock().unwrap().clone() {
            callback(&frame);
        }
    }

    pub fn has_frame_callback(&self) -> bool {
        self.callback.lock().unwrap().is_some()
    }
}

impl UvcCamera for MockCamera {
    fn device(&self) -> &UsbDevice {
        &self.device
    }

    fn supported_formats(&self) -> DeviceResult<Vec<FormatDescriptor>> {
        Ok(vec![FormatDescriptor {
            mode: PreviewMode::Yuyv,
            sizes: vec![FrameSize {
                width: 640,
                height: 480,
                framerates: vec![30, 15],
            }],
        }])
    }

    fn configure(&self, geometry: &PreviewGeometry) -> DeviceResult<()> {
        self.log.push(format!("configure:{}", geometry.mode));
        if self.reject_mjpeg && geometry.mode == PreviewMode::Mjpeg {
            return Err(DeviceError::ConfigurationRejected("MJPEG not offered".into()));
        }
        Ok(())
    }

    fn bind_surface(&self, binding: SurfaceBinding) -> DeviceResult<()> {
        self.log.push("bind_surface");
        *self.surface.lock().unwrap() = Some(binding);
        Ok(())
    }

    fn start_stream(&self) -> DeviceResult<()> {
        self.log.push("start_stream");
        self.push_frame();
        Ok(())
    }

    fn stop_stream(&self) {
        std::thread::sleep(self.stop_delay);
        self.log.push("stop_stream");
    }

    fn start_capture(&self, input: Arc<dyn FrameSink>) -> DeviceResult<()> {
        self.log.push("start_capture");
        *self.capture.lock().unwrap() = Some(input);
        Ok(())
    }

    fn stop_capture(&self) {
        self.log.push("stop_capture");
        self.capture.lock().unwrap().take();
    }

    fn set_frame_callback(&self, callback: Option<FrameCallback>, _format: PixelFormat) {
        let entry = if callback.is_some() {
            "frame_callback:set"
        } else {
            "frame_callback:clear"
        };
        self.log.push(entry);
        *self.callback.lock().unwrap() = callback;
    }

    fn supports(&self, flag: ControlFlag) -> bool {
        SUPPORTED_CONTROLS.contains(&flag)
    }

    fn get_property(&self, flag: ControlFlag) -> DeviceResult<i32> {
        if !self.supports(flag) {
            return Err(DeviceError::UnsupportedControl(flag));
        }
        Ok(*self.values.lock().unwrap().get(&flag).unwrap_or(&CONTROL_DEFAULT))
    }

    fn set_property(&self, flag: ControlFlag, value: i32) -> DeviceResult<i32> {
        if !self.supports(flag) {
            return Err(DeviceError::UnsupportedControl(flag));
        }
        let value = value.clamp(0, 255);
        self.values.lock().unwrap().insert(flag, value);
        Ok(value)
    }

    fn reset_property(&self, flag: ControlFlag) -> DeviceResult<i32> {
        if !self.supports(flag) {
            return Err(DeviceError::UnsupportedControl(flag));
        }
        self.values.lock().unwrap().remove(&flag);
        Ok(CONTROL_DEFAULT)
    }

    fn close(&self) {
        self.log.push("close");
        self.surface.lock().unwrap().take();
    }
}

// ===== Recording =====

#[derive(Default)]
pub struct MuxerState {
    pub created: Vec<PathBuf>,
    pub tracks: Vec<(TrackKind, Arc<dyn EncoderListener>)>,
    pub started: bool,
    pub stop_requested: bool,
    pub frames_encoded: usize,
}

/// Recording backend; a stopped muxer only completes on [`MockMuxerFactory::finish`]
#[derive(Clone, Default)]
pub struct MockMuxerFactory {
    pub state: Arc<Mutex<MuxerState>>,
    pub fail_prepare: Arc<AtomicBool>,
}

impl MockMuxerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.state.lock().unwrap().created.len()
    }

    pub fn stop_requested(&self) -> bool {
        self.state.lock().unwrap().stop_requested
    }

    pub fn frames_encoded(&self) -> usize {
        self.state.lock().unwrap().frames_encoded
    }

    /// Write the container and report every track as drained
    pub fn finish(&self) -> PathBuf {
        let (path, tracks) = {
            let state = self.state.lock().unwrap();
            (state.created.last().cloned().unwrap(), state.tracks.clone())
        };
        std::fs::write(&path, b"mp4").unwrap();
        for (track, listener) in tracks {
            listener.on_stopped(track, Some(&path));
        }
        path
    }
}

struct CountingEncoder {
    state: Arc<Mutex<MuxerState>>,
}

impl FrameEncoder for CountingEncoder {
    fn frame_available_soon(&self) {}

    fn encode(&self, _frame: &CameraFrame) {
        self.state.lock().unwrap().frames_encoded += 1;
    }
}

impl FrameSink for CountingEncoder {
    fn present(&self, frame: &CameraFrame) {
        self.encode(frame);
    }
}

struct MockMuxer {
    path: PathBuf,
    state: Arc<Mutex<MuxerState>>,
    fail_prepare: bool,
}

impl Muxer for MockMuxer {
    fn output_path(&self) -> &Path {
        &self.path
    }

    fn add_video_encoder(
        &mut self,
        kind: VideoEncoderKind,
        _width: u32,
        _height: u32,
        listener: Arc<dyn EncoderListener>,
    ) -> RecordingResult<VideoEncoderHandle> {
        self.state.lock().unwrap().tracks.push((TrackKind::Video, listener));
        let encoder = Arc::new(CountingEncoder {
            state: self.state.clone(),
        });
        Ok(match kind {
            VideoEncoderKind::Surface => VideoEncoderHandle::Surface(encoder),
            VideoEncoderKind::Buffer => VideoEncoderHandle::Buffer(encoder),
        })
    }

    fn add_audio_encoder(&mut self, listener: Arc<dyn EncoderListener>) -> RecordingResult<()> {
        self.state.lock().unwrap().tracks.push((TrackKind::Audio, listener));
        Ok(())
    }

    fn prepare(&mut self) -> RecordingResult<()> {
        if self.fail_prepare {
            return Err(RecordingError::PrepareFailed("encoder refused size".into()));
        }
        for (track, listener) in &self.state.lock().unwrap().tracks {
            listener.on_prepared(*track);
        }
        Ok(())
    }

    fn start(&mut self) -> RecordingResult<()> {
        self.state.lock().unwrap().started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.state.lock().unwrap().stop_requested = true;
    }
}

impl MuxerFactory for MockMuxerFactory {
    fn create_muxer(&self, output_path: PathBuf) -> RecordingResult<Box<dyn Muxer>> {
        let mut state = self.state.lock().unwrap();
        state.created.push(output_path.clone());
        state.tracks.clear();
        Ok(Box::new(MockMuxer {
            path: output_path,
            state: self.state.clone(),
            fail_prepare: self.fail_prepare.load(Ordering::SeqCst),
        }))
    }
}

/// Media index remembering every scanned path
#[derive(Default)]
pub struct RecordingIndex {
    paths: Mutex<Vec<PathBuf>>,
    cond: Condvar,
}

impl RecordingIndex {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.lock().unwrap().clone()
    }

    pub fn wait_for_paths(&self, count: usize, timeout: Duration) -> Vec<PathBuf> {
        let guard = self.paths.lock().unwrap();
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |paths| paths.len() < count)
            .unwrap();
        guard.clone()
    }
}

impl MediaIndex for RecordingIndex {
    fn scan(&self, path: &Path) -> Result<(), String> {
        self.paths.lock().unwrap().push(path.to_path_buf());
        self.cond.notify_all();
        Ok(())
    }
}

// ===== Observers =====

/// Observer keeping every event in arrival order
#[derive(Default)]
pub struct RecordingCallback {
    events: Mutex<Vec<CameraEvent>>,
    cond: Condvar,
}

impl RecordingCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<CameraEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Wait until some event satisfies `wanted`
    pub fn wait_for(&self, timeout: Duration, wanted: impl Fn(&CameraEvent) -> bool) -> bool {
        let guard = self.events.lock().unwrap();
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |events| !events.iter().any(&wanted))
            .unwrap();
        guard.iter().any(wanted)
    }

    pub fn wait_for_event(&self, event: CameraEvent) -> bool {
        self.wait_for(WAIT, |e| *e == event)
    }

    pub fn errors(&self) -> Vec<CameraEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, CameraEvent::Error(_)))
            .collect()
    }

    fn record(&self, event: CameraEvent) -> CallbackResult {
        self.events.lock().unwrap().push(event);
        self.cond.notify_all();
        Ok(())
    }
}

impl CameraCallback for RecordingCallback {
    fn on_open(&self) -> CallbackResult {
        self.record(CameraEvent::Open)
    }

    fn on_close(&self) -> CallbackResult {
        self.record(CameraEvent::Close)
    }

    fn on_start_preview(&self) -> CallbackResult {
        self.record(CameraEvent::StartPreview)
    }

    fn on_stop_preview(&self) -> CallbackResult {
        self.record(CameraEvent::StopPreview)
    }

    fn on_start_recording(&self) -> CallbackResult {
        self.record(CameraEvent::StartRecording)
    }

    fn on_stop_recording(&self) -> CallbackResult {
        self.record(CameraEvent::StopRecording)
    }

    fn on_error(&self, error: &uvc_session::SessionError) -> CallbackResult {
        self.record(CameraEvent::Error(error.clone()))
    }

    fn on_value(&self, flag: ControlFlag, value: i32) -> CallbackResult {
        self.record(CameraEvent::Value { flag, value })
    }
}

// ===== USB platform =====

#[derive(Default)]
struct PlatformState {
    devices: Vec<Arc<UsbDevice>>,
    permitted: HashSet<String>,
    requests: Vec<String>,
    events: Option<Sender<PlatformEvent>>,
}

/// USB platform whose device list and permissions are set by the test
#[derive(Default)]
pub struct MockPlatform {
    state: Mutex<PlatformState>,
}

impl MockPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_devices(&self, devices: Vec<UsbDevice>) {
        self.state.lock().unwrap().devices = devices.into_iter().map(Arc::new).collect();
    }

    pub fn grant(&self, device_name: &str) {
        self.state.lock().unwrap().permitted.insert(device_name.to_string());
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.state.lock().unwrap().events.is_some()
    }

    /// Remove a device and announce it like the kernel would
    pub fn detach(&self, device_name: &str) {
        if let Some(device) = self.unplug(device_name) {
            self.notify_detached(&device);
        }
    }

    /// Remove a device without sending its removal notification
    pub fn unplug(&self, device_name: &str) -> Option<Arc<UsbDevice>> {
        let mut state = self.state.lock().unwrap();
        let index = state.devices.iter().position(|d| d.device_name == device_name)?;
        state.permitted.remove(device_name);
        Some(state.devices.remove(index))
    }

    /// Send the removal notification of an unplugged device
    pub fn notify_detached(&self, device: &UsbDevice) {
        let state = self.state.lock().unwrap();
        if let Some(events) = &state.events {
            events.send(PlatformEvent::Detached(device.clone())).unwrap();
        }
    }

    /// Answer a pending permission request
    pub fn answer(&self, device: &UsbDevice, granted: bool) {
        let mut state = self.state.lock().unwrap();
        if granted {
            state.permitted.insert(device.device_name.clone());
        }
        if let Some(events) = &state.events {
            events
                .send(PlatformEvent::PermissionResult {
                    device: device.clone(),
                    granted,
                })
                .unwrap();
        }
    }
}

impl UsbPlatform for MockPlatform {
    fn device_list(&self) -> Vec<Arc<UsbDevice>> {
        self.state.lock().unwrap().devices.clone()
    }

    fn has_permission(&self, device: &UsbDevice) -> bool {
        self.state.lock().unwrap().permitted.contains(&device.device_name)
    }

    fn request_permission(&self, device: &UsbDevice) -> PresenceResult<()> {
        self.state.lock().unwrap().requests.push(device.device_name.clone());
        Ok(())
    }

    fn open(&self, device: &UsbDevice) -> PresenceResult<UsbControlBlock> {
        if !self.has_permission(device) {
            return Err(PresenceError::PermissionDenied(device.device_name.clone()));
        }
        Ok(UsbControlBlock::new(device.clone(), None))
    }

    fn subscribe(&self, events: Sender<PlatformEvent>) -> PresenceResult<()> {
        self.state.lock().unwrap().events = Some(events);
        Ok(())
    }

    fn unsubscribe(&self) {
        self.state.lock().unwrap().events = None;
    }
}
