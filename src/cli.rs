// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for camera operations
//!
//! This module provides command-line functionality for:
//! - Listing and monitoring attached cameras
//! - Inspecting formats and controls
//! - Taking photos
//! - Recording videos

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use uvc_session::backends::camera::CameraDriver;
use uvc_session::backends::camera::types::ControlFlag;
use uvc_session::backends::usb::{DevicePresenceMonitor, PresenceListener, SysfsUsbPlatform};
use uvc_session::config::Config;
use uvc_session::constants::timing;
use uvc_session::media::{LoggingMediaIndex, MediaIndex};
use uvc_session::pipelines::video::MuxerFactory;
use uvc_session::session::{
    CameraEvent, ChannelCallback, DisplaySurface, LatestFrameView, SessionBuilder, SessionHandle,
};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Frames to let through before a still, gives auto exposure time to settle
const WARMUP_FRAMES: u64 = 15;

/// How long to wait for the camera to open or start streaming
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(feature = "v4l2")]
fn camera_driver() -> CliResult<Arc<dyn CameraDriver>> {
    Ok(Arc::new(uvc_session::backends::camera::v4l2::V4l2Driver))
}

#[cfg(not(feature = "v4l2"))]
fn camera_driver() -> CliResult<Arc<dyn CameraDriver>> {
    Err("built without V4L2 support, rebuild with --features v4l2".into())
}

#[cfg(feature = "gstreamer")]
fn muxer_factory(config: &Config) -> CliResult<Arc<dyn MuxerFactory>> {
    use uvc_session::pipelines::video::GstMuxerFactory;

    let factory = GstMuxerFactory::new(config.bitrate_preset)?;
    let (video, audio) = GstMuxerFactory::available_encoders();
    println!(
        "Encoders: video={} audio={}",
        video.unwrap_or("none"),
        audio.unwrap_or("none")
    );
    Ok(Arc::new(factory))
}

#[cfg(not(feature = "gstreamer"))]
fn muxer_factory(_config: &Config) -> CliResult<Arc<dyn MuxerFactory>> {
    Err("built without recording support, rebuild with --features gstreamer".into())
}

fn presence_monitor(config: &Config) -> DevicePresenceMonitor {
    DevicePresenceMonitor::new(Arc::new(SysfsUsbPlatform::new()), config.monitor_config())
}

fn runtime() -> CliResult<Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?)
}

/// Media index that also reports every finished file to the CLI
struct NotifyingIndex {
    files: UnboundedSender<PathBuf>,
}

impl MediaIndex for NotifyingIndex {
    fn scan(&self, path: &Path) -> Result<(), String> {
        LoggingMediaIndex.scan(path)?;
        let _ = self.files.send(path.to_path_buf());
        Ok(())
    }
}

/// A camera opened through the presence monitor, with its session
struct OpenedCamera {
    // Keeps the control block open
    _monitor: DevicePresenceMonitor,
    session: SessionHandle,
    events: UnboundedReceiver<CameraEvent>,
    files: UnboundedReceiver<PathBuf>,
    runtime: Runtime,
}

impl OpenedCamera {
    fn open(
        config: &Config,
        camera_index: usize,
        customize: impl FnOnce(SessionBuilder) -> CliResult<SessionBuilder>,
    ) -> CliResult<Self> {
        let driver = camera_driver()?;
        let monitor = presence_monitor(config);

        let devices = monitor.device_list()?;
        if devices.is_empty() {
            return Err("No cameras found".into());
        }
        let device = devices.get(camera_index).ok_or_else(|| {
            format!(
                "Camera index {} out of range (0-{})",
                camera_index,
                devices.len() - 1
            )
        })?;
        println!("Using camera: {}", device);

        let block = monitor.open_device(device)?;
        let (callback, events) = ChannelCallback::new();
        let (files_tx, files) = mpsc::unbounded_channel();

        let builder = SessionBuilder::new(driver)
            .config(config.session_config())
            .media_index(Arc::new(NotifyingIndex { files: files_tx }))
            .callback(callback);
        let session = customize(builder)?.spawn()?;
        session.open(block)?;

        let mut camera = Self {
            _monitor: monitor,
            session,
            events,
            files,
            runtime: runtime()?,
        };
        camera.wait_for(CameraEvent::Open, EVENT_TIMEOUT)?;
        Ok(camera)
    }

    fn wait_for(&mut self, wanted: CameraEvent, timeout: Duration) -> CliResult<()> {
        self.runtime
            .block_on(next_event(&mut self.events, wanted, timeout))
    }

    fn wait_for_file(&mut self, timeout: Duration) -> CliResult<PathBuf> {
        self.runtime
            .block_on(next_file(&mut self.events, &mut self.files, timeout))
    }

    /// Close and release, waiting for the session thread to end
    fn shutdown(self) -> CliResult<()> {
        let closed = self.session.close();
        self.session.release();
        if !self.session.await_termination(timing::RELEASE_GRACE * 2) {
            tracing::warn!("Camera session did not shut down in time");
        }
        closed.map_err(Into::into)
    }
}

async fn next_event(
    events: &mut UnboundedReceiver<CameraEvent>,
    wanted: CameraEvent,
    timeout: Duration,
) -> CliResult<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(CameraEvent::Error(error))) => return Err(error.into()),
            Ok(Some(event)) if event == wanted => return Ok(()),
            Ok(Some(_)) => {}
            Ok(None) => return Err("camera session ended".into()),
            Err(_) => return Err(format!("Timed out waiting for {:?}", wanted).into()),
        }
    }
}

async fn next_file(
    events: &mut UnboundedReceiver<CameraEvent>,
    files: &mut UnboundedReceiver<PathBuf>,
    timeout: Duration,
) -> CliResult<PathBuf> {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            file = files.recv() => {
                return file.ok_or_else(|| "camera session ended".into());
            }
            event = events.recv() => match event {
                Some(CameraEvent::Error(error)) => return Err(error.into()),
                Some(_) => {}
                None => return Err("camera session ended".into()),
            },
            _ = &mut deadline => return Err("Timed out waiting for the capture file".into()),
        }
    }
}

/// List all attached cameras
pub fn list_cameras(config: &Config) -> CliResult<()> {
    let monitor = presence_monitor(config);
    let devices = monitor.device_list()?;

    if devices.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for (index, device) in devices.iter().enumerate() {
        println!("  [{}] {}", index, device.product_name.as_deref().unwrap_or("Unknown camera"));
        println!("      Node: {}", device.device_name);
        println!("      Identity: {}", device.identity);
        let access = if monitor.has_permission(device)? {
            "granted"
        } else {
            "denied"
        };
        println!("      Access: {}", access);
        println!();
    }

    Ok(())
}

/// Print attach and detach events until Ctrl+C
pub fn monitor(config: &Config) -> CliResult<()> {
    let monitor = presence_monitor(config);
    println!("Cameras attached: {}", monitor.device_count()?);

    let listener: Arc<dyn PresenceListener> = Arc::new(|attached: bool, device_count: usize| {
        let change = if attached { "attached" } else { "detached" };
        println!("Camera {}, {} attached now", change, device_count);
    });
    monitor.register(listener)?;

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    println!("Watching for cameras... (press Ctrl+C to stop)");
    while !stop_flag.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    monitor.destroy();
    Ok(())
}

/// Show every stream mode and frame size the camera reports
pub fn show_formats(config: &Config, camera_index: usize) -> CliResult<()> {
    let camera = OpenedCamera::open(config, camera_index, Ok)?;

    for format in camera.session.supported_formats()? {
        println!("{}:", format.mode);
        for size in &format.sizes {
            let rates: Vec<String> = size.framerates.iter().map(|fps| format!("{}fps", fps)).collect();
            println!("  {}x{} @ {}", size.width, size.height, rates.join(", "));
        }
    }

    camera.shutdown()
}

/// Show the camera's controls after applying `name=value` writes
pub fn show_controls(config: &Config, camera_index: usize, writes: &[String]) -> CliResult<()> {
    let camera = OpenedCamera::open(config, camera_index, Ok)?;

    for write in writes {
        let (name, value) = write
            .split_once('=')
            .ok_or_else(|| format!("Expected name=value, got '{}'", write))?;
        let flag = ControlFlag::from_name(name.trim())
            .ok_or_else(|| format!("Unknown control '{}'", name))?;
        let value: i32 = value.trim().parse()?;
        let applied = camera.session.set_value(flag, value)?;
        if applied != value {
            println!("{} clamped to {}", flag, applied);
        }
    }

    println!("Controls:");
    for flag in ControlFlag::ALL {
        if !camera.session.check_support_flag(flag) {
            continue;
        }
        match camera.session.get_value(flag) {
            Ok(value) => println!("  {:<14} {}", flag.name(), value),
            Err(e) => println!("  {:<14} ({})", flag.name(), e),
        }
    }

    camera.shutdown()
}

/// Take a photo using the specified camera
pub fn take_photo(config: Config, camera_index: usize, output: Option<PathBuf>) -> CliResult<()> {
    let view = Arc::new(LatestFrameView::new());
    let mut camera = OpenedCamera::open(&config, camera_index, |builder| Ok(builder.view(&view)))?;

    camera.session.start_preview(DisplaySurface(view.clone()))?;
    camera.wait_for(CameraEvent::StartPreview, EVENT_TIMEOUT)?;
    println!(
        "Capture format: {}x{}",
        camera.session.width(),
        camera.session.height()
    );

    // Wait for frames to stabilize (camera warm-up)
    println!("Capturing...");
    let start = Instant::now();
    while view.frame_count() < WARMUP_FRAMES {
        if start.elapsed() > EVENT_TIMEOUT {
            return Err("Failed to capture frame from camera".into());
        }
        std::thread::sleep(Duration::from_millis(16));
    }

    match output {
        Some(path) => camera.session.capture_still_to(path)?,
        None => camera.session.capture_still()?,
    }
    let path = camera.wait_for_file(EVENT_TIMEOUT * 2)?;
    println!("Photo saved: {}", path.display());

    camera.shutdown()
}

/// Record a video using the specified camera
pub fn record_video(
    mut config: Config,
    camera_index: usize,
    duration: u64,
    output: Option<PathBuf>,
    enable_audio: bool,
) -> CliResult<()> {
    let factory = muxer_factory(&config)?;
    config.record_audio = enable_audio;
    if output.is_some() {
        config.capture_dir = output;
    }

    let view = Arc::new(LatestFrameView::new());
    let mut camera = OpenedCamera::open(&config, camera_index, |builder| {
        Ok(builder.view(&view).encoders(factory))
    })?;

    camera.session.start_preview(DisplaySurface(view.clone()))?;
    camera.wait_for(CameraEvent::StartPreview, EVENT_TIMEOUT)?;
    println!(
        "Recording format: {}x{}",
        camera.session.width(),
        camera.session.height()
    );
    println!("Duration: {} seconds", duration);
    if enable_audio {
        println!("Audio: enabled");
    }

    camera.session.start_recording()?;
    camera.wait_for(CameraEvent::StartRecording, EVENT_TIMEOUT)?;

    // Set up Ctrl+C handler
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    println!();
    println!("Recording... (press Ctrl+C to stop early)");
    let start = Instant::now();
    let target_duration = Duration::from_secs(duration);

    while start.elapsed() < target_duration {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }

        let elapsed = start.elapsed().as_secs();
        print!("\rRecording: {:02}:{:02}", elapsed / 60, elapsed % 60);
        std::io::Write::flush(&mut std::io::stdout())?;

        std::thread::sleep(Duration::from_millis(100));
    }
    println!();

    camera.session.stop_recording();
    println!("Finalizing...");
    let finalize_timeout = Duration::from_secs(timing::EOS_TIMEOUT_SECS)
        + config.session_config().media_update_delay
        + EVENT_TIMEOUT;
    let path = camera.wait_for_file(finalize_timeout)?;
    println!("Video saved: {}", path.display());

    camera.shutdown()
}
