// SPDX-License-Identifier: GPL-3.0-only

//! Session actor
//!
//! One thread per session drains the command queue and executes every
//! command against the camera handle and the recording pipeline, one at a
//! time. Observers are notified after the state lock is released.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

use super::callbacks::CameraEvent;
use super::command::Command;
use super::state::{SessionShared, SessionState};
use super::surface::PreviewSurface;
use super::view::{CameraView, SessionOwner};
use crate::backends::camera::types::{
    CameraFrame, ControlFlag, FrameCallback, PreviewGeometry, PreviewMode,
};
use crate::backends::camera::{CameraDriver, UvcCamera};
use crate::backends::usb::UsbControlBlock;
use crate::errors::{DeviceError, DeviceResult, PhotoError, RecordingError, SessionError};
use crate::media::MediaIndex;
use crate::pipelines::photo::{ShutterSound, encode_still};
use crate::pipelines::video::{
    FrameEncoder, MuxerFactory, RecordingPipeline, VideoEncoderHandle,
};
use crate::storage::{self, MediaKind};

/// Value command variants
#[derive(Debug, Clone, Copy)]
enum ValueOp {
    Get,
    Set(i32),
    Reset,
}

/// Clears the alive flag however the actor thread ends
struct ExitGuard(Arc<SessionShared>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.mark_actor_exited();
        debug!(session = %self.0.id, "Session actor exited");
    }
}

pub(crate) struct SessionActor {
    pub shared: Arc<SessionShared>,
    pub driver: Arc<dyn CameraDriver>,
    pub encoders: Option<Arc<dyn MuxerFactory>>,
    pub media_index: Arc<dyn MediaIndex>,
    pub shutter: Arc<dyn ShutterSound>,
    pub view: Option<Weak<dyn CameraView>>,
    pub owner: Option<Weak<dyn SessionOwner>>,
    release_deferred: bool,
}

impl SessionActor {
    pub fn new(shared: Arc<SessionShared>, driver: Arc<dyn CameraDriver>) -> Self {
        Self {
            shared,
            driver,
            encoders: None,
            media_index: Arc::new(crate::media::LoggingMediaIndex),
            shutter: Arc::new(crate::pipelines::photo::SilentShutter),
            view: None,
            owner: None,
            release_deferred: false,
        }
    }

    /// Start the actor thread, named `uvc-session-<id>`
    pub fn spawn(self) -> Result<JoinHandle<()>, SessionError> {
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name(format!("uvc-session-{}", shared.short_id()))
            .spawn(move || self.run())
            .map_err(|e| SessionError::Spawn(e.to_string()))?;
        let _ = shared.actor_thread.set(handle.thread().id());
        Ok(handle)
    }

    fn run(mut self) {
        let _ = self.shared.actor_thread.set(thread::current().id());
        let _exit = ExitGuard(self.shared.clone());
        info!(session = %self.shared.id, "Session actor started");

        while let Some(command) = self.shared.queue.next() {
            if self.lifecycle() == SessionState::Released && !command.runs_after_release() {
                debug!(session = %self.shared.id, command = command.name(), "Ignoring command after release");
                continue;
            }
            trace!(session = %self.shared.id, ?command, pending = self.shared.queue.len(), "Executing");
            self.execute(command);
        }
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Open(block) => self.handle_open(block),
            Command::Close => self.handle_close(),
            Command::StartPreview(surface, epoch) => self.handle_start_preview(surface, epoch),
            Command::StopPreview => self.handle_stop_preview(),
            Command::CaptureStill(path) => self.handle_capture_still(path),
            Command::StartRecording => self.handle_start_recording(),
            Command::StopRecording => self.handle_stop_recording(),
            Command::UpdateMedia(path) => self.handle_update_media(path),
            Command::SetValue(flag, value) => self.handle_value(flag, ValueOp::Set(value)),
            Command::GetValue(flag) => self.handle_value(flag, ValueOp::Get),
            Command::ResetValue(flag) => self.handle_value(flag, ValueOp::Reset),
            Command::Release => self.handle_release(),
            Command::RecordingStopped(path) => self.handle_recording_stopped(path),
            Command::ForceRelease => self.handle_force_release(),
        }
    }

    // ===== Helpers =====

    fn emit(&self, event: CameraEvent) {
        self.shared.callbacks.dispatch(&event);
    }

    fn emit_error(&self, error: SessionError) {
        warn!(session = %self.shared.id, error = %error, "Session error");
        self.emit(CameraEvent::Error(error));
    }

    fn lifecycle(&self) -> SessionState {
        self.shared.lock().lifecycle
    }

    fn set_lifecycle(&self, lifecycle: SessionState) {
        self.shared.lock().lifecycle = lifecycle;
    }

    fn camera(&self) -> Option<Arc<dyn UvcCamera>> {
        self.shared.lock().camera.clone()
    }

    /// Owner dropped or destroyed; no owner configured means alive
    fn owner_gone(&self) -> bool {
        match &self.owner {
            None => false,
            Some(owner) => owner.upgrade().is_none_or(|owner| owner.is_destroyed()),
        }
    }

    // ===== Device lifecycle =====

    fn handle_open(&mut self, block: UsbControlBlock) {
        self.handle_close();
        self.set_lifecycle(SessionState::Opening);

        info!(session = %self.shared.id, device = %block.device(), "Opening camera");
        match self.driver.open(&block) {
            Ok(camera) => {
                {
                    let mut state = self.shared.lock();
                    state.camera = Some(camera);
                    state.geometry = self.shared.config.preview;
                    state.lifecycle = SessionState::Open;
                }
                self.emit(CameraEvent::Open);
            }
            Err(e) => {
                self.set_lifecycle(SessionState::Closed);
                self.emit_error(SessionError::Device(e));
            }
        }
    }

    fn handle_close(&mut self) {
        if self.camera().is_none() {
            return;
        }
        self.handle_stop_recording();
        self.handle_stop_preview();

        let camera = {
            let mut state = self.shared.lock();
            state.lifecycle = SessionState::Closing;
            state.camera.take()
        };
        if let Some(camera) = camera {
            info!(session = %self.shared.id, device = %camera.device(), "Closing camera");
            camera.close();
        }
        {
            let mut state = self.shared.lock();
            state.lifecycle = SessionState::Closed;
            state.previewing = false;
            self.shared.preview_sync.notify_all();
        }
        self.emit(CameraEvent::Close);
    }

    // ===== Preview =====

    fn handle_start_preview(&mut self, surface: PreviewSurface, epoch: u64) {
        let (camera, requested) = {
            let mut state = self.shared.lock();
            if epoch != state.preview_epoch {
                debug!(session = %self.shared.id, "Start preview cancelled by a later stop");
                return;
            }
            let Some(camera) = state.camera.clone() else {
                debug!(session = %self.shared.id, "Start preview ignored, camera not open");
                return;
            };
            if state.previewing {
                return;
            }
            state.lifecycle = SessionState::PreviewStarting;
            (camera, self.shared.config.preview)
        };

        match Self::start_stream(camera.as_ref(), &surface, requested) {
            Ok(geometry) => {
                {
                    let mut state = self.shared.lock();
                    state.geometry = geometry;
                    state.previewing = true;
                    state.lifecycle = SessionState::Previewing;
                }
                info!(
                    session = %self.shared.id,
                    width = geometry.width,
                    height = geometry.height,
                    mode = %geometry.mode,
                    ?surface,
                    "Preview started"
                );
                self.emit(CameraEvent::StartPreview);
            }
            Err(e) => {
                {
                    let mut state = self.shared.lock();
                    state.lifecycle = SessionState::Open;
                    self.shared.preview_sync.notify_all();
                }
                self.emit_error(SessionError::Device(e));
            }
        }
    }

    /// Configure, falling back to the default mode once, then bind and stream
    fn start_stream(
        camera: &dyn UvcCamera,
        surface: &PreviewSurface,
        requested: PreviewGeometry,
    ) -> DeviceResult<PreviewGeometry> {
        let geometry = match camera.configure(&requested) {
            Ok(()) => requested,
            Err(e) if requested.mode != PreviewMode::default() => {
                let fallback = requested.with_mode(PreviewMode::default());
                warn!(error = %e, requested = %requested.mode, fallback = %fallback.mode, "Preview mode rejected, retrying");
                camera.configure(&fallback)?;
                fallback
            }
            Err(e) => return Err(e),
        };
        camera.bind_surface(surface.binding())?;
        camera.start_stream()?;
        Ok(geometry)
    }

    fn handle_stop_preview(&mut self) {
        let camera = {
            let state = self.shared.lock();
            if !state.previewing {
                return;
            }
            state.camera.clone()
        };

        self.handle_stop_recording();
        self.set_lifecycle(SessionState::PreviewStopping);
        if let Some(camera) = &camera {
            camera.stop_stream();
        }

        {
            let mut state = self.shared.lock();
            state.previewing = false;
            state.lifecycle = if state.camera.is_some() {
                SessionState::Open
            } else {
                SessionState::Closed
            };
            self.shared.preview_sync.notify_all();
        }
        info!(session = %self.shared.id, "Preview stopped");
        self.emit(CameraEvent::StopPreview);
    }

    // ===== Stills =====

    fn handle_capture_still(&mut self, path: Option<PathBuf>) {
        if self.owner_gone() {
            warn!(session = %self.shared.id, "Owner is gone, skipping still capture");
            return;
        }
        if self.camera().is_none() {
            self.emit_error(SessionError::IllegalState("camera is not open".into()));
            return;
        }

        self.shutter.play(self.shared.config.shutter_volume);
        match self.capture_still(path) {
            Ok(path) => {
                self.shared.queue.post(Command::UpdateMedia(path));
            }
            Err(e) => self.emit_error(e),
        }
    }

    fn capture_still(&self, path: Option<PathBuf>) -> Result<PathBuf, SessionError> {
        let config = &self.shared.config;
        let view = self
            .view
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| PhotoError::CaptureFailed("camera view is gone".into()))?;
        let frame = view.capture_still_image().map_err(PhotoError::CaptureFailed)?;

        let path = match path {
            Some(path) => path,
            None => storage::capture_file(
                MediaKind::Still,
                config.still_format.extension(),
                config.capture_dir.as_deref(),
            )
            .map_err(PhotoError::from)?,
        };
        encode_still(&frame, &path, config.still_format)?;
        Ok(path)
    }

    // ===== Recording =====

    fn handle_start_recording(&mut self) {
        let (camera, geometry) = {
            let state = self.shared.lock();
            let Some(camera) = state.camera.clone() else {
                debug!(session = %self.shared.id, "Start recording ignored, camera not open");
                return;
            };
            if state.recorder.is_some() {
                return;
            }
            if !state.previewing {
                drop(state);
                self.emit_error(SessionError::IllegalState(
                    "recording requires an active preview".into(),
                ));
                return;
            }
            (camera, state.geometry)
        };

        let Some(factory) = self.encoders.clone() else {
            self.emit_error(SessionError::Encoding(RecordingError::NoBackend));
            return;
        };

        match self.build_pipeline(camera.as_ref(), factory.as_ref(), geometry) {
            Ok((pipeline, encoder)) => {
                let output = pipeline.output_path().to_path_buf();
                {
                    let mut state = self.shared.lock();
                    state.recorder = Some(pipeline);
                    state.frame_encoder = encoder.clone();
                    state.recordings_in_flight += 1;
                    state.lifecycle = SessionState::Recording;
                }
                if encoder.is_some() {
                    camera.set_frame_callback(
                        Some(self.frame_callback()),
                        self.shared.config.frame_format,
                    );
                }
                info!(session = %self.shared.id, output = %output.display(), "Recording started");
                self.emit(CameraEvent::StartRecording);
            }
            Err(e) => self.emit_error(SessionError::Encoding(e)),
        }
    }

    /// Create, prepare and start a pipeline; a failed one is discarded
    fn build_pipeline(
        &self,
        camera: &dyn UvcCamera,
        factory: &dyn MuxerFactory,
        geometry: PreviewGeometry,
    ) -> Result<(RecordingPipeline, Option<Arc<dyn FrameEncoder>>), RecordingError> {
        let config = &self.shared.config;
        let output = storage::capture_file(
            MediaKind::Video,
            factory.extension(),
            config.capture_dir.as_deref(),
        )
        .map_err(|e| RecordingError::PrepareFailed(e.to_string()))?;

        let session = Arc::downgrade(&self.shared);
        let mut pipeline = RecordingPipeline::new(
            factory,
            output,
            config.encoder_type,
            geometry.width,
            geometry.height,
            config.record_audio,
            move |path| {
                if let Some(shared) = session.upgrade()
                    && !shared.queue.post(Command::RecordingStopped(path))
                {
                    debug!(session = %shared.id, "Recording finished after the session quit");
                }
            },
        )?;

        if let Err(e) = pipeline.prepare() {
            pipeline.discard();
            return Err(e);
        }

        let input = pipeline.video_input().cloned();
        if let Some(VideoEncoderHandle::Surface(sink)) = &input
            && let Err(e) = camera.start_capture(sink.clone())
        {
            pipeline.discard();
            return Err(RecordingError::StartFailed(e.to_string()));
        }

        if let Err(e) = pipeline.start() {
            camera.stop_capture();
            pipeline.discard();
            return Err(e);
        }

        let encoder = match input {
            Some(VideoEncoderHandle::Buffer(encoder)) => Some(encoder),
            _ => None,
        };
        Ok((pipeline, encoder))
    }

    /// Frame callback feeding the current buffer encoder
    fn frame_callback(&self) -> FrameCallback {
        let session = Arc::downgrade(&self.shared);
        Arc::new(move |frame: &CameraFrame| {
            let Some(shared) = session.upgrade() else {
                return;
            };
            let encoder = shared.lock().frame_encoder.clone();
            if let Some(encoder) = encoder {
                encoder.frame_available_soon();
                encoder.encode(frame);
            }
        })
    }

    fn handle_stop_recording(&mut self) {
        let (camera, pipeline) = {
            let mut state = self.shared.lock();
            let Some(pipeline) = state.recorder.take() else {
                return;
            };
            state.frame_encoder = None;
            if state.lifecycle == SessionState::Recording {
                state.lifecycle = SessionState::Previewing;
            }
            (state.camera.clone(), pipeline)
        };

        if let Some(camera) = camera {
            camera.set_frame_callback(None, self.shared.config.frame_format);
            camera.stop_capture();
        }
        info!(session = %self.shared.id, output = %pipeline.output_path().display(), "Stopping recording");
        pipeline.stop();
        self.emit(CameraEvent::StopRecording);
    }

    fn handle_recording_stopped(&mut self, path: Option<PathBuf>) {
        let camera = {
            let mut state = self.shared.lock();
            state.recordings_in_flight = state.recordings_in_flight.saturating_sub(1);
            if state.recorder.is_none() {
                state.camera.clone()
            } else {
                None
            }
        };
        if let Some(camera) = camera {
            camera.stop_capture();
        }

        match path {
            Some(path) => {
                self.shared
                    .queue
                    .post_delayed(Command::UpdateMedia(path), self.shared.config.media_update_delay);
            }
            None => {
                if self.shared.is_released() || self.owner_gone() {
                    self.handle_release();
                }
            }
        }
    }

    // ===== Media index =====

    fn handle_update_media(&mut self, path: PathBuf) {
        if let Err(e) = self.media_index.scan(&path) {
            warn!(session = %self.shared.id, path = %path.display(), error = %e, "Media index update failed");
        }
        if self.shared.is_released() || self.owner_gone() {
            self.handle_release();
        }
    }

    // ===== Controls =====

    fn handle_value(&mut self, flag: ControlFlag, op: ValueOp) {
        let Some(camera) = self.camera() else {
            self.emit_error(SessionError::IllegalState("camera is not open".into()));
            return;
        };
        if !camera.supports(flag) {
            self.emit_error(SessionError::Device(DeviceError::UnsupportedControl(flag)));
            return;
        }

        let result = match op {
            ValueOp::Get => camera.get_property(flag),
            ValueOp::Set(value) => camera.set_property(flag, value),
            ValueOp::Reset => camera.reset_property(flag),
        };
        match result {
            Ok(value) => {
                debug!(session = %self.shared.id, %flag, value, ?op, "Control value");
                self.emit(CameraEvent::Value { flag, value });
            }
            Err(e) => self.emit_error(SessionError::Device(e)),
        }
    }

    // ===== Release =====

    fn handle_release(&mut self) {
        if self.lifecycle() == SessionState::Released {
            return;
        }
        self.handle_close();
        self.shared.callbacks.clear();

        let in_flight = self.shared.lock().recordings_in_flight;
        if in_flight > 0 {
            if !self.release_deferred {
                self.release_deferred = true;
                self.shared
                    .queue
                    .post_delayed(Command::ForceRelease, self.shared.config.release_grace);
                info!(session = %self.shared.id, in_flight, "Release waits for recording to finish");
            }
            return;
        }
        self.finish_release();
    }

    fn handle_force_release(&mut self) {
        if self.lifecycle() == SessionState::Released {
            return;
        }
        let in_flight = {
            let mut state = self.shared.lock();
            std::mem::take(&mut state.recordings_in_flight)
        };
        if in_flight > 0 {
            warn!(
                session = %self.shared.id,
                in_flight,
                grace_ms = self.shared.config.release_grace.as_millis() as u64,
                "Recording did not finish in time, forcing release"
            );
        }
        self.handle_release();
    }

    fn finish_release(&mut self) {
        self.shared.released.store(true, Ordering::SeqCst);
        self.set_lifecycle(SessionState::Released);
        self.shared.queue.quit();
        info!(session = %self.shared.id, "Session released");
    }
}
