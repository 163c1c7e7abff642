// SPDX-License-Identifier: GPL-3.0-only

//! Facade of a camera session
//!
//! [`SessionHandle`] validates input, posts commands to the actor and answers
//! state queries without waiting on the actor. Only [`SessionHandle::stop_preview`]
//! (and [`SessionHandle::close`], which calls it) blocks, and never when
//! called from the actor thread itself.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::actor::SessionActor;
use super::callbacks::CameraCallback;
use super::command::Command;
use super::state::{SessionInner, SessionShared, SessionState};
use super::surface::IntoPreviewSurface;
use super::view::{CameraView, SessionOwner};
use crate::backends::camera::types::{ControlFlag, FormatDescriptor};
use crate::backends::camera::{CameraDriver, UvcCamera};
use crate::backends::usb::{UsbControlBlock, UsbDevice};
use crate::config::SessionConfig;
use crate::errors::{DeviceResult, SessionError, SessionResult};
use crate::media::MediaIndex;
use crate::pipelines::photo::ShutterSound;
use crate::pipelines::video::MuxerFactory;

/// Collects a session's collaborators and starts its actor
///
/// ```ignore
/// let view = Arc::new(LatestFrameView::new());
/// let session = SessionBuilder::new(driver)
///     .config(config.session_config())
///     .encoders(Arc::new(GstMuxerFactory::new(config.bitrate_preset)?))
///     .view(&view)
///     .spawn()?;
/// session.open(block)?;
/// session.start_preview(DisplaySurface(view.clone()))?;
/// ```
pub struct SessionBuilder {
    driver: Arc<dyn CameraDriver>,
    config: SessionConfig,
    encoders: Option<Arc<dyn MuxerFactory>>,
    media_index: Option<Arc<dyn MediaIndex>>,
    shutter: Option<Arc<dyn ShutterSound>>,
    view: Option<Weak<dyn CameraView>>,
    owner: Option<Weak<dyn SessionOwner>>,
    callbacks: Vec<Arc<dyn CameraCallback>>,
}

impl SessionBuilder {
    pub fn new(driver: Arc<dyn CameraDriver>) -> Self {
        Self {
            driver,
            config: SessionConfig::default(),
            encoders: None,
            media_index: None,
            shutter: None,
            view: None,
            owner: None,
            callbacks: Vec::new(),
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Recording backend; without one `start_recording` reports an error
    pub fn encoders(mut self, factory: Arc<dyn MuxerFactory>) -> Self {
        self.encoders = Some(factory);
        self
    }

    pub fn media_index(mut self, index: Arc<dyn MediaIndex>) -> Self {
        self.media_index = Some(index);
        self
    }

    pub fn shutter(mut self, shutter: Arc<dyn ShutterSound>) -> Self {
        self.shutter = Some(shutter);
        self
    }

    /// Source of still images, held weakly
    pub fn view<V: CameraView + 'static>(mut self, view: &Arc<V>) -> Self {
        let view: Weak<V> = Arc::downgrade(view);
        self.view = Some(view as Weak<dyn CameraView>);
        self
    }

    /// Owning context, held weakly; once gone the session winds itself down
    pub fn owner<O: SessionOwner + 'static>(mut self, owner: &Arc<O>) -> Self {
        let owner: Weak<O> = Arc::downgrade(owner);
        self.owner = Some(owner as Weak<dyn SessionOwner>);
        self
    }

    /// Observer registered before the actor starts
    pub fn callback(mut self, callback: Arc<dyn CameraCallback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Start the actor thread
    pub fn spawn(self) -> SessionResult<SessionHandle> {
        let shared = Arc::new(SessionShared::new(self.config));
        for callback in self.callbacks {
            shared.callbacks.add(callback);
        }

        let mut actor = SessionActor::new(shared.clone(), self.driver);
        actor.encoders = self.encoders;
        if let Some(index) = self.media_index {
            actor.media_index = index;
        }
        if let Some(shutter) = self.shutter {
            actor.shutter = shutter;
        }
        actor.view = self.view;
        actor.owner = self.owner;

        let thread = actor.spawn()?;
        info!(session = %shared.id, "Camera session created");
        Ok(SessionHandle {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }
}

/// Handle to one camera session
///
/// Dropping the handle releases the session if it was not released already.
pub struct SessionHandle {
    shared: Arc<SessionShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    fn ensure_live(&self) -> SessionResult<()> {
        if self.shared.is_released() {
            return Err(SessionError::AlreadyReleased);
        }
        Ok(())
    }

    fn post(&self, command: Command) {
        let name = command.name();
        if !self.shared.queue.post(command) {
            debug!(session = %self.shared.id, command = name, "Session actor no longer accepts commands");
        }
    }

    // ===== Lifecycle =====

    /// Open the camera behind a control block, closing any open one first
    pub fn open(&self, block: UsbControlBlock) -> SessionResult<()> {
        self.ensure_live()?;
        self.post(Command::Open(block));
        Ok(())
    }

    /// Stop the preview (blocking) and close the camera
    ///
    /// `Close` is queued even when the preview wait times out; the timeout is
    /// still reported.
    pub fn close(&self) -> SessionResult<()> {
        self.ensure_live()?;
        let stopped = self.stop_preview();
        self.post(Command::Close);
        stopped
    }

    /// Release the session; later calls do nothing
    ///
    /// Closes the camera and ends the actor thread. A recording that is
    /// still finalizing delays the end up to the configured grace period.
    pub fn release(&self) {
        if self.shared.released.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        info!(session = %self.shared.id, "Releasing camera session");
        self.post(Command::Release);
    }

    /// Wait for the actor thread to end
    ///
    /// Returns true once it has exited.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        if self.shared.is_actor_thread() {
            return false;
        }
        {
            let guard = self.shared.lock();
            let (_guard, _) = self
                .shared
                .preview_sync
                .wait_timeout_while(guard, timeout, |_| self.shared.is_actor_alive())
                .unwrap_or_else(PoisonError::into_inner);
        }
        if self.shared.is_actor_alive() {
            return false;
        }
        if let Some(thread) = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take()
            && thread.join().is_err()
        {
            warn!(session = %self.shared.id, "Session actor panicked");
        }
        true
    }

    // ===== Preview =====

    pub fn start_preview(&self, surface: impl IntoPreviewSurface) -> SessionResult<()> {
        self.ensure_live()?;
        let surface = surface.into_preview_surface()?;
        let state = self.shared.lock();
        self.post(Command::StartPreview(surface, state.preview_epoch));
        Ok(())
    }

    /// Stop the preview
    ///
    /// Preview starts still waiting in the queue are dropped, and one the
    /// actor already holds is discarded. From any thread but the actor's,
    /// waits until the actor has left the previewing state, the actor exits,
    /// or the configured timeout expires.
    pub fn stop_preview(&self) -> SessionResult<()> {
        if self.shared.is_released() {
            return Ok(());
        }
        let mut state = self.shared.lock();
        state.preview_epoch += 1;
        let dropped = self
            .shared
            .queue
            .remove(|command| matches!(command, Command::StartPreview(..)));
        if dropped > 0 {
            debug!(session = %self.shared.id, dropped, "Dropped queued preview starts");
        }
        let was_pending = state.preview_pending();
        self.post(Command::StopPreview);
        if !was_pending || self.shared.is_actor_thread() {
            return Ok(());
        }

        let still_previewing = |state: &mut SessionInner| {
            state.preview_pending() && self.shared.is_actor_alive()
        };
        match self.shared.config.preview_stop_timeout {
            Some(timeout) => {
                let (state, result) = self
                    .shared
                    .preview_sync
                    .wait_timeout_while(state, timeout, still_previewing)
                    .unwrap_or_else(PoisonError::into_inner);
                if result.timed_out() && state.preview_pending() {
                    warn!(session = %self.shared.id, timeout_ms = timeout.as_millis() as u64, "Timed out waiting for preview to stop");
                    return Err(SessionError::Timeout(timeout));
                }
            }
            None => {
                let _state = self
                    .shared
                    .preview_sync
                    .wait_while(state, still_previewing)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        Ok(())
    }

    // ===== Capture =====

    /// Take a still into a derived path
    pub fn capture_still(&self) -> SessionResult<()> {
        self.ensure_live()?;
        self.post(Command::CaptureStill(None));
        Ok(())
    }

    pub fn capture_still_to(&self, path: impl Into<PathBuf>) -> SessionResult<()> {
        self.ensure_live()?;
        self.post(Command::CaptureStill(Some(path.into())));
        Ok(())
    }

    pub fn start_recording(&self) -> SessionResult<()> {
        self.ensure_live()?;
        self.post(Command::StartRecording);
        Ok(())
    }

    /// Stop recording; does nothing when not recording
    pub fn stop_recording(&self) {
        if !self.shared.is_released() {
            self.post(Command::StopRecording);
        }
    }

    // ===== Controls =====

    /// Run a control call on the caller's thread against the open camera
    fn with_camera<T>(
        &self,
        flag: Option<ControlFlag>,
        call: impl FnOnce(&dyn UvcCamera) -> DeviceResult<T>,
    ) -> SessionResult<T> {
        self.ensure_live()?;
        let camera = self
            .shared
            .lock()
            .camera
            .clone()
            .ok_or_else(|| SessionError::IllegalState("camera is not open".into()))?;
        if let Some(flag) = flag
            && !camera.supports(flag)
        {
            return Err(SessionError::IllegalState(format!(
                "control {} is not supported by this camera",
                flag
            )));
        }
        call(camera.as_ref()).map_err(SessionError::from)
    }

    pub fn get_value(&self, flag: ControlFlag) -> SessionResult<i32> {
        self.with_camera(Some(flag), |camera| camera.get_property(flag))
    }

    /// Write a control, returns the value now in effect
    pub fn set_value(&self, flag: ControlFlag, value: i32) -> SessionResult<i32> {
        self.with_camera(Some(flag), |camera| camera.set_property(flag, value))
    }

    pub fn reset_value(&self, flag: ControlFlag) -> SessionResult<i32> {
        self.with_camera(Some(flag), |camera| camera.reset_property(flag))
    }

    /// Whether the open camera implements a control; false when closed
    pub fn check_support_flag(&self, flag: ControlFlag) -> bool {
        self.shared
            .lock()
            .camera
            .as_ref()
            .is_some_and(|camera| camera.supports(flag))
    }

    /// Capability report of the open camera
    pub fn supported_formats(&self) -> SessionResult<Vec<FormatDescriptor>> {
        self.with_camera(None, |camera| camera.supported_formats())
    }

    /// Queue a write; the result arrives through `on_value`
    pub fn queue_set_value(&self, flag: ControlFlag, value: i32) -> SessionResult<()> {
        self.ensure_live()?;
        self.post(Command::SetValue(flag, value));
        Ok(())
    }

    /// Queue a read; the result arrives through `on_value`
    pub fn queue_get_value(&self, flag: ControlFlag) -> SessionResult<()> {
        self.ensure_live()?;
        self.post(Command::GetValue(flag));
        Ok(())
    }

    /// Queue a reset; the result arrives through `on_value`
    pub fn queue_reset_value(&self, flag: ControlFlag) -> SessionResult<()> {
        self.ensure_live()?;
        self.post(Command::ResetValue(flag));
        Ok(())
    }

    // ===== Observers =====

    /// Register an observer; ignored after release and for duplicates
    pub fn add_callback(&self, callback: Arc<dyn CameraCallback>) -> bool {
        if self.shared.is_released() {
            return false;
        }
        self.shared.callbacks.add(callback)
    }

    pub fn remove_callback(&self, callback: &Arc<dyn CameraCallback>) -> bool {
        self.shared.callbacks.remove(callback)
    }

    // ===== Queries =====

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().lifecycle
    }

    pub fn is_opened(&self) -> bool {
        self.shared.lock().camera.is_some()
    }

    pub fn is_previewing(&self) -> bool {
        self.shared.lock().previewing
    }

    pub fn is_recording(&self) -> bool {
        self.shared.lock().recorder.is_some()
    }

    pub fn is_released(&self) -> bool {
        self.shared.is_released()
    }

    /// Whether the open camera is `device`
    pub fn is_equal(&self, device: &UsbDevice) -> bool {
        self.shared
            .lock()
            .camera
            .as_ref()
            .is_some_and(|camera| camera.device() == device)
    }

    /// Preview width, from the configuration until a preview started
    pub fn width(&self) -> u32 {
        self.shared.lock().geometry.width
    }

    pub fn height(&self) -> u32 {
        self.shared.lock().geometry.height
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if !self.shared.is_released() {
            debug!(session = %self.shared.id, "Session handle dropped without release");
            self.release();
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("released", &self.is_released())
            .finish()
    }
}
