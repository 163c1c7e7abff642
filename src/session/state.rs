// SPDX-License-Identifier: GPL-3.0-only

//! Session lifecycle and the state shared between facade and actor

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::ThreadId;
use uuid::Uuid;

use super::callbacks::CallbackSet;
use super::command::Command;
use super::queue::CommandQueue;
use crate::backends::camera::UvcCamera;
use crate::backends::camera::types::PreviewGeometry;
use crate::config::SessionConfig;
use crate::pipelines::video::{FrameEncoder, RecordingPipeline};

/// Lifecycle of a camera session
///
/// ```text
/// Closed → Opening → Open → PreviewStarting → Previewing ⇄ Recording
///                      ↑                          │
///                      └──── PreviewStopping ←────┘
/// Open → Closing → Closed            any → Released
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Closed,
    Opening,
    Open,
    PreviewStarting,
    Previewing,
    Recording,
    PreviewStopping,
    Closing,
    Released,
}

impl SessionState {
    /// Whether a device handle is held in this state
    pub fn has_device(&self) -> bool {
        matches!(
            self,
            SessionState::Open
                | SessionState::PreviewStarting
                | SessionState::Previewing
                | SessionState::Recording
                | SessionState::PreviewStopping
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Closed => "closed",
            SessionState::Opening => "opening",
            SessionState::Open => "open",
            SessionState::PreviewStarting => "preview-starting",
            SessionState::Previewing => "previewing",
            SessionState::Recording => "recording",
            SessionState::PreviewStopping => "preview-stopping",
            SessionState::Closing => "closing",
            SessionState::Released => "released",
        };
        f.write_str(name)
    }
}

/// Fields guarded by the session mutex
///
/// Only the actor thread mutates them. Facade queries and the frame callback
/// read them under the same lock.
pub(crate) struct SessionInner {
    pub lifecycle: SessionState,
    pub camera: Option<Arc<dyn UvcCamera>>,
    pub previewing: bool,
    pub geometry: PreviewGeometry,
    pub recorder: Option<RecordingPipeline>,
    /// Read by the frame callback on the driver's stream thread
    pub frame_encoder: Option<Arc<dyn FrameEncoder>>,
    /// Stopped recordings whose encoders have not reported completion yet
    pub recordings_in_flight: usize,
    /// Bumped by every stop-preview request; older preview starts are stale
    pub preview_epoch: u64,
}

impl SessionInner {
    /// A preview start is queued behind the actor or being executed
    pub fn preview_pending(&self) -> bool {
        self.previewing || self.lifecycle == SessionState::PreviewStarting
    }
}

/// Everything the facade and the actor share
pub(crate) struct SessionShared {
    pub id: Uuid,
    pub config: SessionConfig,
    state: Mutex<SessionInner>,
    /// Signalled when `previewing` clears and when the actor exits
    pub preview_sync: Condvar,
    pub callbacks: CallbackSet,
    pub queue: CommandQueue<Command>,
    /// Set by the facade's `release` or when the actor finishes a release
    pub released: AtomicBool,
    pub actor_thread: OnceLock<ThreadId>,
    /// Written under the state lock so waiters never miss the exit
    actor_alive: AtomicBool,
}

impl SessionShared {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: Mutex::new(SessionInner {
                lifecycle: SessionState::Closed,
                camera: None,
                previewing: false,
                geometry: config.preview,
                recorder: None,
                frame_encoder: None,
                recordings_in_flight: 0,
                preview_epoch: 0,
            }),
            config,
            preview_sync: Condvar::new(),
            callbacks: CallbackSet::new(),
            queue: CommandQueue::new(),
            released: AtomicBool::new(false),
            actor_thread: OnceLock::new(),
            actor_alive: AtomicBool::new(true),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Released explicitly, or the actor is gone and takes no more commands
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst) || !self.is_actor_alive()
    }

    pub fn is_actor_alive(&self) -> bool {
        self.actor_alive.load(Ordering::SeqCst)
    }

    pub fn is_actor_thread(&self) -> bool {
        self.actor_thread.get() == Some(&std::thread::current().id())
    }

    /// Mark the actor gone and wake every waiter
    pub fn mark_actor_exited(&self) {
        let _guard = self.lock();
        self.actor_alive.store(false, Ordering::SeqCst);
        self.preview_sync.notify_all();
    }

    /// First eight hex digits of the id, used in thread names
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}
