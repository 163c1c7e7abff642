// SPDX-License-Identifier: GPL-3.0-only

//! Camera session: a facade plus a single-threaded actor per device
//!
//! ```text
//! SessionHandle ──post──▶ CommandQueue ──▶ actor thread ──▶ UvcCamera
//!      │                                       │        └──▶ RecordingPipeline
//!      └── queries (state lock) ◀──────────────┘──▶ CameraCallback observers
//! ```
//!
//! Every device operation runs on the actor thread in submission order.
//! The facade only reads shared state under the session lock; it never
//! waits for the actor except in [`SessionHandle::stop_preview`].

mod actor;
mod callbacks;
mod command;
mod handle;
mod queue;
mod state;
mod surface;
mod view;

pub use callbacks::{CallbackResult, CameraCallback, CameraEvent, ChannelCallback};
pub use handle::{SessionBuilder, SessionHandle};
pub use state::SessionState;
pub use surface::{DisplaySurface, IntoPreviewSurface, PreviewSurface, SurfaceHolder, TextureSurface};
pub use view::{CameraView, LatestFrameView, SessionOwner};
