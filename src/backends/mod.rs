// SPDX-License-Identifier: MPL-2.0

//! Hardware-facing layer
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │          Session / Presence Monitor          │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                   │
//! │  ┌─────────────┐    ┌──────────────────┐   │
//! │  │     USB     │    │     Camera       │   │
//! │  │ (sysfs +    │    │  (UvcCamera,     │   │
//! │  │  uevents)   │    │   V4L2)          │   │
//! │  └─────────────┘    └──────────────────┘   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: Camera driver traits, frame types and the V4L2 driver
//! - [`usb`]: Device enumeration, permissions and presence monitoring
//! - [`worker_loop`]: Named worker threads with cooperative stop

pub mod camera;
pub mod usb;
pub mod worker_loop;
