// SPDX-License-Identifier: MPL-2.0

//! Capture pipelines used by the session actor
//!
//! # Pipeline Architecture
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ CameraView   │ ──▶ │  Photo Pipeline   │ ──▶ │  PNG / JPEG  │
//! │ (last frame) │     │  - to RGBA        │     │              │
//! │              │     │  - image encode   │     │              │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//!
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ Stream frames│ ──▶ │  Video Pipeline   │ ──▶ │   MP4 File   │
//! │ (surface or  │     │  - Muxer          │     │              │
//! │  callback)   │     │  - Video + audio  │     │              │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`photo`]: Still image encoding and the shutter sound hook
//! - [`video`]: Recording pipeline and its muxer backends

pub mod photo;
pub mod video;
