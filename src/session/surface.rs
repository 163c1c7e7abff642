// SPDX-License-Identifier: MPL-2.0

//! Preview output targets
//!
//! A preview binds to exactly one of three surface kinds. Anything else
//! handed to [`crate::session::SessionHandle::start_preview`] is rejected with
//! [`SessionError::InvalidArgument`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::backends::camera::types::{FrameSink, SurfaceBinding};
use crate::errors::{SessionError, SessionResult};

/// On-screen surface owned by a window
#[derive(Clone)]
pub struct DisplaySurface(pub Arc<dyn FrameSink>);

/// Holder of a surface whose lifetime is managed elsewhere
#[derive(Clone)]
pub struct SurfaceHolder {
    surface: Arc<dyn FrameSink>,
}

impl SurfaceHolder {
    pub fn new(surface: Arc<dyn FrameSink>) -> Self {
        Self { surface }
    }

    pub fn surface(&self) -> &Arc<dyn FrameSink> {
        &self.surface
    }
}

/// Offscreen texture, e.g. a GPU upload target
#[derive(Clone)]
pub struct TextureSurface {
    texture: Arc<dyn FrameSink>,
}

impl TextureSurface {
    pub fn new(texture: Arc<dyn FrameSink>) -> Self {
        Self { texture }
    }
}

/// Preview target accepted by a session
#[derive(Clone)]
pub enum PreviewSurface {
    Holder(SurfaceHolder),
    Display(DisplaySurface),
    Texture(TextureSurface),
}

impl PreviewSurface {
    /// Driver-side binding for this surface
    pub fn binding(&self) -> SurfaceBinding {
        match self {
            PreviewSurface::Holder(holder) => SurfaceBinding::Display(holder.surface.clone()),
            PreviewSurface::Display(display) => SurfaceBinding::Display(display.0.clone()),
            PreviewSurface::Texture(texture) => SurfaceBinding::Texture(texture.texture.clone()),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            PreviewSurface::Holder(_) => "holder",
            PreviewSurface::Display(_) => "display",
            PreviewSurface::Texture(_) => "texture",
        }
    }
}

impl fmt::Debug for PreviewSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PreviewSurface::{}", self.kind())
    }
}

/// Conversion into one of the accepted surface kinds
pub trait IntoPreviewSurface {
    fn into_preview_surface(self) -> SessionResult<PreviewSurface>;
}

impl IntoPreviewSurface for PreviewSurface {
    fn into_preview_surface(self) -> SessionResult<PreviewSurface> {
        Ok(self)
    }
}

impl IntoPreviewSurface for SurfaceHolder {
    fn into_preview_surface(self) -> SessionResult<PreviewSurface> {
        Ok(PreviewSurface::Holder(self))
    }
}

impl IntoPreviewSurface for DisplaySurface {
    fn into_preview_surface(self) -> SessionResult<PreviewSurface> {
        Ok(PreviewSurface::Display(self))
    }
}

impl IntoPreviewSurface for TextureSurface {
    fn into_preview_surface(self) -> SessionResult<PreviewSurface> {
        Ok(PreviewSurface::Texture(self))
    }
}

/// Type-erased input from callers that cannot name the surface type
impl IntoPreviewSurface for Box<dyn Any + Send> {
    fn into_preview_surface(self) -> SessionResult<PreviewSurface> {
        let any = match self.downcast::<PreviewSurface>() {
            Ok(surface) => return Ok(*surface),
            Err(any) => any,
        };
        let any = match any.downcast::<SurfaceHolder>() {
            Ok(holder) => return Ok(PreviewSurface::Holder(*holder)),
            Err(any) => any,
        };
        let any = match any.downcast::<DisplaySurface>() {
            Ok(display) => return Ok(PreviewSurface::Display(*display)),
            Err(any) => any,
        };
        match any.downcast::<TextureSurface>() {
            Ok(texture) => Ok(PreviewSurface::Texture(*texture)),
            Err(_) => Err(SessionError::InvalidArgument(
                "preview needs a SurfaceHolder, DisplaySurface or TextureSurface".into(),
            )),
        }
    }
}
