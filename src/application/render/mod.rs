//! Rendering seam.
//!
//! The cache builder never renders anything itself: it hands a URL plus an
//! explicit set of per-variant overrides to a [`Renderer`] and stores whatever
//! comes back.

mod types;

pub use types::{RenderError, RenderOverrides, RenderRequest, RenderedPage, Renderer};
