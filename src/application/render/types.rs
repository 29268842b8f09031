use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Per-call configuration for one physical variant of a URL.
///
/// Replaces process-wide configuration nesting: the value is built for a
/// single render call and dropped afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOverrides {
    /// Absolute base URL (scheme + host + base path) the page is rendered under.
    pub base_url: Option<String>,
    /// Theme to render with instead of the site default.
    pub theme: Option<String>,
}

/// Rendering request passed to the external renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    /// Site-relative URL being generated.
    pub url: String,
    pub overrides: RenderOverrides,
}

impl RenderRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            overrides: RenderOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: RenderOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Rendered bytes and the HTTP status the page produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub status: u16,
    pub content: Bytes,
}

impl RenderedPage {
    pub fn new(status: u16, content: impl Into<Bytes>) -> Self {
        Self {
            status,
            content: content.into(),
        }
    }
}

/// Structured errors surfaced by a renderer.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// The page could not be produced; the worker records it and moves on.
    #[error("rendering `{url}` failed: {message}")]
    Failed { url: String, message: String },
    /// The renderer itself is broken; the worker stops after recording it.
    #[error("renderer crashed while rendering `{url}`: {message}")]
    Fatal { url: String, message: String },
}

impl RenderError {
    pub fn failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn fatal(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, RenderError::Fatal { .. })
    }
}

/// Produces the bytes for a URL. Implementations talk to the dynamic site.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedPage, RenderError>;
}
