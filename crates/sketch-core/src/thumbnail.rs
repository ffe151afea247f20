//! Thumbnail renderer boundary.
//!
//! Rendering lives outside this crate. The scheduler only needs something that
//! turns content into a [`Thumbnail`], and treats any failure as "no new
//! thumbnail".

use crate::model::{Content, Thumbnail};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("Thumbnail rendering is not available")]
    Unavailable,

    #[error("Thumbnail rendering failed: {0}")]
    Render(String),
}

#[async_trait]
pub trait ThumbnailRenderer: Send + Sync {
    async fn render(&self, content: &Content) -> Result<Thumbnail, ThumbnailError>;
}

/// Renderer for hosts without a preview pipeline. Always `Unavailable`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledThumbnails;

#[async_trait]
impl ThumbnailRenderer for DisabledThumbnails {
    async fn render(&self, _content: &Content) -> Result<Thumbnail, ThumbnailError> {
        Err(ThumbnailError::Unavailable)
    }
}
