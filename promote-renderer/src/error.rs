//! Error types for promote-renderer.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template engine error: {0}")]
    Tera(#[from] tera::Error),

    /// Filesystem error while loading override templates.
    #[error("template io error at {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

impl From<RenderError> for promote_core::PromoteError {
    fn from(err: RenderError) -> Self {
        promote_core::PromoteError::Config(promote_core::ConfigError::Invalid(err.to_string()))
    }
}
