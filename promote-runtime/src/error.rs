use std::path::PathBuf;

use thiserror::Error;

/// Failures of the process around a release, not of the release itself.
/// A release that fails still produces an `Outcome`.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("render error: {0}")]
    Render(#[from] promote_renderer::RenderError),

    #[error("{task} task failed: {detail}")]
    Task { task: &'static str, detail: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RuntimeError {
    RuntimeError::Io {
        path: path.into(),
        source,
    }
}
