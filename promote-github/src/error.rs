use promote_core::PromoteError;
use thiserror::Error;

/// Transport-level failures talking to the GitHub REST API.
#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("GitHub returned HTTP {status} for {method} {path}: {message}")]
    Status {
        status: u16,
        method: String,
        path: String,
        message: String,
    },

    #[error("failed to decode {what}: {detail}")]
    Decode { what: String, detail: String },

    #[error("invalid credential: {0}")]
    InvalidCredential(String),
}

impl GitHubError {
    pub fn status(&self) -> Option<u16> {
        match self {
            GitHubError::Status { status, .. } => Some(*status),
            GitHubError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Default translation into the shared taxonomy. Endpoints with their own
/// meaning for 409/422 map those codes before falling back to this.
impl From<GitHubError> for PromoteError {
    fn from(err: GitHubError) -> Self {
        match &err {
            GitHubError::Status { status: 404, path, .. } => PromoteError::not_found(path.clone()),
            GitHubError::Status { status: 409, path, .. } => PromoteError::conflict(path.clone()),
            GitHubError::Decode { .. } | GitHubError::InvalidCredential(_) => {
                PromoteError::Protocol(err.to_string())
            }
            _ => PromoteError::Api {
                status: err.status(),
                message: err.to_string(),
            },
        }
    }
}
