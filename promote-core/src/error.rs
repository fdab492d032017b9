//! Error types for promote-core.
//!
//! [`PromoteError`] is the shared taxonomy every component reports in; adapter
//! crates convert their transport errors into it. [`ConfigError`] covers
//! configuration loading only.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while promoting a release.
#[derive(Debug, Error)]
pub enum PromoteError {
    /// A descriptor, tag, branch, deployment or key that must exist does not.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// Optimistic-concurrency violation: the remote object changed since it was read.
    #[error("conflict: {what}")]
    Conflict { what: String },

    /// More than one open change proposal targets the release branch.
    #[error("ambiguous proposal: {count} open pull requests target branch '{branch}'")]
    AmbiguousProposal {
        branch: String,
        count: usize,
        urls: Vec<String>,
    },

    /// A change proposal was expected on the release branch but none is open.
    #[error("missing proposal: no open pull request targets branch '{branch}'")]
    MissingProposal { branch: String },

    /// The merge-privileged identity could not approve the proposal.
    #[error("approval of PR #{number} rejected: {reason}")]
    Approval { number: u64, reason: String },

    /// The proposal could not be merged.
    #[error("merge of PR #{number} rejected: {reason}")]
    Merge { number: u64, reason: String },

    /// A bounded polling loop exhausted its budget.
    #[error("timed out waiting for {what} after {attempts} attempts (last observed: {last_observed})")]
    Timeout {
        what: String,
        attempts: u32,
        last_observed: String,
    },

    /// The deployment never converged on the desired state.
    #[error("rollout verification failed for deployment '{deployment}': {detail}")]
    RolloutVerification { deployment: String, detail: String },

    /// Rollback was impossible or did not verify; manual intervention required.
    #[error("rollback of deployment '{deployment}' failed: {detail}")]
    RollbackFailed { deployment: String, detail: String },

    /// The release was aborted between poll iterations.
    #[error("aborted during {step}")]
    Aborted { step: String },

    /// Source-control API rejected a request for a reason outside the taxonomy.
    #[error("source control API error{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Api { status: Option<u16>, message: String },

    /// A response that could not be decoded, or a credential the API will never accept.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The cluster control plane could not be reached or returned garbage.
    #[error("cluster error: {0}")]
    Cluster(String),

    /// Configuration could not be loaded or validated.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl PromoteError {
    pub fn not_found(what: impl Into<String>) -> Self {
        PromoteError::NotFound { what: what.into() }
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        PromoteError::Conflict { what: what.into() }
    }

    /// Whether a polling loop may count this error as a missed attempt and keep going.
    ///
    /// Network failures and 5xx responses are transient; every taxonomy error is not.
    pub fn is_transient(&self) -> bool {
        match self {
            PromoteError::Api { status, .. } => match status {
                None => true,
                Some(code) => *code >= 500 || *code == 429,
            },
            PromoteError::Cluster(_) => true,
            _ => false,
        }
    }
}

/// All errors that can arise from loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error with file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}")]
    NotFound { path: PathBuf },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or pass --config")]
    HomeNotFound,

    /// The release targets an environment the config does not declare.
    #[error("environment '{0}' is not configured")]
    UnknownEnvironment(String),

    /// Structurally valid YAML with semantically invalid values.
    #[error("invalid config: {0}")]
    Invalid(String),
}
