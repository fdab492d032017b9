use std::time::Duration;

use thiserror::Error;

use promote_core::PromoteError;

/// Failures talking to the cluster through `kubectl` or to the health endpoint.
#[derive(Debug, Error)]
pub enum KubectlError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`kubectl {args}` exited with {status}: {stderr}")]
    Failed {
        args: String,
        status: String,
        stderr: String,
    },

    #[error("could not decode {what} from kubectl output: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("health probe of {url} failed after {timeout:?}: {source}")]
    Probe {
        url: String,
        timeout: Duration,
        #[source]
        source: reqwest::Error,
    },
}

impl KubectlError {
    fn stderr(&self) -> Option<&str> {
        match self {
            KubectlError::Failed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

impl From<KubectlError> for PromoteError {
    fn from(err: KubectlError) -> Self {
        match err.stderr() {
            Some(s) if s.contains("(NotFound)") => PromoteError::not_found(s.trim().to_string()),
            Some(s) if s.contains("(Conflict)") || s.contains("the object has been modified") => {
                PromoteError::conflict(s.trim().to_string())
            }
            _ => PromoteError::Cluster(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> KubectlError {
        KubectlError::Failed {
            args: "get deployment api".into(),
            status: "exit status: 1".into(),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn server_errors_map_onto_the_taxonomy() {
        let not_found: PromoteError =
            failed(r#"Error from server (NotFound): deployments.apps "api" not found"#).into();
        assert!(matches!(not_found, PromoteError::NotFound { .. }));

        let conflict: PromoteError = failed(
            r#"Error from server (Conflict): Operation cannot be fulfilled on deployments.apps "api": the object has been modified; please apply your changes to the latest version and try again"#,
        )
        .into();
        assert!(matches!(conflict, PromoteError::Conflict { .. }));

        let other: PromoteError = failed("Unable to connect to the server: dial tcp: i/o timeout").into();
        assert!(matches!(other, PromoteError::Cluster(_)));
        assert!(other.is_transient());
    }
}
