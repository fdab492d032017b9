//! Role-typed API tokens.
//!
//! A token is wrapped in `Credential<Proposer>` or `Credential<Merger>` at the
//! process edge. A `GitHubClient<Proposer>` implements `SourceControl` only and
//! a `GitHubClient<Merger>` implements `Reviewer` only, so the merge gate can
//! never be handed the triggering identity by accident.

use std::fmt;
use std::marker::PhantomData;

use crate::error::GitHubError;

/// Marker for the identity that triggers the release and opens the proposal.
#[derive(Debug, Clone, Copy)]
pub struct Proposer;

/// Marker for the merge-privileged bot identity.
#[derive(Debug, Clone, Copy)]
pub struct Merger;

pub trait Role: Send + Sync + 'static {
    const NAME: &'static str;
}

impl Role for Proposer {
    const NAME: &'static str = "proposer";
}

impl Role for Merger {
    const NAME: &'static str = "merger";
}

#[derive(Clone)]
pub struct Credential<R: Role> {
    token: String,
    _role: PhantomData<R>,
}

impl<R: Role> Credential<R> {
    pub fn new(token: impl Into<String>) -> Result<Self, GitHubError> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(GitHubError::InvalidCredential(format!(
                "empty {} token",
                R::NAME
            )));
        }
        if token.chars().any(|c| c.is_control()) {
            return Err(GitHubError::InvalidCredential(format!(
                "{} token contains control characters",
                R::NAME
            )));
        }
        Ok(Self {
            token,
            _role: PhantomData,
        })
    }

    pub(crate) fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl<R: Role> fmt::Debug for Credential<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential<{}>(***)", R::NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_is_rejected() {
        let err = Credential::<Merger>::new("  ").unwrap_err();
        assert!(err.to_string().contains("empty merger token"));
    }

    #[test]
    fn debug_never_prints_the_token() {
        let cred = Credential::<Proposer>::new("ghp_secret").expect("valid");
        let shown = format!("{cred:?}");
        assert!(!shown.contains("ghp_secret"));
        assert_eq!(shown, "Credential<proposer>(***)");
        assert_eq!(cred.bearer(), "Bearer ghp_secret");
    }
}
