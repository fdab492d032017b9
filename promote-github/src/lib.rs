//! GitHub REST adapter for the `SourceControl` and `Reviewer` seams.

pub mod client;
pub mod credential;
pub mod error;
mod wire;

pub use client::GitHubClient;
pub use credential::{Credential, Merger, Proposer, Role};
pub use error::GitHubError;
