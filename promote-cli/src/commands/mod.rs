//! Subcommands plus the wiring they share: config loading and clients.

pub mod config;
pub mod plan;
pub mod run;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use promote_core::{config as core_config, PromoteConfig};
use promote_github::{Credential, GitHubClient, Merger, Proposer};
use promote_rollout::HttpHealthProbe;

/// API tokens. Read from the environment in CI; never from the config file.
#[derive(Args, Debug)]
pub struct TokenArgs {
    /// Token of the identity that triggers the release and opens the proposal.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true, value_name = "TOKEN")]
    pub github_token: Option<String>,

    /// Token of the merge-privileged bot identity.
    #[arg(long, env = "GITHUB_BOT_TOKEN", hide_env_values = true, value_name = "TOKEN")]
    pub bot_token: Option<String>,
}

impl TokenArgs {
    pub fn proposer(&self, config: &PromoteConfig) -> Result<GitHubClient<Proposer>> {
        let token = self
            .github_token
            .as_deref()
            .context("GITHUB_TOKEN is not set (or pass --github-token)")?;
        let credential = Credential::<Proposer>::new(token)?;
        Ok(GitHubClient::new(config.api_base_url.clone(), credential)?)
    }

    pub fn merger(&self, config: &PromoteConfig) -> Result<GitHubClient<Merger>> {
        let token = self
            .bot_token
            .as_deref()
            .context("GITHUB_BOT_TOKEN is not set (or pass --bot-token)")?;
        let credential = Credential::<Merger>::new(token)?;
        Ok(GitHubClient::new(config.api_base_url.clone(), credential)?)
    }
}

/// `explicit`, else `~/.promote/config.yaml`.
pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => {
            let home = dirs::home_dir().context("could not determine home directory")?;
            Ok(core_config::default_path_at(&home))
        }
    }
}

pub fn load_config(explicit: Option<&Path>) -> Result<PromoteConfig> {
    let path = config_path(explicit)?;
    core_config::load_at(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

pub fn health_probe(config: &PromoteConfig) -> Result<HttpHealthProbe> {
    HttpHealthProbe::new(
        Duration::from_secs(config.health.request_timeout_secs),
        config.health.accept_invalid_certs,
    )
    .context("failed to build health-check HTTP client")
}
