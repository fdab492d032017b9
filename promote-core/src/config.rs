//! Process configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.promote/
//!   config.yaml
//! ```
//!
//! # API pattern
//!
//! - `load_at(path)` — explicit path; used by tests and `--config`
//! - `load()` — derives the path from `dirs::home_dir()`, delegates to `load_at`
//!
//! Credentials never live in this file; the CLI reads them
//! from the environment and passes them to the orchestrator as typed handles.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::poll::PollPolicy;
use crate::types::{Environment, RepoRef};

pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoteConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Repository whose tags are promoted and whose release commits receive mirrored checks.
    pub source_repo: RepoRef,
    /// Repository holding the environment descriptors.
    pub config_repo: RepoRef,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    pub environments: BTreeMap<Environment, EnvironmentConfig>,
    #[serde(default)]
    pub checks: ChecksConfig,
    #[serde(default)]
    pub rollout: RolloutConfig,
    #[serde(default)]
    pub health: HealthConfig,
    /// Re-read-and-retry budget for optimistic-concurrency conflicts.
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
    /// Directory of `.tera` files overriding the embedded message templates.
    #[serde(default)]
    pub templates_dir: Option<PathBuf>,
}

/// Per-environment settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Path of the descriptor file inside `config_repo`.
    pub descriptor_path: String,
    /// Default for releases into this environment; the CLI may override it.
    #[serde(default)]
    pub skip_merge: bool,
    #[serde(default)]
    pub namespace: Option<String>,
    /// kubectl context; the current context when unset.
    #[serde(default)]
    pub kube_context: Option<String>,
    /// Endpoint that must answer HTTP 200 once the rollout is live.
    #[serde(default)]
    pub health_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksConfig {
    /// Check names that gate the merge. Empty means every observed check.
    #[serde(default)]
    pub required: Vec<String>,
    /// Delay after opening the proposal before the first check fetch.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
    #[serde(default = "default_checks_poll")]
    pub poll: PollPolicy,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            required: Vec::new(),
            settle_secs: default_settle_secs(),
            poll: default_checks_poll(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutConfig {
    /// Budget for the platform to report the rollout complete.
    #[serde(default = "default_rollout_poll")]
    pub progress: PollPolicy,
    /// Budget for every pod to run the desired image.
    #[serde(default = "default_pods_poll")]
    pub pods: PollPolicy,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            progress: default_rollout_poll(),
            pods: default_pods_poll(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_poll")]
    pub poll: PollPolicy,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Skip TLS verification (self-signed pre-prod endpoints).
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            poll: default_health_poll(),
            request_timeout_secs: default_request_timeout_secs(),
            accept_invalid_certs: false,
        }
    }
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_conflict_retries() -> u32 {
    3
}

fn default_settle_secs() -> u64 {
    10
}

fn default_checks_poll() -> PollPolicy {
    PollPolicy::new(30, 120)
}

fn default_rollout_poll() -> PollPolicy {
    PollPolicy::new(10, 60)
}

fn default_pods_poll() -> PollPolicy {
    PollPolicy::new(10, 30)
}

fn default_health_poll() -> PollPolicy {
    PollPolicy::new(30, 10)
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl PromoteConfig {
    /// Settings for `env`, or [`ConfigError::UnknownEnvironment`].
    pub fn environment(&self, env: Environment) -> Result<&EnvironmentConfig, ConfigError> {
        self.environments
            .get(&env)
            .ok_or_else(|| ConfigError::UnknownEnvironment(env.to_string()))
    }

    /// Reject configs that would parse but cannot drive a release.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environments.is_empty() {
            return Err(ConfigError::Invalid("no environments configured".into()));
        }
        for (env, cfg) in &self.environments {
            if cfg.descriptor_path.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "environment '{env}' has an empty descriptor_path"
                )));
            }
        }
        for (name, policy) in [
            ("checks.poll", self.checks.poll),
            ("rollout.progress", self.rollout.progress),
            ("rollout.pods", self.rollout.pods),
            ("health.poll", self.health.poll),
        ] {
            if policy.max_attempts == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name}.max_attempts must be at least 1"
                )));
            }
        }
        if self.base_branch.trim().is_empty() {
            return Err(ConfigError::Invalid("base_branch is empty".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// `<home>/.promote/config.yaml`. Pure, no I/O.
pub fn default_path_at(home: &Path) -> PathBuf {
    home.join(".promote").join("config.yaml")
}

/// Load and validate the config at `path`.
///
/// Returns `ConfigError::NotFound` if absent and `ConfigError::Parse` (with
/// path + line context) if malformed.
pub fn load_at(path: &Path) -> Result<PromoteConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let config: PromoteConfig = serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper for `~/.promote/config.yaml`.
pub fn load() -> Result<PromoteConfig, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    load_at(&default_path_at(&home))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
source_repo: { owner: acme, name: api }
config_repo: { owner: acme, name: infra }
environments:
  pre-prod:
    descriptor_path: envs/pre-prod.env
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg: PromoteConfig = serde_yaml::from_str(MINIMAL).expect("parse");
        assert_eq!(cfg.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(cfg.base_branch, "main");
        assert_eq!(cfg.conflict_retries, 3);
        assert_eq!(cfg.checks.poll, PollPolicy::new(30, 120));
        assert_eq!(cfg.health.poll, PollPolicy::new(30, 10));
        let pre = cfg.environment(Environment::PreProd).expect("pre-prod");
        assert!(!pre.skip_merge);
        assert!(pre.health_url.is_none());
        cfg.validate().expect("valid");
    }

    #[test]
    fn unknown_environment_is_reported() {
        let cfg: PromoteConfig = serde_yaml::from_str(MINIMAL).expect("parse");
        let err = cfg.environment(Environment::Prod).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownEnvironment(ref e) if e == "prod"));
    }

    #[test]
    fn zero_attempt_policy_is_invalid() {
        let mut cfg: PromoteConfig = serde_yaml::from_str(MINIMAL).expect("parse");
        cfg.rollout.pods.max_attempts = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("rollout.pods"), "got: {err}");
    }

    #[test]
    fn empty_descriptor_path_is_invalid() {
        let mut cfg: PromoteConfig = serde_yaml::from_str(MINIMAL).expect("parse");
        if let Some(env) = cfg.environments.get_mut(&Environment::PreProd) {
            env.descriptor_path = " ".into();
        }
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn default_path_is_under_dot_promote() {
        let p = default_path_at(Path::new("/home/ci"));
        assert_eq!(p, PathBuf::from("/home/ci/.promote/config.yaml"));
    }
}
