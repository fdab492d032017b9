//! Domain types for release promotion.
//!
//! Newtypes keep tags, commit SHAs and branch names from being mixed up at
//! call sites. All types are serializable via serde so they can appear in the
//! JSON outcome and in rendered summaries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A release tag, e.g. `1.2.3`. Used verbatim as the image version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReleaseTag(pub String);

impl fmt::Display for ReleaseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ReleaseTag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ReleaseTag {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A full git commit SHA.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitSha(pub String);

impl CommitSha {
    /// First seven characters, for log lines and summaries.
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(7).map(|(i, _)| i).unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for CommitSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for CommitSha {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CommitSha {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A git branch name (without `refs/heads/`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchName(pub String);

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for BranchName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BranchName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// `owner/name` coordinates of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Deployment stage a release is promoted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Environment {
    #[serde(rename = "pre-prod")]
    PreProd,
    #[serde(rename = "prod")]
    Prod,
}

impl Environment {
    pub fn all() -> &'static [Environment] {
        &[Environment::PreProd, Environment::Prod]
    }

    /// Upper-case label used in proposal titles and commit messages.
    pub fn label(&self) -> &'static str {
        match self {
            Environment::PreProd => "PRE-PROD",
            Environment::Prod => "PROD",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::PreProd => write!(f, "pre-prod"),
            Environment::Prod => write!(f, "prod"),
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pre-prod" | "preprod" | "pre_prod" => Ok(Environment::PreProd),
            "prod" | "production" => Ok(Environment::Prod),
            other => Err(format!(
                "unknown environment '{other}'; expected: pre-prod, prod"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Release
// ---------------------------------------------------------------------------

/// One tag-to-deployment promotion attempt. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub tag: ReleaseTag,
    /// Commit the tag points at in the source repository.
    pub commit: CommitSha,
    pub environment: Environment,
    pub skip_merge: bool,
    pub delete_branch: bool,
    /// Promote the source-repository release object out of pre-release on success.
    #[serde(default)]
    pub finalize: bool,
}

impl Release {
    /// Deterministic release branch: `release/<environment>/<tag>`.
    pub fn branch(&self) -> BranchName {
        BranchName(format!("release/{}/{}", self.environment, self.tag))
    }
}

// ---------------------------------------------------------------------------
// Change proposals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalState {
    Open,
    Merged,
    Closed,
}

impl fmt::Display for ProposalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposalState::Open => write!(f, "open"),
            ProposalState::Merged => write!(f, "merged"),
            ProposalState::Closed => write!(f, "closed"),
        }
    }
}

/// A pull request carrying the descriptor change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeProposal {
    pub number: u64,
    pub url: String,
    pub branch: BranchName,
    pub base_branch: String,
    pub head_sha: CommitSha,
    pub state: ProposalState,
    /// Login that opened the pull request; empty when the platform omits it.
    #[serde(default)]
    pub author: String,
}

/// Payload for opening a new pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProposal {
    pub title: String,
    pub body: String,
    pub head: BranchName,
    pub base: String,
}

/// A review left on a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub login: String,
    /// `APPROVED`, `CHANGES_REQUESTED`, `COMMENTED`, ...
    pub state: String,
}

impl Review {
    pub fn is_approval(&self) -> bool {
        self.state.eq_ignore_ascii_case("APPROVED")
    }
}

/// Squash-merge request pinned to the head SHA whose checks passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub number: u64,
    pub sha: CommitSha,
    pub commit_title: String,
    pub commit_message: String,
}

// ---------------------------------------------------------------------------
// Remote files
// ---------------------------------------------------------------------------

/// A file as read from the configuration repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: String,
    /// Blob SHA the write must present to prove it saw this version.
    pub sha: String,
    pub content: String,
}

/// A conditional file write on a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub path: String,
    pub branch: BranchName,
    pub message: String,
    pub content: String,
    /// Blob SHA observed at read time; a mismatch is a conflict.
    pub expected_sha: String,
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// Normalised state of one check, as mirrored onto the release commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckState {
    Success,
    Failure,
    Pending,
}

impl CheckState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckState::Success => "success",
            CheckState::Failure => "failure",
            CheckState::Pending => "pending",
        }
    }
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One check run attached to a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub id: u64,
    pub name: String,
    /// `queued`, `in_progress` or `completed`.
    pub status: String,
    pub conclusion: Option<String>,
    pub url: Option<String>,
}

impl CheckRun {
    /// Classify this run. Anything not clearly finished counts as pending.
    pub fn state(&self) -> CheckState {
        if self.status != "completed" {
            return CheckState::Pending;
        }
        match self.conclusion.as_deref() {
            Some("success" | "skipped" | "neutral") => CheckState::Success,
            Some("failure" | "timed_out" | "action_required" | "stale" | "cancelled") => {
                CheckState::Failure
            }
            _ => CheckState::Pending,
        }
    }
}

/// A commit status: the mirror of one check run on the release commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStatus {
    pub context: String,
    pub state: CheckState,
    pub description: Option<String>,
    pub target_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

/// Where a deployment lives and which container carries the release image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRef {
    pub namespace: Option<String>,
    pub name: String,
    pub container: String,
}

impl fmt::Display for DeploymentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => self.name.fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImage {
    pub name: String,
    pub image: String,
}

/// Point-in-time read of a deployment object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSnapshot {
    pub name: String,
    /// Opaque version used as the precondition of the next write.
    pub resource_version: String,
    /// `deployment.kubernetes.io/revision`, when the controller has set it.
    pub revision: Option<u64>,
    pub containers: Vec<ContainerImage>,
}

impl DeploymentSnapshot {
    pub fn image_of(&self, container: &str) -> Option<&str> {
        self.containers
            .iter()
            .find(|c| c.name == container)
            .map(|c| c.image.as_str())
    }
}

/// Conditional image update. `dry_run` asks the control plane for the
/// predicted object without persisting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpdate {
    pub container: String,
    pub image: String,
    pub expected_resource_version: String,
    pub dry_run: bool,
}

/// Replica counters the rollout controller waits on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutProgress {
    pub desired: u32,
    pub updated: u32,
    pub available: u32,
    /// Replicas still running the old template.
    pub stale: u32,
    /// The controller has observed the latest spec generation.
    pub observed_latest: bool,
    /// Set when the platform reports the rollout has stalled (progress deadline).
    pub stalled_reason: Option<String>,
}

impl RolloutProgress {
    pub fn is_complete(&self) -> bool {
        self.observed_latest
            && self.updated >= self.desired
            && self.available >= self.desired
            && self.stale == 0
    }
}

impl fmt::Display for RolloutProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} updated, {}/{} available, {} old",
            self.updated, self.desired, self.available, self.desired, self.stale
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl FromStr for PodPhase {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        })
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One pod as seen by the verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodObservation {
    pub pod_id: String,
    /// Image of the release container; `None` when the container is absent.
    pub image: Option<String>,
    pub phase: PodPhase,
}

impl PodObservation {
    pub fn matches(&self, desired_image: &str) -> bool {
        self.phase == PodPhase::Running && self.image.as_deref() == Some(desired_image)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
