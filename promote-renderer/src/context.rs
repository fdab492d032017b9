//! Template contexts: serializable payloads built from core types.

use serde::{Deserialize, Serialize};

use promote_core::descriptor::EnvironmentDescriptor;
use promote_core::types::{RepoRef, Release};
use promote_core::{MergeRecord, Outcome};

use crate::error::RenderError;

/// Payload for the proposal title, body, commit message and merge commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalContext {
    pub tag: String,
    pub environment: String,
    pub env_label: String,
    pub descriptor_path: String,
    /// `IMAGE_VERSION` before the update, if the descriptor had one.
    pub previous_version: Option<String>,
    /// Image reference after the update, or the tag alone if `IMAGE_NAME` is absent.
    pub image: String,
    pub source_repo: String,
    pub commit: String,
    pub commit_short: String,
    pub branch: String,
    /// Proposal number, known once the proposal exists.
    pub number: Option<u64>,
}

impl ProposalContext {
    pub fn new(
        release: &Release,
        source_repo: &RepoRef,
        descriptor_path: &str,
        current: &EnvironmentDescriptor,
    ) -> Self {
        let image = current
            .get(promote_core::descriptor::IMAGE_NAME)
            .map(|name| format!("{name}:{}", release.tag))
            .unwrap_or_else(|| release.tag.to_string());
        Self {
            tag: release.tag.to_string(),
            environment: release.environment.to_string(),
            env_label: release.environment.label().to_string(),
            descriptor_path: descriptor_path.to_string(),
            previous_version: current.image_version().map(str::to_owned),
            image,
            source_repo: source_repo.to_string(),
            commit: release.commit.to_string(),
            commit_short: release.commit.short().to_string(),
            branch: release.branch().to_string(),
            number: None,
        }
    }

    pub fn with_number(mut self, number: u64) -> Self {
        self.number = Some(number);
        self
    }

    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        Ok(tera::Context::from_serialize(self)?)
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalLink {
    pub number: u64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodRow {
    pub pod_id: String,
    pub image: String,
    pub phase: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutSummary {
    pub deployment: String,
    pub desired_image: String,
    pub previous_image: Option<String>,
    /// Phase transitions joined with arrows.
    pub transitions: String,
    pub rolled_back: bool,
    pub pods: Vec<PodRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureSummary {
    pub step: String,
    pub error: String,
    pub last_observed: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRow {
    pub at: String,
    pub step: String,
    pub result: String,
    pub detail: String,
}

/// Payload for `summary.md`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryContext {
    pub status: String,
    pub succeeded: bool,
    pub tag: String,
    pub environment: String,
    pub env_label: String,
    pub commit_short: String,
    pub proposal: Option<ProposalLink>,
    pub merge: String,
    pub rollout: Option<RolloutSummary>,
    pub failure: Option<FailureSummary>,
    pub trace: Vec<TraceRow>,
    pub duration_secs: i64,
}

/// Keep free text from breaking a Markdown table row.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

pub fn describe_merge(merge: &MergeRecord) -> String {
    match merge {
        MergeRecord::NotAttempted => "not attempted".to_string(),
        MergeRecord::Skipped => "skipped".to_string(),
        MergeRecord::Merged { sha } => format!("merged (`{}`)", sha.short()),
        MergeRecord::Failed { reason } => format!("failed: {}", cell(reason)),
    }
}

impl SummaryContext {
    pub fn from_outcome(outcome: &Outcome) -> Self {
        let release = &outcome.release;
        let rollout = outcome.rollout.as_ref().map(|r| RolloutSummary {
            deployment: r.deployment.to_string(),
            desired_image: r.desired_image.clone(),
            previous_image: r.previous_image.clone(),
            transitions: r
                .transitions
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(" → "),
            rolled_back: r.rolled_back,
            pods: r
                .observed_pods
                .iter()
                .map(|p| PodRow {
                    pod_id: p.pod_id.clone(),
                    image: p.image.clone().unwrap_or_else(|| "<none>".into()),
                    phase: p.phase.to_string(),
                })
                .collect(),
        });
        Self {
            status: outcome.status.to_string(),
            succeeded: outcome.status.is_success(),
            tag: release.tag.to_string(),
            environment: release.environment.to_string(),
            env_label: release.environment.label().to_string(),
            commit_short: release.commit.short().to_string(),
            proposal: outcome.proposal.as_ref().map(|p| ProposalLink {
                number: p.number,
                url: p.url.clone(),
            }),
            merge: describe_merge(&outcome.merge),
            rollout,
            failure: outcome.failure.as_ref().map(|f| FailureSummary {
                step: f.step.to_string(),
                error: f.error.clone(),
                last_observed: f.last_observed.clone(),
            }),
            trace: outcome
                .trace
                .iter()
                .map(|t| TraceRow {
                    at: t.at.format("%H:%M:%S").to_string(),
                    step: t.step.to_string(),
                    result: t.result.to_string(),
                    detail: cell(&t.detail),
                })
                .collect(),
            duration_secs: (outcome.finished_at - outcome.started_at).num_seconds(),
        }
    }

    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        Ok(tera::Context::from_serialize(self)?)
    }
}
