//! Response and request bodies of the REST endpoints in use, and their
//! conversion into core types.

use promote_core::types::{
    BranchName, ChangeProposal, CheckRun, CheckState, CommitSha, CommitStatus, ProposalState,
    Review,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub(crate) struct User {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GitObject {
    pub sha: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GitRef {
    pub object: GitObject,
}

/// Annotated tag object.
#[derive(Debug, Deserialize)]
pub(crate) struct GitTag {
    pub object: GitObject,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateRef<'a> {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct UpdateRef<'a> {
    pub sha: &'a str,
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Contents {
    pub sha: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub encoding: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PutContents<'a> {
    pub message: &'a str,
    pub content: String,
    pub sha: &'a str,
    pub branch: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommitRef {
    pub sha: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PutContentsResponse {
    pub commit: CommitRef,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PullBranch {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Pull {
    pub number: u64,
    pub html_url: String,
    pub state: String,
    #[serde(default)]
    pub merged_at: Option<String>,
    pub head: PullBranch,
    pub base: PullBranch,
    #[serde(default)]
    pub user: Option<User>,
}

impl From<Pull> for ChangeProposal {
    fn from(p: Pull) -> Self {
        let state = if p.merged_at.is_some() {
            ProposalState::Merged
        } else if p.state == "open" {
            ProposalState::Open
        } else {
            ProposalState::Closed
        };
        ChangeProposal {
            number: p.number,
            url: p.html_url,
            branch: BranchName(p.head.git_ref),
            base_branch: p.base.git_ref,
            head_sha: CommitSha(p.head.sha),
            state,
            author: p.user.map(|u| u.login).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CreatePull<'a> {
    pub title: &'a str,
    pub body: &'a str,
    pub head: &'a str,
    pub base: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CheckRunWire {
    pub id: u64,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub details_url: Option<String>,
}

impl From<CheckRunWire> for CheckRun {
    fn from(c: CheckRunWire) -> Self {
        CheckRun {
            id: c.id,
            name: c.name,
            status: c.status,
            conclusion: c.conclusion,
            url: c.html_url.or(c.details_url),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CheckRunPage {
    pub total_count: usize,
    pub check_runs: Vec<CheckRunWire>,
}

#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct StatusWire {
    pub context: String,
    pub state: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub target_url: Option<String>,
}

impl From<StatusWire> for CommitStatus {
    fn from(s: StatusWire) -> Self {
        let state = match s.state.as_str() {
            "success" => CheckState::Success,
            "failure" | "error" => CheckState::Failure,
            _ => CheckState::Pending,
        };
        CommitStatus {
            context: s.context,
            state,
            description: s.description,
            target_url: s.target_url,
        }
    }
}

impl From<&CommitStatus> for StatusWire {
    fn from(s: &CommitStatus) -> Self {
        StatusWire {
            context: s.context.clone(),
            state: s.state.as_str().to_string(),
            description: s.description.clone(),
            target_url: s.target_url.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CombinedStatus {
    #[serde(default)]
    pub total_count: usize,
    #[serde(default)]
    pub statuses: Vec<StatusWire>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReleaseWire {
    pub id: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateReview<'a> {
    pub commit_id: &'a str,
    pub event: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReviewWire {
    pub user: Option<User>,
    pub state: String,
}

impl From<ReviewWire> for Review {
    fn from(r: ReviewWire) -> Self {
        Review {
            login: r.user.map(|u| u.login).unwrap_or_default(),
            state: r.state,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct MergePull<'a> {
    pub sha: &'a str,
    pub merge_method: &'a str,
    pub commit_title: &'a str,
    pub commit_message: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MergeResponse {
    pub sha: Option<String>,
    pub merged: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Error body GitHub attaches to 4xx responses.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiMessage {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_pull_maps_to_merged_state() {
        let pull: Pull = serde_json::from_value(serde_json::json!({
            "number": 7,
            "html_url": "https://github.com/acme/infra/pull/7",
            "state": "closed",
            "merged_at": "2024-05-01T10:00:00Z",
            "head": { "ref": "release/prod/1.2.3", "sha": "abc" },
            "base": { "ref": "main", "sha": "def" }
        }))
        .expect("decode");
        let proposal = ChangeProposal::from(pull);
        assert_eq!(proposal.state, ProposalState::Merged);
        assert_eq!(proposal.branch.0, "release/prod/1.2.3");
        assert_eq!(proposal.base_branch, "main");
    }

    #[test]
    fn error_status_counts_as_failure() {
        let status = CommitStatus::from(StatusWire {
            context: "build / 1.2.3".into(),
            state: "error".into(),
            description: None,
            target_url: None,
        });
        assert_eq!(status.state, CheckState::Failure);
    }

    #[test]
    fn check_run_falls_back_to_details_url() {
        let run = CheckRun::from(CheckRunWire {
            id: 1,
            name: "build".into(),
            status: "completed".into(),
            conclusion: Some("success".into()),
            html_url: None,
            details_url: Some("https://ci.example/1".into()),
        });
        assert_eq!(run.url.as_deref(), Some("https://ci.example/1"));
    }
}
