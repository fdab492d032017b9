//! GitHub REST v3 client.
//!
//! Every request carries the same header set: `Accept:
//! application/vnd.github+json`, a `User-Agent`, the pinned
//! `X-GitHub-Api-Version` and a bearer token. Non-2xx responses become
//! [`GitHubError::Status`] with GitHub's `message` when the body has one.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use promote_core::forge::{Identity, Reviewer, SourceControl};
use promote_core::types::{
    BranchName, ChangeProposal, CheckRun, CommitSha, CommitStatus, FileWrite, MergeRequest,
    NewProposal, ReleaseTag, RemoteFile, RepoRef, Review,
};
use promote_core::PromoteError;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::credential::{Credential, Merger, Proposer, Role};
use crate::error::GitHubError;
use crate::wire;

pub const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("promote/", env!("CARGO_PKG_VERSION"));
const PAGE_SIZE: usize = 100;
/// Annotated tags may point at other tags; stop following after this many.
const MAX_TAG_DEPTH: usize = 5;

pub struct GitHubClient<R: Role> {
    http: reqwest::Client,
    base_url: String,
    credential: Credential<R>,
    _role: PhantomData<R>,
}

impl<R: Role> std::fmt::Debug for GitHubClient<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("base_url", &self.base_url)
            .field("credential", &self.credential)
            .finish()
    }
}

impl<R: Role> GitHubClient<R> {
    pub fn new(base_url: impl Into<String>, credential: Credential<R>) -> Result<Self, GitHubError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential,
            _role: PhantomData,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header("Authorization", self.credential.bearer())
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> Result<reqwest::Response, GitHubError> {
        debug!(role = R::NAME, method = %method, path, "github request");
        let response = build(self.request(method.clone(), path)).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<wire::ApiMessage>(&body)
            .map(|m| m.message)
            .unwrap_or_else(|_| if body.is_empty() { status.to_string() } else { body });
        debug!(role = R::NAME, method = %method, path, status = status.as_u16(), %message, "github error");
        Err(GitHubError::Status {
            status: status.as_u16(),
            method: method.to_string(),
            path: path.to_string(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> Result<T, GitHubError> {
        let response = self.execute(method, path, build).await?;
        response.json::<T>().await.map_err(|e| GitHubError::Decode {
            what: path.to_string(),
            detail: e.to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GitHubError> {
        self.json(Method::GET, path, |rb| rb).await
    }

    /// GET every page of an endpoint that returns a bare JSON array.
    async fn get_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, GitHubError> {
        let per_page = PAGE_SIZE.to_string();
        let mut items = Vec::new();
        let mut page = 1usize;
        loop {
            let page_str = page.to_string();
            let batch: Vec<T> = self
                .json(Method::GET, path, |rb| {
                    rb.query(&[("per_page", per_page.as_str()), ("page", page_str.as_str())])
                })
                .await?;
            let fetched = batch.len();
            items.extend(batch);
            if fetched < PAGE_SIZE {
                return Ok(items);
            }
            page += 1;
        }
    }

    async fn send_body<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, GitHubError> {
        self.json(method, path, |rb| rb.json(body)).await
    }

    async fn send_body_discard<B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<(), GitHubError> {
        self.execute(method, path, |rb| rb.json(body)).await.map(drop)
    }
}

fn repo_path(repo: &RepoRef) -> String {
    format!("/repos/{}/{}", repo.owner, repo.name)
}

/// Re-map selected status codes before the default translation applies.
fn map_status(err: GitHubError, codes: &[u16], to: impl FnOnce(String) -> PromoteError) -> PromoteError {
    match &err {
        GitHubError::Status { status, message, .. } if codes.contains(status) => to(message.clone()),
        _ => err.into(),
    }
}

fn decode_content(contents: &wire::Contents, path: &str) -> Result<String, GitHubError> {
    if let Some(enc) = contents.encoding.as_deref() {
        if enc != "base64" {
            return Err(GitHubError::Decode {
                what: path.to_string(),
                detail: format!("unsupported encoding '{enc}'"),
            });
        }
    }
    let compact: String = contents.content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD.decode(compact).map_err(|e| GitHubError::Decode {
        what: path.to_string(),
        detail: e.to_string(),
    })?;
    String::from_utf8(bytes).map_err(|e| GitHubError::Decode {
        what: path.to_string(),
        detail: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Identity (both roles)
// ---------------------------------------------------------------------------

#[async_trait]
impl<R: Role> Identity for GitHubClient<R> {
    async fn whoami(&self) -> Result<String, PromoteError> {
        let user: wire::User = self.get("/user").await?;
        Ok(user.login)
    }
}

// ---------------------------------------------------------------------------
// SourceControl (proposer)
// ---------------------------------------------------------------------------

#[async_trait]
impl SourceControl for GitHubClient<Proposer> {
    async fn resolve_tag(&self, repo: &RepoRef, tag: &ReleaseTag) -> Result<CommitSha, PromoteError> {
        let base = repo_path(repo);
        let git_ref: wire::GitRef = self.get(&format!("{base}/git/ref/tags/{tag}")).await?;
        let mut object = git_ref.object;
        for _ in 0..MAX_TAG_DEPTH {
            if object.kind != "tag" {
                break;
            }
            let annotated: wire::GitTag = self.get(&format!("{base}/git/tags/{}", object.sha)).await?;
            object = annotated.object;
        }
        if object.kind != "commit" {
            return Err(PromoteError::not_found(format!(
                "commit behind tag {tag} (points at a {})",
                object.kind
            )));
        }
        Ok(CommitSha(object.sha))
    }

    async fn branch_head(
        &self,
        repo: &RepoRef,
        branch: &BranchName,
    ) -> Result<Option<CommitSha>, PromoteError> {
        let path = format!("{}/git/ref/heads/{branch}", repo_path(repo));
        match self.get::<wire::GitRef>(&path).await {
            Ok(r) => Ok(Some(CommitSha(r.object.sha))),
            Err(e) if e.status() == Some(404) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_branch(
        &self,
        repo: &RepoRef,
        branch: &BranchName,
        sha: &CommitSha,
    ) -> Result<(), PromoteError> {
        let body = wire::CreateRef {
            git_ref: format!("refs/heads/{branch}"),
            sha: &sha.0,
        };
        self.send_body_discard(Method::POST, &format!("{}/git/refs", repo_path(repo)), &body)
            .await
            .map_err(|e| map_status(e, &[422], |m| PromoteError::conflict(format!("branch {branch}: {m}"))))
    }

    async fn force_update_branch(
        &self,
        repo: &RepoRef,
        branch: &BranchName,
        sha: &CommitSha,
    ) -> Result<(), PromoteError> {
        let body = wire::UpdateRef { sha: &sha.0, force: true };
        let path = format!("{}/git/refs/heads/{branch}", repo_path(repo));
        self.send_body_discard(Method::PATCH, &path, &body)
            .await
            .map_err(|e| map_status(e, &[422], |m| PromoteError::not_found(format!("branch {branch}: {m}"))))
    }

    async fn delete_branch(&self, repo: &RepoRef, branch: &BranchName) -> Result<(), PromoteError> {
        let path = format!("{}/git/refs/heads/{branch}", repo_path(repo));
        self.execute(Method::DELETE, &path, |rb| rb).await?;
        Ok(())
    }

    async fn read_file(
        &self,
        repo: &RepoRef,
        path: &str,
        git_ref: &str,
    ) -> Result<RemoteFile, PromoteError> {
        let url = format!("{}/contents/{path}", repo_path(repo));
        let contents: wire::Contents = self
            .json(Method::GET, &url, |rb| rb.query(&[("ref", git_ref)]))
            .await?;
        let content = decode_content(&contents, path)?;
        Ok(RemoteFile {
            path: path.to_string(),
            sha: contents.sha,
            content,
        })
    }

    async fn write_file(&self, repo: &RepoRef, write: &FileWrite) -> Result<CommitSha, PromoteError> {
        let body = wire::PutContents {
            message: &write.message,
            content: STANDARD.encode(write.content.as_bytes()),
            sha: &write.expected_sha,
            branch: &write.branch.0,
        };
        let url = format!("{}/contents/{}", repo_path(repo), write.path);
        let resp: wire::PutContentsResponse = self
            .send_body(Method::PUT, &url, &body)
            .await
            .map_err(|e| {
                map_status(e, &[409, 422], |m| {
                    PromoteError::conflict(format!("{} on {}: {m}", write.path, write.branch))
                })
            })?;
        Ok(CommitSha(resp.commit.sha))
    }

    async fn list_open_proposals(
        &self,
        repo: &RepoRef,
        branch: &BranchName,
        base: &str,
    ) -> Result<Vec<ChangeProposal>, PromoteError> {
        let head = format!("{}:{branch}", repo.owner);
        let per_page = PAGE_SIZE.to_string();
        let pulls: Vec<wire::Pull> = self
            .json(Method::GET, &format!("{}/pulls", repo_path(repo)), |rb| {
                rb.query(&[
                    ("state", "open"),
                    ("head", head.as_str()),
                    ("base", base),
                    ("per_page", per_page.as_str()),
                ])
            })
            .await?;
        Ok(pulls.into_iter().map(ChangeProposal::from).collect())
    }

    async fn create_proposal(
        &self,
        repo: &RepoRef,
        proposal: &NewProposal,
    ) -> Result<ChangeProposal, PromoteError> {
        let body = wire::CreatePull {
            title: &proposal.title,
            body: &proposal.body,
            head: &proposal.head.0,
            base: &proposal.base,
        };
        let pull: wire::Pull = self
            .send_body(Method::POST, &format!("{}/pulls", repo_path(repo)), &body)
            .await?;
        Ok(pull.into())
    }

    async fn get_proposal(&self, repo: &RepoRef, number: u64) -> Result<ChangeProposal, PromoteError> {
        let pull: wire::Pull = self.get(&format!("{}/pulls/{number}", repo_path(repo))).await?;
        Ok(pull.into())
    }

    async fn list_check_runs(
        &self,
        repo: &RepoRef,
        sha: &CommitSha,
    ) -> Result<Vec<CheckRun>, PromoteError> {
        let path = format!("{}/commits/{sha}/check-runs", repo_path(repo));
        let per_page = PAGE_SIZE.to_string();
        let mut runs = Vec::new();
        let mut page = 1usize;
        loop {
            let page_str = page.to_string();
            let batch: wire::CheckRunPage = self
                .json(Method::GET, &path, |rb| {
                    rb.query(&[("per_page", per_page.as_str()), ("page", page_str.as_str())])
                })
                .await?;
            let fetched = batch.check_runs.len();
            runs.extend(batch.check_runs.into_iter().map(CheckRun::from));
            if fetched == 0 || runs.len() >= batch.total_count {
                break;
            }
            page += 1;
        }
        Ok(runs)
    }

    async fn list_statuses(
        &self,
        repo: &RepoRef,
        sha: &CommitSha,
    ) -> Result<Vec<CommitStatus>, PromoteError> {
        let path = format!("{}/commits/{sha}/status", repo_path(repo));
        let per_page = PAGE_SIZE.to_string();
        let mut statuses = Vec::new();
        let mut page = 1usize;
        loop {
            let page_str = page.to_string();
            let batch: wire::CombinedStatus = self
                .json(Method::GET, &path, |rb| {
                    rb.query(&[("per_page", per_page.as_str()), ("page", page_str.as_str())])
                })
                .await?;
            let fetched = batch.statuses.len();
            statuses.extend(batch.statuses.into_iter().map(CommitStatus::from));
            if fetched == 0 || statuses.len() >= batch.total_count {
                break;
            }
            page += 1;
        }
        Ok(statuses)
    }

    async fn create_status(
        &self,
        repo: &RepoRef,
        sha: &CommitSha,
        status: &CommitStatus,
    ) -> Result<(), PromoteError> {
        let body = wire::StatusWire::from(status);
        self.send_body_discard(Method::POST, &format!("{}/statuses/{sha}", repo_path(repo)), &body)
            .await?;
        Ok(())
    }

    async fn finalize_release(&self, repo: &RepoRef, tag: &ReleaseTag) -> Result<(), PromoteError> {
        let base = repo_path(repo);
        let release: wire::ReleaseWire = self.get(&format!("{base}/releases/tags/{tag}")).await?;
        self.send_body_discard(
            Method::PATCH,
            &format!("{base}/releases/{}", release.id),
            &serde_json::json!({ "prerelease": false }),
        )
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reviewer (merger)
// ---------------------------------------------------------------------------

#[async_trait]
impl Reviewer for GitHubClient<Merger> {
    async fn approve(&self, repo: &RepoRef, number: u64, sha: &CommitSha) -> Result<(), PromoteError> {
        let body = wire::CreateReview {
            commit_id: &sha.0,
            event: "APPROVE",
        };
        self.send_body_discard(
            Method::POST,
            &format!("{}/pulls/{number}/reviews", repo_path(repo)),
            &body,
        )
        .await?;
        Ok(())
    }

    async fn list_reviews(&self, repo: &RepoRef, number: u64) -> Result<Vec<Review>, PromoteError> {
        let reviews: Vec<wire::ReviewWire> = self
            .get_all(&format!("{}/pulls/{number}/reviews", repo_path(repo)))
            .await?;
        Ok(reviews.into_iter().map(Review::from).collect())
    }

    async fn squash_merge(
        &self,
        repo: &RepoRef,
        request: &MergeRequest,
    ) -> Result<CommitSha, PromoteError> {
        let body = wire::MergePull {
            sha: &request.sha.0,
            merge_method: "squash",
            commit_title: &request.commit_title,
            commit_message: &request.commit_message,
        };
        let path = format!("{}/pulls/{}/merge", repo_path(repo), request.number);
        let resp: wire::MergeResponse = self
            .send_body(Method::PUT, &path, &body)
            .await
            .map_err(|e| match e.status() {
                // 409 here is a stale head, not an optimistic write conflict.
                Some(code) if code == StatusCode::CONFLICT.as_u16() => PromoteError::Api {
                    status: Some(code),
                    message: e.to_string(),
                },
                _ => e.into(),
            })?;
        match (resp.merged, resp.sha) {
            (true, Some(sha)) => Ok(CommitSha(sha)),
            _ => Err(PromoteError::Api {
                status: Some(200),
                message: resp
                    .message
                    .unwrap_or_else(|| "merge reported as not merged".to_string()),
            }),
        }
    }
}
