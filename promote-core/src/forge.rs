//! Source-control seams.
//!
//! Two capabilities, two traits: [`SourceControl`] is everything the
//! triggering identity may do (branches, files, proposals, checks, statuses);
//! [`Reviewer`] is what only the merge-privileged identity may do (approve,
//! merge). The merge gate accepts a `Reviewer`, the proposal manager a
//! `SourceControl`, so the two credentials cannot be swapped silently.

use async_trait::async_trait;

use crate::error::PromoteError;
use crate::types::{
    BranchName, ChangeProposal, CheckRun, CommitSha, CommitStatus, FileWrite, MergeRequest,
    NewProposal, ReleaseTag, RemoteFile, RepoRef, Review,
};

/// Identity lookup shared by both capabilities.
#[async_trait]
pub trait Identity: Send + Sync {
    /// Login of the authenticated account.
    async fn whoami(&self) -> Result<String, PromoteError>;
}

/// Operations available to the triggering identity.
#[async_trait]
pub trait SourceControl: Identity {
    /// Commit a tag points at, dereferencing annotated tags.
    async fn resolve_tag(&self, repo: &RepoRef, tag: &ReleaseTag) -> Result<CommitSha, PromoteError>;

    /// Head commit of `branch`, or `None` if the branch does not exist.
    async fn branch_head(
        &self,
        repo: &RepoRef,
        branch: &BranchName,
    ) -> Result<Option<CommitSha>, PromoteError>;

    /// Create `branch` at `sha`. Fails with `Conflict` if it already exists.
    async fn create_branch(
        &self,
        repo: &RepoRef,
        branch: &BranchName,
        sha: &CommitSha,
    ) -> Result<(), PromoteError>;

    /// Force-move an existing `branch` to `sha`.
    async fn force_update_branch(
        &self,
        repo: &RepoRef,
        branch: &BranchName,
        sha: &CommitSha,
    ) -> Result<(), PromoteError>;

    async fn delete_branch(&self, repo: &RepoRef, branch: &BranchName) -> Result<(), PromoteError>;

    /// Read `path` at `git_ref`. `NotFound` if absent.
    async fn read_file(
        &self,
        repo: &RepoRef,
        path: &str,
        git_ref: &str,
    ) -> Result<RemoteFile, PromoteError>;

    /// Conditionally write a file, producing exactly one commit.
    /// `Conflict` when the blob changed since `expected_sha` was read.
    async fn write_file(&self, repo: &RepoRef, write: &FileWrite) -> Result<CommitSha, PromoteError>;

    /// Open proposals whose head is `branch` (in `repo`'s owner namespace) and base is `base`.
    async fn list_open_proposals(
        &self,
        repo: &RepoRef,
        branch: &BranchName,
        base: &str,
    ) -> Result<Vec<ChangeProposal>, PromoteError>;

    async fn create_proposal(
        &self,
        repo: &RepoRef,
        proposal: &NewProposal,
    ) -> Result<ChangeProposal, PromoteError>;

    async fn get_proposal(&self, repo: &RepoRef, number: u64) -> Result<ChangeProposal, PromoteError>;

    /// All check runs attached to `sha`, across every check suite.
    async fn list_check_runs(
        &self,
        repo: &RepoRef,
        sha: &CommitSha,
    ) -> Result<Vec<CheckRun>, PromoteError>;

    /// Latest status per context on `sha`.
    async fn list_statuses(
        &self,
        repo: &RepoRef,
        sha: &CommitSha,
    ) -> Result<Vec<CommitStatus>, PromoteError>;

    /// Create-or-update the status for `status.context` on `sha`.
    async fn create_status(
        &self,
        repo: &RepoRef,
        sha: &CommitSha,
        status: &CommitStatus,
    ) -> Result<(), PromoteError>;

    /// Flip the release object for `tag` out of pre-release.
    async fn finalize_release(&self, repo: &RepoRef, tag: &ReleaseTag) -> Result<(), PromoteError>;
}

/// Operations reserved for the merge-privileged identity.
#[async_trait]
pub trait Reviewer: Identity {
    async fn approve(&self, repo: &RepoRef, number: u64, sha: &CommitSha) -> Result<(), PromoteError>;

    async fn list_reviews(&self, repo: &RepoRef, number: u64) -> Result<Vec<Review>, PromoteError>;

    /// Squash-merge pinned to `request.sha`. Returns the merge commit.
    async fn squash_merge(
        &self,
        repo: &RepoRef,
        request: &MergeRequest,
    ) -> Result<CommitSha, PromoteError>;
}
