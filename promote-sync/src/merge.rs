//! Merge gate: scoped approval plus a squash merge pinned to the checked SHA.
//!
//! The gate only accepts a [`Reviewer`] (the merge-privileged identity) and a
//! [`ChecksPassed`] witness, so it cannot run before checks pass or with the
//! triggering credential. Rejections are reported once; nothing here retries.

use promote_core::forge::{Reviewer, SourceControl};
use promote_core::types::{CommitSha, MergeRequest, ProposalState, RepoRef};
use promote_core::PromoteError;

use crate::checks::ChecksPassed;

pub struct MergeGate<'a, R: Reviewer, S: SourceControl> {
    reviewer: &'a R,
    source: &'a S,
    repo: RepoRef,
}

impl<'a, R: Reviewer, S: SourceControl> MergeGate<'a, R, S> {
    pub fn new(reviewer: &'a R, source: &'a S, repo: RepoRef) -> Self {
        Self {
            reviewer,
            source,
            repo,
        }
    }

    /// Approve, then squash-merge. Returns the merge commit.
    pub async fn approve_and_merge(
        &self,
        passed: &ChecksPassed,
        commit_title: &str,
        commit_message: &str,
    ) -> Result<CommitSha, PromoteError> {
        let number = passed.proposal_number();
        let sha = passed.head_sha();
        let approval = |reason: String| PromoteError::Approval { number, reason };
        let merge = |reason: String| PromoteError::Merge { number, reason };

        // (a) distinct identities; a reused proposal may have been opened by anyone
        let opener = self.source.whoami().await?;
        let approver = self.reviewer.whoami().await?;
        if opener.eq_ignore_ascii_case(&approver) {
            return Err(approval(format!(
                "approver '{approver}' is the same identity that opened the proposal"
            )));
        }
        let opened = self
            .source
            .get_proposal(&self.repo, number)
            .await
            .map_err(|e| approval(e.to_string()))?;
        if opened.author.eq_ignore_ascii_case(&approver) {
            return Err(approval(format!(
                "approver '{approver}' authored proposal #{number}"
            )));
        }

        // (b) approve and confirm the review landed
        self.reviewer
            .approve(&self.repo, number, sha)
            .await
            .map_err(|e| approval(e.to_string()))?;
        let reviews = self
            .reviewer
            .list_reviews(&self.repo, number)
            .await
            .map_err(|e| approval(e.to_string()))?;
        if !reviews
            .iter()
            .any(|r| r.is_approval() && r.login.eq_ignore_ascii_case(&approver))
        {
            return Err(approval(format!("no APPROVED review from '{approver}' recorded")));
        }
        tracing::info!(number, %approver, sha = %sha.short(), "proposal approved");

        // (c) the head must still be the one whose checks passed
        let current = self
            .source
            .get_proposal(&self.repo, number)
            .await
            .map_err(|e| merge(e.to_string()))?;
        if current.state != ProposalState::Open {
            return Err(merge(format!("proposal is {}", current.state)));
        }
        if &current.head_sha != sha {
            return Err(merge(format!(
                "stale head: checks passed on {} but head is now {}",
                sha.short(),
                current.head_sha.short()
            )));
        }

        // (d) squash merge pinned to that SHA
        let request = MergeRequest {
            number,
            sha: sha.clone(),
            commit_title: commit_title.to_string(),
            commit_message: commit_message.to_string(),
        };
        let merged = self
            .reviewer
            .squash_merge(&self.repo, &request)
            .await
            .map_err(|e| merge(e.to_string()))?;
        tracing::info!(number, merge_commit = %merged.short(), "proposal squash-merged");
        Ok(merged)
    }
}
