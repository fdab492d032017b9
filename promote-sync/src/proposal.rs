//! Change proposal manager: release branch + descriptor commit + pull request.
//!
//! ## `open_or_update` sequence
//!
//! 1. Read the base branch head.
//! 2. Read the descriptor at that head and rewrite `IMAGE_VERSION`.
//! 3. Create the release branch at the base head, or force-move it there.
//! 4. Commit the descriptor on the branch (exactly one commit).
//! 5. List open proposals for the branch: create if none, reuse if one,
//!    fail if several.
//! 6. Re-list and require exactly one.
//!
//! A conflict in step 3 or 4 restarts from step 1, at most
//! `conflict_retries` times.

use promote_core::forge::SourceControl;
use promote_core::types::{BranchName, ChangeProposal, CommitSha, NewProposal, Release, RepoRef};
use promote_core::PromoteError;
use promote_renderer::{ProposalContext, Renderer};

use crate::store::{DescriptorSnapshot, DescriptorStore};

/// Where descriptors live and how hard to retry.
#[derive(Debug, Clone)]
pub struct ProposalSettings {
    pub source_repo: RepoRef,
    pub config_repo: RepoRef,
    pub base_branch: String,
    pub descriptor_path: String,
    pub conflict_retries: u32,
}

/// Result of a successful upsert.
#[derive(Debug, Clone)]
pub struct ProposalUpdate {
    pub proposal: ChangeProposal,
    /// Commit carrying the descriptor change on the release branch.
    pub commit: CommitSha,
    pub snapshot: DescriptorSnapshot,
    /// `true` when an already-open proposal was reused.
    pub reused: bool,
    /// Conflicts absorbed before the write landed.
    pub conflicts: u32,
}

pub struct ProposalManager<'a, S: SourceControl> {
    forge: &'a S,
    renderer: &'a Renderer,
    settings: ProposalSettings,
}

impl<'a, S: SourceControl> ProposalManager<'a, S> {
    pub fn new(forge: &'a S, renderer: &'a Renderer, settings: ProposalSettings) -> Self {
        Self {
            forge,
            renderer,
            settings,
        }
    }

    pub fn settings(&self) -> &ProposalSettings {
        &self.settings
    }

    /// Idempotently bring the release branch and its proposal up to date.
    pub async fn open_or_update(&self, release: &Release) -> Result<ProposalUpdate, PromoteError> {
        let branch = release.branch();
        let mut conflicts = 0u32;
        let (snapshot, commit) = loop {
            match self.commit_descriptor(release, &branch).await {
                Ok(done) => break done,
                Err(PromoteError::Conflict { what }) if conflicts < self.settings.conflict_retries => {
                    conflicts += 1;
                    tracing::warn!(
                        %branch,
                        attempt = conflicts,
                        max = self.settings.conflict_retries,
                        %what,
                        "descriptor changed concurrently; re-reading from base"
                    );
                }
                Err(PromoteError::Conflict { what }) => {
                    return Err(PromoteError::conflict(format!(
                        "{what} (gave up after {conflicts} retries)"
                    )));
                }
                Err(other) => return Err(other),
            }
        };

        let (proposal, reused) = self.upsert_proposal(release, &branch, &snapshot).await?;
        let proposal = self.confirm_single(&branch).await.map(|confirmed| {
            if confirmed.number != proposal.number {
                tracing::warn!(
                    expected = proposal.number,
                    found = confirmed.number,
                    "open proposal changed between upsert and confirmation"
                );
            }
            confirmed
        })?;
        tracing::info!(
            %branch,
            number = proposal.number,
            url = %proposal.url,
            reused,
            "change proposal ready"
        );
        Ok(ProposalUpdate {
            proposal,
            commit,
            snapshot,
            reused,
            conflicts,
        })
    }

    /// Steps 1–4: one descriptor commit on a branch rooted at the base head.
    async fn commit_descriptor(
        &self,
        release: &Release,
        branch: &BranchName,
    ) -> Result<(DescriptorSnapshot, CommitSha), PromoteError> {
        let repo = &self.settings.config_repo;
        let base = BranchName::from(self.settings.base_branch.as_str());
        let base_head = self
            .forge
            .branch_head(repo, &base)
            .await?
            .ok_or_else(|| PromoteError::not_found(format!("base branch {base}")))?;

        let store = DescriptorStore::new(self.forge, repo.clone());
        let mut snapshot = store
            .read(release.environment, &self.settings.descriptor_path, &base_head.0)
            .await?;
        snapshot.set_image_version(&release.tag.0)?;

        match self.forge.branch_head(repo, branch).await? {
            Some(_) => self.forge.force_update_branch(repo, branch, &base_head).await?,
            None => match self.forge.create_branch(repo, branch, &base_head).await {
                Ok(()) => {}
                // Another run created it between our check and create.
                Err(PromoteError::Conflict { .. }) => {
                    self.forge.force_update_branch(repo, branch, &base_head).await?
                }
                Err(e) => return Err(e),
            },
        }

        let ctx = self.context(release, &snapshot);
        let message = self.renderer.commit_message(&ctx)?;
        let commit = store.write(&snapshot, branch, &message).await?;
        Ok((snapshot, commit))
    }

    async fn upsert_proposal(
        &self,
        release: &Release,
        branch: &BranchName,
        snapshot: &DescriptorSnapshot,
    ) -> Result<(ChangeProposal, bool), PromoteError> {
        let repo = &self.settings.config_repo;
        let open = self
            .forge
            .list_open_proposals(repo, branch, &self.settings.base_branch)
            .await?;
        match open.len() {
            0 => {
                let ctx = self.context(release, snapshot);
                let new = NewProposal {
                    title: self.renderer.proposal_title(&ctx)?,
                    body: self.renderer.proposal_body(&ctx)?,
                    head: branch.clone(),
                    base: self.settings.base_branch.clone(),
                };
                match self.forge.create_proposal(repo, &new).await {
                    Ok(created) => Ok((created, false)),
                    // 422 "already exists": a concurrent run won; confirmation re-lists.
                    Err(PromoteError::Api { status: Some(422), message }) => {
                        tracing::warn!(%branch, %message, "proposal creation raced");
                        let existing = self.confirm_single(branch).await?;
                        Ok((existing, true))
                    }
                    Err(e) => Err(e),
                }
            }
            1 => Ok((open.into_iter().next().ok_or_else(|| missing(branch))?, true)),
            count => Err(ambiguous(branch, &open, count)),
        }
    }

    /// Exactly one open proposal must target `branch`.
    pub async fn confirm_single(&self, branch: &BranchName) -> Result<ChangeProposal, PromoteError> {
        let open = self
            .forge
            .list_open_proposals(&self.settings.config_repo, branch, &self.settings.base_branch)
            .await?;
        match open.len() {
            0 => Err(missing(branch)),
            1 => open.into_iter().next().ok_or_else(|| missing(branch)),
            count => Err(ambiguous(branch, &open, count)),
        }
    }

    fn context(&self, release: &Release, snapshot: &DescriptorSnapshot) -> ProposalContext {
        ProposalContext::new(
            release,
            &self.settings.source_repo,
            &self.settings.descriptor_path,
            &snapshot.original,
        )
    }
}

fn missing(branch: &BranchName) -> PromoteError {
    PromoteError::MissingProposal {
        branch: branch.to_string(),
    }
}

fn ambiguous(branch: &BranchName, open: &[ChangeProposal], count: usize) -> PromoteError {
    PromoteError::AmbiguousProposal {
        branch: branch.to_string(),
        count,
        urls: open.iter().map(|p| p.url.clone()).collect(),
    }
}
