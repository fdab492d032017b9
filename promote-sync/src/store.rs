//! Environment descriptor store.
//!
//! ## Write protocol
//!
//! 1. `read` fetches the file at a ref and records its blob SHA plus a local
//!    SHA-256 digest of the content.
//! 2. [`DescriptorSnapshot::set_image_version`] is the only sanctioned
//!    mutation; it re-derives the expected digest.
//! 3. `write` recomputes the digest; a mismatch means the snapshot was edited
//!    behind our back and the write is refused before any API call.
//! 4. The blob SHA from step 1 goes to the API, which rejects the write if
//!    the remote file moved on. That surfaces as `PromoteError::Conflict`.

use promote_core::descriptor::{content_digest, EnvironmentDescriptor};
use promote_core::forge::SourceControl;
use promote_core::types::{BranchName, CommitSha, Environment, FileWrite, RepoRef};
use promote_core::PromoteError;

/// A descriptor as read from the configuration repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSnapshot {
    pub environment: Environment,
    pub path: String,
    /// Ref the file was read at.
    pub git_ref: String,
    /// Remote blob SHA at read time.
    pub blob_sha: String,
    /// Descriptor as originally read.
    pub original: EnvironmentDescriptor,
    pub descriptor: EnvironmentDescriptor,
    expected_digest: String,
}

impl DescriptorSnapshot {
    /// Rewrite `IMAGE_VERSION`. `NotFound` if the descriptor has none.
    pub fn set_image_version(&mut self, version: &str) -> Result<(), PromoteError> {
        let updated = self.descriptor.with_image_version(version)?;
        self.expected_digest = updated.digest();
        self.descriptor = updated;
        Ok(())
    }

    pub fn is_modified(&self) -> bool {
        self.descriptor != self.original
    }
}

pub struct DescriptorStore<'a, S: SourceControl> {
    forge: &'a S,
    repo: RepoRef,
}

impl<'a, S: SourceControl> DescriptorStore<'a, S> {
    pub fn new(forge: &'a S, repo: RepoRef) -> Self {
        Self { forge, repo }
    }

    /// Read the descriptor for `environment` at `git_ref`.
    pub async fn read(
        &self,
        environment: Environment,
        path: &str,
        git_ref: &str,
    ) -> Result<DescriptorSnapshot, PromoteError> {
        let file = self
            .forge
            .read_file(&self.repo, path, git_ref)
            .await
            .map_err(|e| match e {
                PromoteError::NotFound { .. } => PromoteError::not_found(format!(
                    "descriptor for {environment} at {path} ({git_ref})"
                )),
                other => other,
            })?;
        let descriptor = EnvironmentDescriptor::parse(&file.content);
        tracing::debug!(%environment, path, git_ref, blob = %file.sha, "read descriptor");
        Ok(DescriptorSnapshot {
            environment,
            path: path.to_string(),
            git_ref: git_ref.to_string(),
            blob_sha: file.sha,
            expected_digest: content_digest(&file.content),
            original: descriptor.clone(),
            descriptor,
        })
    }

    /// Conditionally write `snapshot` to `branch` as one commit.
    pub async fn write(
        &self,
        snapshot: &DescriptorSnapshot,
        branch: &BranchName,
        message: &str,
    ) -> Result<CommitSha, PromoteError> {
        let content = snapshot.descriptor.render();
        if content_digest(&content) != snapshot.expected_digest {
            return Err(PromoteError::conflict(format!(
                "descriptor {} was modified outside set_image_version",
                snapshot.path
            )));
        }
        let write = FileWrite {
            path: snapshot.path.clone(),
            branch: branch.clone(),
            message: message.to_string(),
            content,
            expected_sha: snapshot.blob_sha.clone(),
        };
        let commit = self.forge.write_file(&self.repo, &write).await?;
        tracing::info!(
            environment = %snapshot.environment,
            path = %snapshot.path,
            %branch,
            commit = %commit.short(),
            "descriptor committed"
        );
        Ok(commit)
    }
}
