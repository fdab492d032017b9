//! Read-only descriptor plan for `promote plan`.

use similar::TextDiff;

use promote_core::forge::SourceControl;
use promote_core::types::{BranchName, Environment, ReleaseTag, RepoRef};
use promote_core::{EnvironmentDescriptor, PromoteError};

use crate::store::DescriptorStore;

/// What the descriptor commit would change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorPlan {
    pub path: String,
    pub current_version: Option<String>,
    pub desired_version: String,
    /// Updated descriptor, for deriving the rollout target.
    pub updated: EnvironmentDescriptor,
    /// Empty when the descriptor already carries the tag.
    pub unified_diff: String,
}

impl DescriptorPlan {
    pub fn is_noop(&self) -> bool {
        self.unified_diff.is_empty()
    }
}

/// Unified diff between two descriptor texts, `a/<path>` → `b/<path>`.
pub fn descriptor_diff(path: &str, before: &str, after: &str) -> String {
    if before == after {
        return String::new();
    }
    let old_header = format!("a/{path}");
    let new_header = format!("b/{path}");
    TextDiff::from_lines(before, after)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string()
}

/// Read the descriptor at the head of `base` and describe the change a
/// release of `tag` would make. Writes nothing.
pub async fn plan_descriptor<S: SourceControl>(
    forge: &S,
    repo: &RepoRef,
    base: &str,
    environment: Environment,
    path: &str,
    tag: &ReleaseTag,
) -> Result<DescriptorPlan, PromoteError> {
    let head = forge
        .branch_head(repo, &BranchName::from(base))
        .await?
        .ok_or_else(|| PromoteError::not_found(format!("base branch {base}")))?;
    let store = DescriptorStore::new(forge, repo.clone());
    let mut snapshot = store.read(environment, path, &head.0).await?;
    let current_version = snapshot.descriptor.image_version().map(str::to_owned);
    snapshot.set_image_version(&tag.0)?;
    Ok(DescriptorPlan {
        path: path.to_string(),
        current_version,
        desired_version: tag.0.clone(),
        unified_diff: descriptor_diff(path, &snapshot.original.render(), &snapshot.descriptor.render()),
        updated: snapshot.descriptor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_has_headers_and_hunk() {
        let diff = descriptor_diff(
            "envs/prod.env",
            "IMAGE_NAME=api\nIMAGE_VERSION=1.2.2\n",
            "IMAGE_NAME=api\nIMAGE_VERSION=1.2.3\n",
        );
        assert!(diff.contains("--- a/envs/prod.env"));
        assert!(diff.contains("+++ b/envs/prod.env"));
        assert!(diff.contains("@@"));
        assert!(diff.contains("-IMAGE_VERSION=1.2.2"));
        assert!(diff.contains("+IMAGE_VERSION=1.2.3"));
        assert!(diff.contains(" IMAGE_NAME=api"));
    }

    #[test]
    fn identical_text_has_empty_diff() {
        assert!(descriptor_diff("x", "A=1\n", "A=1\n").is_empty());
    }
}
