#![allow(dead_code)]

use std::time::Duration;

use promote_core::fakes::FakeForge;
use promote_core::types::{CommitSha, Environment, Release, RepoRef};
use promote_core::{AbortSignal, PollPolicy};
use promote_renderer::Renderer;
use promote_sync::{CheckSettings, CheckSync, ProposalManager, ProposalSettings, ProposalUpdate};

pub const DESCRIPTOR_PATH: &str = "envs/prod.env";
pub const DESCRIPTOR: &str = "# production\nDEPLOYMENT_NAME=api\nNAME=api\nIMAGE_NAME=registry.test/api\nIMAGE_VERSION=1.2.2\nREPLICAS=4\n";
pub const RELEASE_COMMIT: &str = "c0ffee0000000000000000000000000000000001";

pub fn source_repo() -> RepoRef {
    RepoRef::new("acme", "api")
}

pub fn config_repo() -> RepoRef {
    RepoRef::new("acme", "deploy-config")
}

pub fn release(tag: &str) -> Release {
    Release {
        tag: tag.into(),
        commit: CommitSha::from(RELEASE_COMMIT),
        environment: Environment::Prod,
        skip_merge: false,
        delete_branch: false,
        finalize: false,
    }
}

/// Forge with `main` carrying the prod descriptor, logged in as `ci-user`.
pub fn forge() -> FakeForge {
    let forge = FakeForge::new("ci-user");
    forge.seed_branch("main", &[(DESCRIPTOR_PATH, DESCRIPTOR)]);
    forge.seed_tag("1.2.3", RELEASE_COMMIT);
    forge
}

pub fn proposal_settings(conflict_retries: u32) -> ProposalSettings {
    ProposalSettings {
        source_repo: source_repo(),
        config_repo: config_repo(),
        base_branch: "main".into(),
        descriptor_path: DESCRIPTOR_PATH.into(),
        conflict_retries,
    }
}

pub fn check_settings(required: &[&str], attempts: u32) -> CheckSettings {
    CheckSettings {
        source_repo: source_repo(),
        config_repo: config_repo(),
        required: required.iter().map(|s| s.to_string()).collect(),
        settle: Duration::from_secs(5),
        policy: PollPolicy::new(10, attempts),
    }
}

pub async fn open_proposal(forge: &FakeForge, release: &Release) -> ProposalUpdate {
    let renderer = Renderer::new().expect("renderer");
    ProposalManager::new(forge, &renderer, proposal_settings(3))
        .open_or_update(release)
        .await
        .expect("open proposal")
}

pub fn check_sync<'a>(forge: &'a FakeForge, required: &[&str], attempts: u32) -> CheckSync<'a, FakeForge> {
    CheckSync::new(forge, check_settings(required, attempts), AbortSignal::never())
}
