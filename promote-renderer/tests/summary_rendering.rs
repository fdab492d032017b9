use chrono::{Duration, TimeZone, Utc};
use promote_core::outcome::{
    FailureDetail, MergeRecord, Outcome, RolloutPhase, RolloutState, Step, StepResult,
    TerminalStatus, TraceEntry,
};
use promote_core::types::{
    BranchName, ChangeProposal, CommitSha, DeploymentRef, Environment, PodObservation, PodPhase,
    ProposalState, Release, ReleaseTag, RepoRef,
};
use promote_core::EnvironmentDescriptor;
use promote_renderer::{ProposalContext, Renderer};
use tempfile::TempDir;

fn release() -> Release {
    Release {
        tag: ReleaseTag::from("1.2.3"),
        commit: CommitSha::from("89abcdef01234567"),
        environment: Environment::Prod,
        skip_merge: false,
        delete_branch: true,
        finalize: false,
    }
}

fn rolled_back_outcome() -> Outcome {
    let started = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let mut rollout = RolloutState::new(
        DeploymentRef {
            namespace: Some("api".into()),
            name: "api-server".into(),
            container: "api".into(),
        },
        "registry/api:1.2.3",
    );
    rollout.previous_image = Some("registry/api:1.2.2".into());
    rollout.transition(RolloutPhase::RollingOut);
    rollout.transition(RolloutPhase::Verifying);
    rollout.transition(RolloutPhase::Failed);
    rollout.rolled_back = true;
    rollout.observed_pods = vec![PodObservation {
        pod_id: "api-server-1".into(),
        image: Some("registry/api:1.2.2".into()),
        phase: PodPhase::Running,
    }];

    Outcome {
        release: release(),
        status: TerminalStatus::RolloutFailedRolledBack,
        proposal: Some(ChangeProposal {
            number: 12,
            url: "https://github.com/acme/infra/pull/12".into(),
            branch: BranchName::from("release/prod/1.2.3"),
            base_branch: "main".into(),
            head_sha: CommitSha::from("head"),
            state: ProposalState::Merged,
            author: "ci-user".into(),
        }),
        merge: MergeRecord::Merged {
            sha: CommitSha::from("feedface00"),
        },
        rollout: Some(rollout),
        failure: Some(FailureDetail {
            step: Step::Rollout,
            error: "rollout verification failed".into(),
            last_observed: Some("3/4 pods on registry/api:1.2.3".into()),
        }),
        trace: vec![TraceEntry {
            at: started + Duration::seconds(5),
            step: Step::Merge,
            result: StepResult::Ok,
            detail: "squash-merged | feedfac".into(),
        }],
        started_at: started,
        finished_at: started + Duration::seconds(95),
    }
}

#[test]
fn summary_reports_status_merge_and_rollback() {
    let summary = Renderer::new().unwrap().summary(&rolled_back_outcome()).unwrap();

    assert!(summary.contains("Release `1.2.3` → PROD: **ROLLOUT_FAILED_ROLLED_BACK**"), "{summary}");
    assert!(summary.contains("[#12](https://github.com/acme/infra/pull/12)"));
    assert!(summary.contains("merged (`feedfac`)"));
    assert!(summary.contains("APPLYING → ROLLING_OUT → VERIFYING → FAILED"));
    assert!(summary.contains("Rolled back: yes"));
    assert!(summary.contains("| `api-server-1` | `registry/api:1.2.2` | Running |"));
    assert!(summary.contains("Last observed: 3/4 pods on registry/api:1.2.3"));
    assert!(summary.contains("| 10:00:05 | merge | ok | squash-merged \\| feedfac |"));
    assert!(summary.contains("| Duration | 95s |"));
}

#[test]
fn summary_without_rollout_or_failure_omits_those_sections() {
    let mut outcome = rolled_back_outcome();
    outcome.status = TerminalStatus::Succeeded;
    outcome.merge = MergeRecord::Skipped;
    outcome.rollout = None;
    outcome.failure = None;

    let summary = Renderer::new().unwrap().summary(&outcome).unwrap();
    assert!(summary.contains(":white_check_mark:"));
    assert!(summary.contains("| Merge | skipped |"));
    assert!(!summary.contains("### Rollout"));
    assert!(!summary.contains("### Failure"));
}

#[test]
fn override_directory_replaces_embedded_template() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(
        dir.path().join("proposal_title.tera"),
        "[deploy] {{ environment }} {{ tag }}\n",
    )
    .expect("write");
    std::fs::write(dir.path().join("notes.txt"), "ignored").expect("write");

    let renderer = Renderer::with_overrides(Some(dir.path())).expect("renderer");
    let ctx = ProposalContext::new(
        &release(),
        &RepoRef::new("acme", "api"),
        "envs/prod.env",
        &EnvironmentDescriptor::parse("IMAGE_VERSION=1.2.2\n"),
    );
    assert_eq!(renderer.proposal_title(&ctx).unwrap(), "[deploy] prod 1.2.3");
    // Non-overridden templates keep their defaults.
    assert_eq!(
        renderer.commit_message(&ctx).unwrap(),
        "Update PROD (envs/prod.env) with image tag 1.2.3"
    );
}

#[test]
fn missing_override_directory_is_not_an_error() {
    let dir = TempDir::new().expect("tempdir");
    let missing = dir.path().join("nope");
    Renderer::with_overrides(Some(&missing)).expect("missing dir falls back to embedded");
}
