use promote_core::fakes::{running_pods, FakeCluster, FakeHealth};
use promote_core::types::{DeploymentRef, PodPhase, RolloutProgress};
use promote_core::{abort_pair, AbortSignal, PollPolicy, PromoteError, RolloutPhase, RolloutState};
use promote_rollout::{RollbackController, RolloutController, RolloutSettings};

const OLD: &str = "registry.test/api:1.2.2";
const NEW: &str = "registry.test/api:1.2.3";

fn target() -> DeploymentRef {
    DeploymentRef {
        namespace: Some("payments".into()),
        name: "api".into(),
        container: "api".into(),
    }
}

fn settings(health_url: Option<&str>) -> RolloutSettings {
    RolloutSettings {
        progress: PollPolicy::new(10, 5),
        pods: PollPolicy::new(10, 5),
        health: PollPolicy::new(5, 4),
        health_url: health_url.map(str::to_owned),
        conflict_retries: 2,
    }
}

fn cluster() -> FakeCluster {
    FakeCluster::new("api", OLD, 4)
}

async fn roll(
    cluster: &FakeCluster,
    health: &FakeHealth,
    settings: RolloutSettings,
) -> (RolloutState, Result<(), PromoteError>) {
    let mut state = RolloutState::new(target(), NEW);
    let result = RolloutController::new(cluster, health, settings, AbortSignal::never())
        .apply_and_verify(&mut state)
        .await;
    (state, result)
}

fn rollback(cluster: &FakeCluster) -> RollbackController<'_, FakeCluster> {
    RollbackController::new(cluster, PollPolicy::new(10, 5), AbortSignal::never())
}

#[tokio::test(start_paused = true)]
async fn converged_rollout_walks_every_phase() {
    let cluster = cluster();
    let (state, result) = roll(&cluster, &FakeHealth::default(), settings(None)).await;

    result.unwrap();
    assert_eq!(
        state.transitions,
        vec![
            RolloutPhase::Applying,
            RolloutPhase::RollingOut,
            RolloutPhase::Verifying,
            RolloutPhase::Succeeded
        ]
    );
    assert_eq!(state.previous_image.as_deref(), Some(OLD));
    assert_eq!(state.revision_history, vec![1, 2]);
    assert_eq!(state.observed_pods.len(), 4);
    assert!(state.observed_pods.iter().all(|p| p.matches(NEW)));
    assert_eq!(cluster.current_image("api").as_deref(), Some(NEW));
    assert_eq!(cluster.calls_named("set_image"), 1);
}

#[tokio::test(start_paused = true)]
async fn plan_is_a_dry_run_that_stays_in_applying() {
    let cluster = cluster();
    let health = FakeHealth::default();
    let plan = RolloutController::new(&cluster, &health, settings(None), AbortSignal::never())
        .plan(&target(), NEW)
        .await
        .unwrap();

    assert_eq!(plan.current_image(), Some(OLD));
    assert_eq!(plan.predicted.image_of("api"), Some(NEW));
    assert!(!plan.is_noop());
    assert_eq!(plan.state.transitions, vec![RolloutPhase::Applying]);
    assert_eq!(cluster.current_image("api").as_deref(), Some(OLD));
    assert_eq!(cluster.calls_named("set_image_dry_run"), 1);
    assert_eq!(cluster.calls_named("set_image"), 0);
    assert_eq!(cluster.calls_named("list_pods"), 0);
}

#[tokio::test(start_paused = true)]
async fn resource_version_race_is_retried() {
    let cluster = cluster();
    cluster.state().pending_conflicts = 2;
    let (state, result) = roll(&cluster, &FakeHealth::default(), settings(None)).await;

    result.unwrap();
    assert_eq!(cluster.calls_named("set_image"), 3);
    assert_eq!(state.phase, RolloutPhase::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn exhausted_races_fail_before_anything_is_applied() {
    let cluster = cluster();
    cluster.state().pending_conflicts = 3;
    let (state, result) = roll(&cluster, &FakeHealth::default(), settings(None)).await;

    assert!(matches!(result, Err(PromoteError::Conflict { .. })));
    assert_eq!(state.phase, RolloutPhase::Failed);
    assert!(!state.was_applied());
    assert_eq!(cluster.current_image("api").as_deref(), Some(OLD));
}

#[tokio::test(start_paused = true)]
async fn rollout_that_never_completes_times_out() {
    let cluster = cluster();
    cluster.script_progress(vec![RolloutProgress {
        desired: 4,
        updated: 2,
        available: 4,
        stale: 2,
        observed_latest: true,
        stalled_reason: None,
    }]);
    let started = tokio::time::Instant::now();
    let (state, result) = roll(&cluster, &FakeHealth::default(), settings(None)).await;

    match result {
        Err(PromoteError::Timeout { attempts, last_observed, .. }) => {
            assert_eq!(attempts, 5);
            assert_eq!(last_observed, "2/4 updated, 4/4 available, 2 old");
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(started.elapsed().as_secs(), 40);
    assert_eq!(state.phase, RolloutPhase::Failed);
    assert!(state.was_applied());
    assert_eq!(cluster.calls_named("list_pods"), 0);
}

#[tokio::test(start_paused = true)]
async fn stalled_rollout_fails_without_waiting_out_the_budget() {
    let cluster = cluster();
    cluster.script_progress(vec![RolloutProgress {
        desired: 4,
        updated: 1,
        available: 4,
        stale: 1,
        observed_latest: true,
        stalled_reason: Some("ReplicaSet has timed out progressing.".into()),
    }]);
    let (_, result) = roll(&cluster, &FakeHealth::default(), settings(None)).await;

    assert!(matches!(result, Err(PromoteError::RolloutVerification { ref detail, .. }) if detail.contains("stalled")));
    assert_eq!(cluster.calls_named("rollout_progress"), 1);
}

#[tokio::test(start_paused = true)]
async fn three_of_four_pods_fails_then_rolls_back_to_prior_image() {
    let cluster = cluster();
    let mut mixed = running_pods("api-new", 3, NEW);
    mixed.extend(running_pods("api-old", 1, OLD));
    cluster.script_pods(vec![mixed]);
    cluster.script_pods_after_undo(vec![running_pods("api-old", 4, OLD)]);

    let (mut state, result) = roll(&cluster, &FakeHealth::default(), settings(None)).await;
    match result {
        Err(PromoteError::RolloutVerification { detail, .. }) => {
            assert!(detail.starts_with("3/4 pods on registry.test/api:1.2.3"));
            assert!(detail.contains("api-old-0=registry.test/api:1.2.2"));
        }
        other => panic!("expected verification failure, got {other:?}"),
    }
    assert_eq!(state.phase, RolloutPhase::Failed);
    // one mismatched pod keeps VERIFYING until the ceiling
    assert_eq!(cluster.calls_named("list_pods"), 5);

    rollback(&cluster).rollback(&mut state).await.unwrap();
    assert!(state.rolled_back);
    assert_eq!(cluster.calls_named("rollout_undo"), 1);
    assert_eq!(cluster.current_image("api").as_deref(), Some(OLD));
    assert_eq!(state.observed_pods.len(), 4);
    assert!(state.observed_pods.iter().all(|p| p.matches(OLD)));
}

#[tokio::test(start_paused = true)]
async fn empty_pod_list_never_verifies() {
    let cluster = cluster();
    cluster.script_pods(vec![Vec::new()]);
    let (state, result) = roll(&cluster, &FakeHealth::default(), settings(None)).await;

    assert!(matches!(result, Err(PromoteError::RolloutVerification { ref detail, .. }) if detail == "no pods observed"));
    assert_eq!(state.phase, RolloutPhase::Failed);
}

#[tokio::test(start_paused = true)]
async fn pending_pods_on_the_right_image_are_not_ready() {
    let cluster = cluster();
    let mut pods = running_pods("api", 4, NEW);
    pods[2].phase = PodPhase::Pending;
    cluster.script_pods(vec![pods, running_pods("api", 4, NEW)]);
    let (state, result) = roll(&cluster, &FakeHealth::default(), settings(None)).await;

    result.unwrap();
    assert_eq!(cluster.calls_named("list_pods"), 2);
    assert_eq!(state.phase, RolloutPhase::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn unhealthy_endpoint_fails_verification() {
    let cluster = cluster();
    let health = FakeHealth::new(vec![Some(503)]);
    let (state, result) = roll(&cluster, &health, settings(Some("https://api.test/healthz"))).await;

    assert!(matches!(result, Err(PromoteError::RolloutVerification { ref detail, .. }) if detail.contains("HTTP 503")));
    assert_eq!(health.probes(), 4);
    assert_eq!(state.phase, RolloutPhase::Failed);
    assert!(state.was_applied());
}

#[tokio::test(start_paused = true)]
async fn already_live_image_is_never_undone() {
    let cluster = FakeCluster::new("api", NEW, 4);
    let health = FakeHealth::new(vec![Some(503)]);
    let (mut state, result) = roll(&cluster, &health, settings(Some("https://api.test/healthz"))).await;

    assert!(matches!(result, Err(PromoteError::RolloutVerification { .. })));
    assert!(state.was_applied());
    assert!(!state.image_changed);
    assert!(!state.needs_rollback());
    assert!(cluster.state().history.is_empty());

    let err = rollback(&cluster).rollback(&mut state).await.unwrap_err();
    assert!(matches!(err, PromoteError::RollbackFailed { ref detail, .. } if detail.contains("already live")));
    assert_eq!(cluster.calls_named("rollout_undo"), 0);
    assert_eq!(cluster.current_image("api").as_deref(), Some(NEW));
    assert!(!state.rolled_back);
}

#[tokio::test(start_paused = true)]
async fn endpoint_that_recovers_passes() {
    let cluster = cluster();
    let health = FakeHealth::new(vec![None, Some(502), Some(200)]);
    let (state, result) = roll(&cluster, &health, settings(Some("https://api.test/healthz"))).await;

    result.unwrap();
    assert_eq!(health.probes(), 3);
    assert_eq!(state.phase, RolloutPhase::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn rollback_happens_at_most_once() {
    let cluster = cluster();
    cluster.script_progress(vec![RolloutProgress::default()]);
    let (mut state, result) = roll(&cluster, &FakeHealth::default(), settings(None)).await;
    assert!(result.is_err());

    let controller = rollback(&cluster);
    controller.rollback(&mut state).await.unwrap();
    let again = controller.rollback(&mut state).await.unwrap_err();
    assert!(matches!(again, PromoteError::RollbackFailed { .. }));
    assert_eq!(cluster.calls_named("rollout_undo"), 1);
}

#[tokio::test(start_paused = true)]
async fn first_deploy_cannot_roll_back() {
    let cluster = cluster();
    let mut state = RolloutState::new(target(), NEW);
    state.transition(RolloutPhase::RollingOut);
    state.transition(RolloutPhase::Failed);

    let err = rollback(&cluster).rollback(&mut state).await.unwrap_err();
    assert!(matches!(err, PromoteError::RollbackFailed { ref detail, .. } if detail.contains("no prior image")));
    assert_eq!(cluster.calls_named("rollout_undo"), 0);
}

#[tokio::test(start_paused = true)]
async fn rollback_that_does_not_verify_is_reported() {
    let cluster = cluster();
    cluster.script_pods(vec![running_pods("api", 4, OLD)]);
    // undo reported success but the pods never came back
    cluster.script_pods_after_undo(vec![running_pods("api", 4, NEW)]);
    let (mut state, result) = roll(&cluster, &FakeHealth::default(), settings(None)).await;
    assert!(result.is_err());

    let err = rollback(&cluster).rollback(&mut state).await.unwrap_err();
    assert!(matches!(err, PromoteError::RollbackFailed { .. }));
    assert!(state.rolled_back);
}

#[tokio::test(start_paused = true)]
async fn abort_leaves_the_phase_untouched() {
    let cluster = cluster();
    let (handle, signal) = abort_pair();
    handle.abort();
    let health = FakeHealth::default();
    let mut state = RolloutState::new(target(), NEW);
    let err = RolloutController::new(&cluster, &health, settings(None), signal)
        .apply_and_verify(&mut state)
        .await
        .unwrap_err();

    assert!(matches!(err, PromoteError::Aborted { .. }));
    assert_eq!(state.phase, RolloutPhase::RollingOut);
    assert_eq!(cluster.calls_named("rollout_progress"), 0);
}
