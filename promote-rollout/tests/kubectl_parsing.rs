use promote_core::types::PodPhase;
use promote_rollout::kubectl::{parse_pods, DeploymentObject};

const DEPLOYMENT: &str = include_str!("fixtures/deployment.json");
const STALLED: &str = include_str!("fixtures/deployment_stalled.json");
const PODS: &str = include_str!("fixtures/pods.json");

#[test]
fn snapshot_reads_version_revision_and_containers() {
    let snapshot = DeploymentObject::parse(DEPLOYMENT.as_bytes()).unwrap().snapshot();
    assert_eq!(snapshot.name, "api");
    assert_eq!(snapshot.resource_version, "48213");
    assert_eq!(snapshot.revision, Some(12));
    assert_eq!(snapshot.image_of("api"), Some("registry.test/api:1.2.2"));
    assert_eq!(snapshot.image_of("envoy"), Some("envoyproxy/envoy:v1.29"));
    assert_eq!(snapshot.image_of("missing"), None);
}

#[test]
fn mid_rollout_progress_is_incomplete() {
    let progress = DeploymentObject::parse(DEPLOYMENT.as_bytes()).unwrap().progress();
    assert_eq!(progress.desired, 4);
    assert_eq!(progress.updated, 3);
    assert_eq!(progress.available, 4);
    assert_eq!(progress.stale, 2);
    assert!(progress.observed_latest);
    assert!(progress.stalled_reason.is_none());
    assert!(!progress.is_complete());
    assert_eq!(progress.to_string(), "3/4 updated, 4/4 available, 2 old");
}

#[test]
fn progress_deadline_is_reported_as_stalled() {
    let progress = DeploymentObject::parse(STALLED.as_bytes()).unwrap().progress();
    assert_eq!(
        progress.stalled_reason.as_deref(),
        Some("ReplicaSet \"api-7d9f\" has timed out progressing.")
    );
}

#[test]
fn selector_is_sorted_match_labels() {
    let deployment = DeploymentObject::parse(DEPLOYMENT.as_bytes()).unwrap();
    assert_eq!(deployment.selector().as_deref(), Some("app=api,tier=backend"));
}

#[test]
fn pods_report_the_release_container_image_and_phase() {
    let pods = parse_pods(PODS.as_bytes(), "api").unwrap();
    assert_eq!(pods.len(), 4);
    assert!(pods[0].matches("registry.test/api:1.2.3"));
    assert_eq!(pods[1].phase, PodPhase::Pending);
    assert!(!pods[1].matches("registry.test/api:1.2.3"));
    assert_eq!(pods[2].image.as_deref(), Some("registry.test/api:1.2.2"));
    assert_eq!(pods[3].image, None);
    assert_eq!(pods[3].phase, PodPhase::Unknown);
}

#[test]
fn terminating_and_evicted_pods_are_not_counted() {
    let json = r#"{ "items": [
        { "metadata": { "name": "api-new-a" },
          "spec": { "containers": [{ "name": "api", "image": "registry.test/api:1.2.3" }] },
          "status": { "phase": "Running" } },
        { "metadata": { "name": "api-old-b", "deletionTimestamp": "2026-10-16T09:00:00Z" },
          "spec": { "containers": [{ "name": "api", "image": "registry.test/api:1.2.2" }] },
          "status": { "phase": "Running" } },
        { "metadata": { "name": "api-old-c" },
          "spec": { "containers": [{ "name": "api", "image": "registry.test/api:1.2.2" }] },
          "status": { "phase": "Failed", "reason": "Evicted" } }
    ] }"#;
    let pods = parse_pods(json.as_bytes(), "api").unwrap();
    assert_eq!(pods.len(), 1);
    assert_eq!(pods[0].pod_id, "api-new-a");
    assert!(pods[0].matches("registry.test/api:1.2.3"));
}

#[test]
fn garbage_output_is_a_decode_error() {
    let err = DeploymentObject::parse(b"error: the server doesn't have a resource type").unwrap_err();
    assert!(err.to_string().contains("deployment"));
}
