#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use promote_core::types::{DeploymentRef, ImageUpdate};
use promote_core::{Cluster, PromoteError};
use promote_rollout::KubectlCluster;
use tempfile::TempDir;

/// A stand-in `kubectl` that logs its arguments and prints `stdout_file`,
/// or fails with `stderr` when given.
fn fake_kubectl(dir: &Path, stdout_file: &str, stderr: Option<&str>) -> (PathBuf, PathBuf) {
    let log = dir.join("args.log");
    let script = dir.join("kubectl");
    let fixture = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(stdout_file);
    let body = match stderr {
        None => format!(
            "#!/bin/sh\necho \"$@\" >> '{}'\ncat '{}'\n",
            log.display(),
            fixture.display()
        ),
        Some(msg) => format!(
            "#!/bin/sh\necho \"$@\" >> '{}'\necho '{}' >&2\nexit 1\n",
            log.display(),
            msg
        ),
    };
    fs::write(&script, body).expect("write script");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");
    (script, log)
}

fn target() -> DeploymentRef {
    DeploymentRef {
        namespace: Some("payments".into()),
        name: "api".into(),
        container: "api".into(),
    }
}

#[tokio::test]
async fn dry_run_patch_is_scoped_and_server_side() {
    let dir = TempDir::new().unwrap();
    let (script, log) = fake_kubectl(dir.path(), "deployment.json", None);
    let kubectl = KubectlCluster::new(Some("prod-east".into())).with_program(script.display().to_string());

    let predicted = kubectl
        .set_image(
            &target(),
            &ImageUpdate {
                container: "api".into(),
                image: "registry.test/api:1.2.3".into(),
                expected_resource_version: "48213".into(),
                dry_run: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(predicted.resource_version, "48213");

    let args = fs::read_to_string(log).unwrap();
    assert!(args.starts_with("--context prod-east --namespace payments patch deployment api"));
    assert!(args.contains("--type strategic"));
    assert!(args.contains(r#""resourceVersion":"48213""#));
    assert!(args.trim_end().ends_with("--dry-run=server"));
}

#[tokio::test]
async fn pods_are_listed_by_the_deployment_selector() {
    let dir = TempDir::new().unwrap();
    let (script, log) = fake_kubectl(dir.path(), "deployment.json", None);
    let kubectl = KubectlCluster::new(None).with_program(script.display().to_string());

    // The stand-in always prints the deployment, so only the invocation is checked.
    let _ = kubectl.list_pods(&target()).await;
    let args = fs::read_to_string(log).unwrap();
    let lines: Vec<&str> = args.lines().collect();
    assert_eq!(lines[0], "--namespace payments get deployment api -o json");
    assert_eq!(lines[1], "--namespace payments get pods -l app=api,tier=backend -o json");
}

#[tokio::test]
async fn undo_targets_the_deployment() {
    let dir = TempDir::new().unwrap();
    let (script, log) = fake_kubectl(dir.path(), "deployment.json", None);
    let kubectl = KubectlCluster::new(None).with_program(script.display().to_string());

    kubectl.rollout_undo(&target()).await.unwrap();
    assert_eq!(
        fs::read_to_string(log).unwrap().trim(),
        "--namespace payments rollout undo deployment/api"
    );
}

#[tokio::test]
async fn server_conflict_surfaces_as_conflict() {
    let dir = TempDir::new().unwrap();
    let (script, _) = fake_kubectl(
        dir.path(),
        "deployment.json",
        Some("Error from server (Conflict): Operation cannot be fulfilled on deployments.apps api: the object has been modified"),
    );
    let kubectl = KubectlCluster::new(None).with_program(script.display().to_string());

    let err = kubectl
        .set_image(
            &target(),
            &ImageUpdate {
                container: "api".into(),
                image: "registry.test/api:1.2.3".into(),
                expected_resource_version: "1".into(),
                dry_run: false,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PromoteError::Conflict { .. }));
}

#[tokio::test]
async fn missing_binary_is_a_cluster_error() {
    let kubectl = KubectlCluster::new(None).with_program("/nonexistent/kubectl");
    let err = kubectl.deployment(&target()).await.unwrap_err();
    assert!(matches!(err, PromoteError::Cluster(ref m) if m.contains("/nonexistent/kubectl")));
}
