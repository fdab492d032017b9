//! [`Cluster`] over the `kubectl` binary.
//!
//! Every call shells out once and parses `-o json` output. The image update
//! is a strategic-merge patch that carries the resourceVersion it was
//! computed against, so the API server rejects it with a conflict if the
//! deployment moved on in between.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;

use promote_core::types::{
    ContainerImage, DeploymentRef, DeploymentSnapshot, ImageUpdate, PodObservation, PodPhase,
    RolloutProgress,
};
use promote_core::{Cluster, PromoteError};

use crate::error::KubectlError;

const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ObjectMeta {
    name: String,
    resource_version: String,
    generation: i64,
    annotations: BTreeMap<String, String>,
    deletion_timestamp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LabelSelector {
    match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContainerWire {
    name: String,
    image: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PodSpec {
    containers: Vec<ContainerWire>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PodTemplate {
    spec: PodSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DeploymentSpec {
    replicas: Option<u32>,
    selector: LabelSelector,
    template: PodTemplate,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Condition {
    #[serde(rename = "type")]
    kind: String,
    reason: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DeploymentStatus {
    observed_generation: i64,
    replicas: u32,
    updated_replicas: u32,
    available_replicas: u32,
    conditions: Vec<Condition>,
}

/// The subset of a `Deployment` object the controller reads.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeploymentObject {
    metadata: ObjectMeta,
    spec: DeploymentSpec,
    status: DeploymentStatus,
}

impl DeploymentObject {
    pub fn parse(bytes: &[u8]) -> Result<Self, KubectlError> {
        serde_json::from_slice(bytes).map_err(|source| KubectlError::Decode {
            what: "deployment",
            source,
        })
    }

    pub fn snapshot(&self) -> DeploymentSnapshot {
        DeploymentSnapshot {
            name: self.metadata.name.clone(),
            resource_version: self.metadata.resource_version.clone(),
            revision: self
                .metadata
                .annotations
                .get(REVISION_ANNOTATION)
                .and_then(|r| r.parse().ok()),
            containers: self
                .spec
                .template
                .spec
                .containers
                .iter()
                .map(|c| ContainerImage {
                    name: c.name.clone(),
                    image: c.image.clone(),
                })
                .collect(),
        }
    }

    pub fn progress(&self) -> RolloutProgress {
        let status = &self.status;
        let stalled_reason = status
            .conditions
            .iter()
            .find(|c| {
                c.kind == "Progressing" && c.reason.as_deref() == Some("ProgressDeadlineExceeded")
            })
            .map(|c| {
                c.message
                    .clone()
                    .unwrap_or_else(|| "progress deadline exceeded".to_string())
            });
        RolloutProgress {
            desired: self.spec.replicas.unwrap_or(1),
            updated: status.updated_replicas,
            available: status.available_replicas,
            stale: status.replicas.saturating_sub(status.updated_replicas),
            observed_latest: status.observed_generation >= self.metadata.generation,
            stalled_reason,
        }
    }

    /// `matchLabels` as a `-l` argument.
    pub fn selector(&self) -> Option<String> {
        let labels = &self.spec.selector.match_labels;
        if labels.is_empty() {
            return None;
        }
        Some(
            labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PodStatus {
    phase: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PodWire {
    metadata: ObjectMeta,
    spec: PodSpec,
    status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PodList {
    items: Vec<PodWire>,
}

/// Pods from `kubectl get pods -o json`, with the image of `container`.
/// Terminating and evicted pods are dropped.
pub fn parse_pods(bytes: &[u8], container: &str) -> Result<Vec<PodObservation>, KubectlError> {
    let list: PodList = serde_json::from_slice(bytes).map_err(|source| KubectlError::Decode {
        what: "pod list",
        source,
    })?;
    Ok(list
        .items
        .into_iter()
        .filter(|pod| {
            pod.metadata.deletion_timestamp.is_none() && pod.status.phase.as_deref() != Some("Failed")
        })
        .map(|pod| PodObservation {
            image: pod
                .spec
                .containers
                .iter()
                .find(|c| c.name == container)
                .map(|c| c.image.clone()),
            phase: pod
                .status
                .phase
                .as_deref()
                .map(|p| p.parse().unwrap_or(PodPhase::Unknown))
                .unwrap_or(PodPhase::Unknown),
            pod_id: pod.metadata.name,
        })
        .collect())
}

/// Strategic-merge patch setting one container's image, pinned to `resource_version`.
pub fn image_patch(container: &str, image: &str, resource_version: &str) -> serde_json::Value {
    json!({
        "metadata": { "resourceVersion": resource_version },
        "spec": { "template": { "spec": { "containers": [
            { "name": container, "image": image }
        ] } } }
    })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct KubectlCluster {
    program: String,
    context: Option<String>,
}

impl KubectlCluster {
    pub fn new(context: Option<String>) -> Self {
        Self {
            program: "kubectl".to_string(),
            context,
        }
    }

    /// Use a different binary (a wrapper script, or a fixture in tests).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn scoped_args(&self, target: &DeploymentRef) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ctx) = &self.context {
            args.push("--context".to_string());
            args.push(ctx.clone());
        }
        if let Some(ns) = &target.namespace {
            args.push("--namespace".to_string());
            args.push(ns.clone());
        }
        args
    }

    async fn run(&self, target: &DeploymentRef, args: &[&str]) -> Result<Vec<u8>, KubectlError> {
        let mut full = self.scoped_args(target);
        full.extend(args.iter().map(|a| a.to_string()));
        tracing::debug!(program = %self.program, args = %full.join(" "), "kubectl");

        let output = Command::new(&self.program)
            .args(&full)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| KubectlError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if output.status.success() {
            return Ok(output.stdout);
        }
        Err(KubectlError::Failed {
            args: full.join(" "),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn get_deployment(&self, target: &DeploymentRef) -> Result<DeploymentObject, KubectlError> {
        let out = self
            .run(target, &["get", "deployment", &target.name, "-o", "json"])
            .await?;
        DeploymentObject::parse(&out)
    }
}

#[async_trait]
impl Cluster for KubectlCluster {
    async fn deployment(&self, target: &DeploymentRef) -> Result<DeploymentSnapshot, PromoteError> {
        Ok(self.get_deployment(target).await?.snapshot())
    }

    async fn set_image(
        &self,
        target: &DeploymentRef,
        update: &ImageUpdate,
    ) -> Result<DeploymentSnapshot, PromoteError> {
        let patch = image_patch(&update.container, &update.image, &update.expected_resource_version)
            .to_string();
        let mut args = vec![
            "patch",
            "deployment",
            target.name.as_str(),
            "--type",
            "strategic",
            "--patch",
            patch.as_str(),
            "-o",
            "json",
        ];
        if update.dry_run {
            args.push("--dry-run=server");
        }
        let out = self.run(target, &args).await?;
        let patched = DeploymentObject::parse(&out)?.snapshot();
        if patched.image_of(&update.container).is_none() {
            return Err(PromoteError::not_found(format!(
                "container {} in deployment {}",
                update.container, target.name
            )));
        }
        Ok(patched)
    }

    async fn rollout_progress(&self, target: &DeploymentRef) -> Result<RolloutProgress, PromoteError> {
        Ok(self.get_deployment(target).await?.progress())
    }

    async fn list_pods(&self, target: &DeploymentRef) -> Result<Vec<PodObservation>, PromoteError> {
        let deployment = self.get_deployment(target).await?;
        let selector = deployment.selector().ok_or_else(|| {
            PromoteError::Cluster(format!("deployment {} has no matchLabels selector", target.name))
        })?;
        let out = self
            .run(target, &["get", "pods", "-l", &selector, "-o", "json"])
            .await?;
        Ok(parse_pods(&out, &target.container)?)
    }

    async fn rollout_undo(&self, target: &DeploymentRef) -> Result<(), PromoteError> {
        let resource = format!("deployment/{}", target.name);
        self.run(target, &["rollout", "undo", &resource]).await?;
        Ok(())
    }
}
