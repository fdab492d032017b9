//! Cluster control-plane and live-endpoint seams.

use async_trait::async_trait;

use crate::error::PromoteError;
use crate::types::{DeploymentRef, DeploymentSnapshot, ImageUpdate, PodObservation, RolloutProgress};

#[async_trait]
pub trait Cluster: Send + Sync {
    /// Current deployment object. `NotFound` if it does not exist.
    async fn deployment(&self, target: &DeploymentRef) -> Result<DeploymentSnapshot, PromoteError>;

    /// Set the container image, conditional on `update.expected_resource_version`.
    /// Returns the resulting object (the predicted one when `dry_run`).
    /// `Conflict` when the deployment changed since it was read.
    async fn set_image(
        &self,
        target: &DeploymentRef,
        update: &ImageUpdate,
    ) -> Result<DeploymentSnapshot, PromoteError>;

    async fn rollout_progress(&self, target: &DeploymentRef) -> Result<RolloutProgress, PromoteError>;

    /// Pods selected by the deployment's label selector.
    async fn list_pods(&self, target: &DeploymentRef) -> Result<Vec<PodObservation>, PromoteError>;

    /// Revert to the immediately previous revision.
    async fn rollout_undo(&self, target: &DeploymentRef) -> Result<(), PromoteError>;
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// One GET against `url`; returns the HTTP status code.
    async fn probe(&self, url: &str) -> Result<u16, PromoteError>;
}
