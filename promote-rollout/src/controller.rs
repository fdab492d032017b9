//! Rollout and rollback controllers.
//!
//! ```text
//! APPLYING ──patch──▶ ROLLING_OUT ──progress──▶ VERIFYING ──pods+health──▶ SUCCEEDED
//!     │                   │                         │
//!     └───────────────────┴─────────────────────────┴──▶ FAILED
//! ```
//!
//! Non-mutating requests run the patch as a server-side dry run and stay in
//! APPLYING. Every wait is a [`Poller`] loop; a ceiling means failure.

use promote_core::poll::{AbortSignal, PollPolicy, Poller};
use promote_core::types::{DeploymentRef, DeploymentSnapshot, ImageUpdate, PodObservation, RolloutProgress};
use promote_core::{Cluster, HealthProbe, PromoteError, RolloutPhase, RolloutState};

#[derive(Debug, Clone)]
pub struct RolloutSettings {
    pub progress: PollPolicy,
    pub pods: PollPolicy,
    pub health: PollPolicy,
    pub health_url: Option<String>,
    pub conflict_retries: u32,
}

/// Predicted effect of an image update, from a server-side dry run.
#[derive(Debug, Clone)]
pub struct RolloutPlan {
    pub state: RolloutState,
    pub current: DeploymentSnapshot,
    pub predicted: DeploymentSnapshot,
}

impl RolloutPlan {
    pub fn current_image(&self) -> Option<&str> {
        self.current.image_of(&self.state.deployment.container)
    }

    pub fn is_noop(&self) -> bool {
        self.current_image() == Some(self.state.desired_image.as_str())
    }
}

// ---------------------------------------------------------------------------
// Pod verification
// ---------------------------------------------------------------------------

/// Poll pods until every one runs `image`. Returns `false` at the ceiling.
/// The last observation is left in `observed`.
async fn verify_pods<C: Cluster>(
    cluster: &C,
    target: &DeploymentRef,
    image: &str,
    policy: PollPolicy,
    abort: &AbortSignal,
    step: &str,
    observed: &mut Vec<PodObservation>,
) -> Result<bool, PromoteError> {
    let mut poller = Poller::new(policy, abort.clone(), step);
    while poller.next_attempt().await?.is_some() {
        match cluster.list_pods(target).await {
            Ok(pods) => {
                let ready = pods.iter().filter(|p| p.matches(image)).count();
                tracing::info!(
                    deployment = %target,
                    attempt = poller.attempts(),
                    ready,
                    total = pods.len(),
                    image,
                    "pod verification"
                );
                let verified = !pods.is_empty() && ready == pods.len();
                *observed = pods;
                if verified {
                    return Ok(true);
                }
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(deployment = %target, error = %e, "pod listing failed; will retry");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(false)
}

// ---------------------------------------------------------------------------
// Rollout
// ---------------------------------------------------------------------------

pub struct RolloutController<'a, C: Cluster, H: HealthProbe> {
    cluster: &'a C,
    health: &'a H,
    settings: RolloutSettings,
    abort: AbortSignal,
}

impl<'a, C: Cluster, H: HealthProbe> RolloutController<'a, C, H> {
    pub fn new(cluster: &'a C, health: &'a H, settings: RolloutSettings, abort: AbortSignal) -> Self {
        Self {
            cluster,
            health,
            settings,
            abort,
        }
    }

    /// Dry-run the image update. Nothing changes in the cluster.
    pub async fn plan(
        &self,
        target: &DeploymentRef,
        desired_image: &str,
    ) -> Result<RolloutPlan, PromoteError> {
        let mut state = RolloutState::new(target.clone(), desired_image);
        let current = self.cluster.deployment(target).await?;
        state.previous_image = current.image_of(&target.container).map(str::to_owned);
        state.record_revision(current.revision);
        if state.previous_image.is_none() {
            return Err(PromoteError::not_found(format!(
                "container {} in deployment {}",
                target.container, target.name
            )));
        }
        let predicted = self
            .cluster
            .set_image(target, &Self::update(target, &current, desired_image, true))
            .await?;
        tracing::info!(
            deployment = %target,
            from = state.previous_image.as_deref().unwrap_or_default(),
            to = desired_image,
            "dry-run image update accepted"
        );
        Ok(RolloutPlan {
            state,
            current,
            predicted,
        })
    }

    fn update(
        target: &DeploymentRef,
        current: &DeploymentSnapshot,
        image: &str,
        dry_run: bool,
    ) -> ImageUpdate {
        ImageUpdate {
            container: target.container.clone(),
            image: image.to_string(),
            expected_resource_version: current.resource_version.clone(),
            dry_run,
        }
    }

    /// Drive `state` from APPLYING to a terminal phase. On error the phase is
    /// FAILED, except for abort, which leaves it where it was.
    pub async fn apply_and_verify(&self, state: &mut RolloutState) -> Result<(), PromoteError> {
        match self.drive(state).await {
            Ok(()) => {
                state.transition(RolloutPhase::Succeeded);
                Ok(())
            }
            Err(e @ PromoteError::Aborted { .. }) => Err(e),
            Err(e) => {
                tracing::error!(deployment = %state.deployment, phase = %state.phase, error = %e, "rollout failed");
                state.transition(RolloutPhase::Failed);
                Err(e)
            }
        }
    }

    async fn drive(&self, state: &mut RolloutState) -> Result<(), PromoteError> {
        self.apply(state).await?;
        state.transition(RolloutPhase::RollingOut);
        self.await_progress(state).await?;
        state.transition(RolloutPhase::Verifying);

        let desired = state.desired_image.clone();
        let verified = verify_pods(
            self.cluster,
            &state.deployment,
            &desired,
            self.settings.pods,
            &self.abort,
            "rollout verification",
            &mut state.observed_pods,
        )
        .await?;
        if !verified {
            return Err(PromoteError::RolloutVerification {
                deployment: state.deployment.to_string(),
                detail: state.mismatch_detail(&desired),
            });
        }
        if let Some(url) = self.settings.health_url.clone() {
            self.await_healthy(state, &url).await?;
        }
        Ok(())
    }

    /// Conditional image patch; a resourceVersion race re-reads and retries.
    async fn apply(&self, state: &mut RolloutState) -> Result<(), PromoteError> {
        let target = state.deployment.clone();
        let mut conflicts = 0u32;
        loop {
            let current = self.cluster.deployment(&target).await?;
            let previous = current
                .image_of(&target.container)
                .map(str::to_owned)
                .ok_or_else(|| {
                    PromoteError::not_found(format!(
                        "container {} in deployment {}",
                        target.container, target.name
                    ))
                })?;
            state.previous_image = Some(previous);
            state.record_revision(current.revision);

            let update = Self::update(&target, &current, &state.desired_image, false);
            match self.cluster.set_image(&target, &update).await {
                Ok(applied) => {
                    state.record_revision(applied.revision);
                    state.image_changed =
                        state.previous_image.as_deref() != Some(state.desired_image.as_str());
                    if !state.image_changed {
                        tracing::info!(
                            deployment = %target,
                            image = %state.desired_image,
                            "image already live; patch is a no-op"
                        );
                        return Ok(());
                    }
                    tracing::info!(
                        deployment = %target,
                        from = state.previous_image.as_deref().unwrap_or_default(),
                        to = %state.desired_image,
                        resource_version = %applied.resource_version,
                        "image updated"
                    );
                    return Ok(());
                }
                Err(PromoteError::Conflict { what }) if conflicts < self.settings.conflict_retries => {
                    conflicts += 1;
                    tracing::warn!(deployment = %target, attempt = conflicts, %what, "deployment changed; re-reading");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn await_progress(&self, state: &mut RolloutState) -> Result<(), PromoteError> {
        let target = state.deployment.clone();
        let mut poller = Poller::new(self.settings.progress, self.abort.clone(), "rollout progress");
        let mut last: Option<RolloutProgress> = None;
        while poller.next_attempt().await?.is_some() {
            match self.cluster.rollout_progress(&target).await {
                Ok(progress) => {
                    tracing::info!(deployment = %target, attempt = poller.attempts(), %progress, "rollout progress");
                    if progress.is_complete() {
                        return Ok(());
                    }
                    if let Some(reason) = &progress.stalled_reason {
                        return Err(PromoteError::RolloutVerification {
                            deployment: target.to_string(),
                            detail: format!("rollout stalled: {reason} ({progress})"),
                        });
                    }
                    last = Some(progress);
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(deployment = %target, error = %e, "progress read failed; will retry");
                }
                Err(e) => return Err(e),
            }
        }
        Err(PromoteError::Timeout {
            what: format!("rollout of {target}"),
            attempts: poller.attempts(),
            last_observed: last
                .map(|p| p.to_string())
                .unwrap_or_else(|| "no progress observed".to_string()),
        })
    }

    async fn await_healthy(&self, state: &RolloutState, url: &str) -> Result<(), PromoteError> {
        let mut poller = Poller::new(self.settings.health, self.abort.clone(), "health check");
        let mut last = String::from("no response");
        while poller.next_attempt().await?.is_some() {
            match self.health.probe(url).await {
                Ok(200) => {
                    tracing::info!(url, attempt = poller.attempts(), "endpoint healthy");
                    return Ok(());
                }
                Ok(code) => last = format!("HTTP {code}"),
                Err(e) => last = e.to_string(),
            }
            tracing::info!(url, attempt = poller.attempts(), observed = %last, "endpoint not healthy yet");
        }
        Err(PromoteError::RolloutVerification {
            deployment: state.deployment.to_string(),
            detail: format!(
                "health endpoint {url} not healthy after {} attempts (last: {last})",
                poller.attempts()
            ),
        })
    }
}

// ---------------------------------------------------------------------------
// Rollback
// ---------------------------------------------------------------------------

/// Reverts one failed rollout to the image recorded at APPLYING.
pub struct RollbackController<'a, C: Cluster> {
    cluster: &'a C,
    pods: PollPolicy,
    abort: AbortSignal,
}

impl<'a, C: Cluster> RollbackController<'a, C> {
    pub fn new(cluster: &'a C, pods: PollPolicy, abort: AbortSignal) -> Self {
        Self { cluster, pods, abort }
    }

    /// Undo to the immediately previous revision and verify pods run the
    /// prior image. At most once per rollout.
    pub async fn rollback(&self, state: &mut RolloutState) -> Result<(), PromoteError> {
        let deployment = state.deployment.to_string();
        let failed = |detail: String| PromoteError::RollbackFailed {
            deployment: deployment.clone(),
            detail,
        };
        if state.rolled_back {
            return Err(failed("rollback already attempted for this rollout".into()));
        }
        let Some(prior) = state.previous_image.clone() else {
            return Err(failed("no prior image recorded; nothing to roll back to".into()));
        };
        if !state.was_applied() {
            return Err(failed("image update never reached the cluster".into()));
        }
        if !state.image_changed {
            return Err(failed(format!("{prior} was already live; nothing to roll back")));
        }

        state.rolled_back = true;
        tracing::warn!(deployment = %state.deployment, to = %prior, "rolling back");
        self.cluster
            .rollout_undo(&state.deployment)
            .await
            .map_err(|e| failed(format!("undo failed: {e}")))?;

        let verified = verify_pods(
            self.cluster,
            &state.deployment,
            &prior,
            self.pods,
            &self.abort,
            "rollback verification",
            &mut state.observed_pods,
        )
        .await?;
        if !verified {
            return Err(failed(state.mismatch_detail(&prior)));
        }
        if let Ok(after) = self.cluster.deployment(&state.deployment).await {
            state.record_revision(after.revision);
        }
        tracing::info!(deployment = %state.deployment, image = %prior, "rollback verified");
        Ok(())
    }
}
