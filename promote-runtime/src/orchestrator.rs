//! One release, start to finish.
//!
//! ```text
//! resolve tag ─▶ descriptor commit + proposal ─▶ checks ─▶ merge gate ─▶ rollout ─▶ finalize
//!                                                  │           │            │
//!                                          CHECKS_FAILED  MERGE_FAILED  rollback ─▶ ROLLOUT_FAILED_ROLLED_BACK
//!                                                                           └──────▶ FATAL
//! ```
//!
//! Steps run strictly in sequence. [`Orchestrator::promote`] never returns an
//! error: every failure becomes a terminal status on the [`Outcome`], with
//! the failing step and the last external state observed.

use chrono::Utc;

use promote_core::poll::AbortSignal;
use promote_core::types::{CommitSha, DeploymentRef, Environment, Release, ReleaseTag};
use promote_core::{
    CheckState, Cluster, EnvironmentConfig, FailureDetail, HealthProbe, MergeRecord, Outcome,
    PromoteConfig, PromoteError, Reviewer, RolloutState, SourceControl, Step, StepResult,
    TerminalStatus, TraceEntry,
};
use promote_renderer::{ProposalContext, Renderer};
use promote_rollout::{RollbackController, RolloutController, RolloutSettings};
use promote_sync::{
    CheckSettings, CheckSync, CheckVerdict, ChecksPassed, MergeGate, ProposalManager,
    ProposalSettings, ProposalUpdate,
};

/// What the caller asked for. Unset fields fall back to configuration.
#[derive(Debug, Clone)]
pub struct ReleaseRequest {
    pub tag: ReleaseTag,
    pub environment: Environment,
    /// Release commit; resolved from the tag when absent.
    pub commit: Option<CommitSha>,
    /// Overrides the environment's `skip_merge` default.
    pub skip_merge: Option<bool>,
    pub delete_branch: bool,
    pub finalize: bool,
}

/// The four external systems a release talks to.
pub struct Clients<'a, S, R, C, H> {
    pub source: &'a S,
    pub reviewer: &'a R,
    pub cluster: &'a C,
    pub health: &'a H,
}

// ---------------------------------------------------------------------------
// Run bookkeeping
// ---------------------------------------------------------------------------

/// Why a release stopped early.
struct Halt {
    status: TerminalStatus,
    failure: FailureDetail,
    /// The failing step is already in the trace.
    traced: bool,
}

impl Halt {
    /// Abort always wins over the status the step would otherwise report.
    fn new(
        status: TerminalStatus,
        step: Step,
        err: &PromoteError,
        last_observed: Option<String>,
    ) -> Self {
        let status = if matches!(err, PromoteError::Aborted { .. }) {
            TerminalStatus::Aborted
        } else {
            status
        };
        Self {
            status,
            failure: FailureDetail {
                step,
                error: err.to_string(),
                last_observed,
            },
            traced: false,
        }
    }

    fn fatal(step: Step, err: &PromoteError) -> Self {
        Self::new(TerminalStatus::Fatal, step, err, None)
    }
}

struct Run {
    release: Release,
    trace: Vec<TraceEntry>,
    proposal: Option<ProposalUpdate>,
    merge: MergeRecord,
    rollout: Option<RolloutState>,
    started_at: chrono::DateTime<Utc>,
}

impl Run {
    fn record(&mut self, step: Step, result: StepResult, detail: impl Into<String>) {
        let detail = detail.into();
        match result {
            StepResult::Failed => tracing::error!(%step, %detail, "step failed"),
            StepResult::Warning => tracing::warn!(%step, %detail, "step warning"),
            _ => tracing::info!(%step, %result, %detail, "step"),
        }
        self.trace.push(TraceEntry {
            at: Utc::now(),
            step,
            result,
            detail,
        });
    }

    fn finish(mut self, status: TerminalStatus, halt: Option<Halt>) -> Outcome {
        let failure = halt.map(|h| {
            if !h.traced {
                self.record(h.failure.step, StepResult::Failed, h.failure.error.clone());
            }
            h.failure
        });
        tracing::info!(
            tag = %self.release.tag,
            environment = %self.release.environment,
            %status,
            "release finished"
        );
        Outcome {
            release: self.release,
            status,
            proposal: self.proposal.map(|u| u.proposal),
            merge: self.merge,
            rollout: self.rollout,
            failure,
            trace: self.trace,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<'a, S, R, C, H> {
    clients: Clients<'a, S, R, C, H>,
    config: &'a PromoteConfig,
    renderer: &'a Renderer,
    abort: AbortSignal,
}

impl<'a, S, R, C, H> Orchestrator<'a, S, R, C, H>
where
    S: SourceControl,
    R: Reviewer,
    C: Cluster,
    H: HealthProbe,
{
    pub fn new(
        clients: Clients<'a, S, R, C, H>,
        config: &'a PromoteConfig,
        renderer: &'a Renderer,
        abort: AbortSignal,
    ) -> Self {
        Self {
            clients,
            config,
            renderer,
            abort,
        }
    }

    /// Drive one release to a terminal status.
    pub async fn promote(&self, request: ReleaseRequest) -> Outcome {
        let mut run = Run {
            release: Release {
                tag: request.tag.clone(),
                commit: request.commit.clone().unwrap_or_else(|| CommitSha(String::new())),
                environment: request.environment,
                skip_merge: request.skip_merge.unwrap_or(false),
                delete_branch: request.delete_branch,
                finalize: request.finalize,
            },
            trace: Vec::new(),
            proposal: None,
            merge: MergeRecord::NotAttempted,
            rollout: None,
            started_at: Utc::now(),
        };
        tracing::info!(tag = %request.tag, environment = %request.environment, "release started");

        match self.drive(&mut run, &request).await {
            Ok(()) => run.finish(TerminalStatus::Succeeded, None),
            Err(halt) => run.finish(halt.status, Some(halt)),
        }
    }

    async fn drive(&self, run: &mut Run, request: &ReleaseRequest) -> Result<(), Halt> {
        let env = self
            .config
            .environment(request.environment)
            .map_err(|e| Halt::fatal(Step::Descriptor, &PromoteError::from(e)))?;
        run.release.skip_merge = request.skip_merge.unwrap_or(env.skip_merge);
        if request.commit.is_none() {
            run.release.commit = self
                .clients
                .source
                .resolve_tag(&self.config.source_repo, &request.tag)
                .await
                .map_err(|e| Halt::fatal(Step::Descriptor, &e))?;
        }

        let update = self.propose(run, env).await?;
        let passed = self.checks(run, &update).await?;

        if run.release.skip_merge {
            run.merge = MergeRecord::Skipped;
            run.record(Step::Merge, StepResult::Skipped, "skip_merge set; proposal left open");
            run.record(Step::Rollout, StepResult::Skipped, "nothing merged");
            return Ok(());
        }

        self.merge(run, &update, &passed).await?;
        self.rollout(run, env, &update).await?;
        self.finalize(run).await;
        Ok(())
    }

    async fn propose(&self, run: &mut Run, env: &EnvironmentConfig) -> Result<ProposalUpdate, Halt> {
        let settings = ProposalSettings {
            source_repo: self.config.source_repo.clone(),
            config_repo: self.config.config_repo.clone(),
            base_branch: self.config.base_branch.clone(),
            descriptor_path: env.descriptor_path.clone(),
            conflict_retries: self.config.conflict_retries,
        };
        let manager = ProposalManager::new(self.clients.source, self.renderer, settings);
        let update = manager.open_or_update(&run.release).await.map_err(|e| {
            let step = match e {
                PromoteError::NotFound { .. } | PromoteError::Conflict { .. } => Step::Descriptor,
                _ => Step::Proposal,
            };
            Halt::fatal(step, &e)
        })?;

        run.record(
            Step::Descriptor,
            StepResult::Ok,
            format!(
                "{} {} → {} in {} ({} conflicts retried)",
                update.snapshot.path,
                update.snapshot.original.image_version().unwrap_or("<unset>"),
                run.release.tag,
                update.commit.short(),
                update.conflicts
            ),
        );
        run.record(
            Step::Proposal,
            StepResult::Ok,
            format!(
                "PR #{} {} ({})",
                update.proposal.number,
                if update.reused { "reused" } else { "opened" },
                update.proposal.url
            ),
        );
        run.proposal = Some(update.clone());
        Ok(update)
    }

    async fn checks(&self, run: &mut Run, update: &ProposalUpdate) -> Result<ChecksPassed, Halt> {
        let settings = CheckSettings {
            source_repo: self.config.source_repo.clone(),
            config_repo: self.config.config_repo.clone(),
            required: self.config.checks.required.clone(),
            settle: std::time::Duration::from_secs(self.config.checks.settle_secs),
            policy: self.config.checks.poll,
        };
        let mut sync = CheckSync::new(self.clients.source, settings, self.abort.clone());
        let verdict = sync
            .wait_for_checks(&run.release, &update.proposal)
            .await
            .map_err(|e| Halt::fatal(Step::Checks, &e))?;

        match verdict {
            CheckVerdict::Passed(passed) => {
                run.record(
                    Step::Checks,
                    StepResult::Ok,
                    format!(
                        "{} passed on {} ({} mirrors written)",
                        passed.checks().join(", "),
                        passed.head_sha().short(),
                        sync.mirror_writes()
                    ),
                );
                Ok(passed)
            }
            CheckVerdict::Failed(summary) => {
                let failed = summary.with_state(CheckState::Failure).join(", ");
                Err(Halt {
                    status: TerminalStatus::ChecksFailed,
                    failure: FailureDetail {
                        step: Step::Checks,
                        error: format!("required checks failed: {failed}"),
                        last_observed: Some(summary.to_string()),
                    },
                    traced: false,
                })
            }
            // Checks that never settle block the merge like a failure: CHECKS_FAILED, not FATAL.
            CheckVerdict::TimedOut { attempts, last } => {
                let err = PromoteError::Timeout {
                    what: format!("checks on PR #{}", update.proposal.number),
                    attempts,
                    last_observed: last.to_string(),
                };
                Err(Halt::new(
                    TerminalStatus::ChecksFailed,
                    Step::Checks,
                    &err,
                    Some(last.to_string()),
                ))
            }
        }
    }

    async fn merge(
        &self,
        run: &mut Run,
        update: &ProposalUpdate,
        passed: &ChecksPassed,
    ) -> Result<(), Halt> {
        let ctx = ProposalContext::new(
            &run.release,
            &self.config.source_repo,
            &update.snapshot.path,
            &update.snapshot.original,
        )
        .with_number(update.proposal.number);
        let (title, message) = self
            .renderer
            .merge_commit(&ctx)
            .map_err(|e| Halt::fatal(Step::Merge, &PromoteError::from(e)))?;

        let gate = MergeGate::new(
            self.clients.reviewer,
            self.clients.source,
            self.config.config_repo.clone(),
        );
        match gate.approve_and_merge(passed, &title, &message).await {
            Ok(sha) => {
                run.record(
                    Step::Merge,
                    StepResult::Ok,
                    format!("PR #{} squash-merged as {}", passed.proposal_number(), sha.short()),
                );
                run.merge = MergeRecord::Merged { sha };
            }
            Err(e) => {
                run.merge = MergeRecord::Failed {
                    reason: e.to_string(),
                };
                return Err(Halt::new(
                    TerminalStatus::MergeFailed,
                    Step::Merge,
                    &e,
                    Some(format!("PR #{} head {}", passed.proposal_number(), passed.head_sha().short())),
                ));
            }
        }

        if run.release.delete_branch {
            let branch = run.release.branch();
            match self
                .clients
                .source
                .delete_branch(&self.config.config_repo, &branch)
                .await
            {
                Ok(()) => run.record(Step::Merge, StepResult::Ok, format!("deleted {branch}")),
                Err(e) => run.record(
                    Step::Merge,
                    StepResult::Warning,
                    format!("could not delete {branch}: {e}"),
                ),
            }
        }
        Ok(())
    }

    async fn rollout(
        &self,
        run: &mut Run,
        env: &EnvironmentConfig,
        update: &ProposalUpdate,
    ) -> Result<(), Halt> {
        let (target, image) =
            rollout_target(env, update).map_err(|e| Halt::fatal(Step::Rollout, &e))?;
        let controller = RolloutController::new(
            self.clients.cluster,
            self.clients.health,
            rollout_settings(self.config, env),
            self.abort.clone(),
        );

        let mut state = RolloutState::new(target, image);
        let result = controller.apply_and_verify(&mut state).await;
        let outcome = match result {
            Ok(()) => {
                run.record(
                    Step::Rollout,
                    StepResult::Ok,
                    format!(
                        "{} now on {}; {}",
                        state.deployment,
                        state.desired_image,
                        state.mismatch_detail(&state.desired_image)
                    ),
                );
                Ok(())
            }
            Err(e @ PromoteError::Aborted { .. }) => Err(Halt::fatal(Step::Rollout, &e)),
            // never patched, or the image was already live: nothing to undo
            Err(e) if !state.needs_rollback() => {
                let last_observed = state
                    .was_applied()
                    .then(|| state.mismatch_detail(&state.desired_image));
                Err(Halt::new(TerminalStatus::Fatal, Step::Rollout, &e, last_observed))
            }
            Err(e) => {
                let last_observed = Some(state.mismatch_detail(&state.desired_image));
                run.record(Step::Rollout, StepResult::Failed, e.to_string());
                Err(self.rollback(run, &mut state, &e, last_observed).await)
            }
        };
        run.rollout = Some(state);
        outcome
    }

    /// Always yields a halt: the rollout already failed.
    async fn rollback(
        &self,
        run: &mut Run,
        state: &mut RolloutState,
        cause: &PromoteError,
        last_observed: Option<String>,
    ) -> Halt {
        let controller = RollbackController::new(
            self.clients.cluster,
            self.config.rollout.pods,
            self.abort.clone(),
        );
        match controller.rollback(state).await {
            Ok(()) => {
                run.record(
                    Step::Rollback,
                    StepResult::Ok,
                    format!(
                        "{} restored to {}",
                        state.deployment,
                        state.previous_image.as_deref().unwrap_or_default()
                    ),
                );
                Halt {
                    traced: true,
                    ..Halt::new(
                        TerminalStatus::RolloutFailedRolledBack,
                        Step::Rollout,
                        cause,
                        last_observed,
                    )
                }
            }
            Err(e) => {
                let prior = state.previous_image.clone().unwrap_or_default();
                // the rollout failure is already traced; this records the rollback one
                Halt::new(
                    TerminalStatus::Fatal,
                    Step::Rollback,
                    &e,
                    Some(state.mismatch_detail(&prior)),
                )
            }
        }
    }

    async fn finalize(&self, run: &mut Run) {
        if !run.release.finalize {
            return;
        }
        match self
            .clients
            .source
            .finalize_release(&self.config.source_repo, &run.release.tag)
            .await
        {
            Ok(()) => run.record(
                Step::Finalize,
                StepResult::Ok,
                format!("release {} marked final", run.release.tag),
            ),
            Err(e) => run.record(
                Step::Finalize,
                StepResult::Warning,
                format!("could not finalize release {}: {e}", run.release.tag),
            ),
        }
    }
}

/// Poll budgets and health endpoint for a rollout into `env`.
pub fn rollout_settings(config: &PromoteConfig, env: &EnvironmentConfig) -> RolloutSettings {
    RolloutSettings {
        progress: config.rollout.progress,
        pods: config.rollout.pods,
        health: config.health.poll,
        health_url: env.health_url.clone(),
        conflict_retries: config.conflict_retries,
    }
}

/// Deployment and image named by the committed descriptor.
pub fn rollout_target(
    env: &EnvironmentConfig,
    update: &ProposalUpdate,
) -> Result<(DeploymentRef, String), PromoteError> {
    let descriptor = &update.snapshot.descriptor;
    let target = descriptor.deployment_ref(env.namespace.clone())?;
    let image = descriptor
        .image_reference()
        .ok_or_else(|| PromoteError::not_found("IMAGE_NAME in descriptor"))?;
    Ok((target, image))
}
