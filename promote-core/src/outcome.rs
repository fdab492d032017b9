//! Progress records for one release: the rollout state machine, the step
//! trace, and the terminal [`Outcome`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChangeProposal, CommitSha, DeploymentRef, PodObservation, Release};

// ---------------------------------------------------------------------------
// Rollout state machine
// ---------------------------------------------------------------------------

/// `APPLYING → ROLLING_OUT → VERIFYING → {SUCCEEDED | FAILED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RolloutPhase {
    Applying,
    RollingOut,
    Verifying,
    Succeeded,
    Failed,
}

impl RolloutPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RolloutPhase::Succeeded | RolloutPhase::Failed)
    }

    fn can_move_to(&self, next: RolloutPhase) -> bool {
        use RolloutPhase::*;
        matches!(
            (*self, next),
            (Applying, RollingOut)
                | (RollingOut, Verifying)
                | (Verifying, Succeeded)
                | (Applying | RollingOut | Verifying, Failed)
        )
    }
}

impl fmt::Display for RolloutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RolloutPhase::Applying => "APPLYING",
            RolloutPhase::RollingOut => "ROLLING_OUT",
            RolloutPhase::Verifying => "VERIFYING",
            RolloutPhase::Succeeded => "SUCCEEDED",
            RolloutPhase::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Rollout bookkeeping, mutated only by the rollout and rollback controllers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutState {
    pub deployment: DeploymentRef,
    pub desired_image: String,
    /// Image the deployment ran before APPLYING; the rollback target.
    pub previous_image: Option<String>,
    pub observed_pods: Vec<PodObservation>,
    /// Deployment revisions seen, oldest first.
    pub revision_history: Vec<u64>,
    pub phase: RolloutPhase,
    pub transitions: Vec<RolloutPhase>,
    /// The patch replaced `previous_image`; false when the image was already live.
    #[serde(default)]
    pub image_changed: bool,
    pub rolled_back: bool,
}

impl RolloutState {
    pub fn new(deployment: DeploymentRef, desired_image: impl Into<String>) -> Self {
        Self {
            deployment,
            desired_image: desired_image.into(),
            previous_image: None,
            observed_pods: Vec::new(),
            revision_history: Vec::new(),
            phase: RolloutPhase::Applying,
            transitions: vec![RolloutPhase::Applying],
            image_changed: false,
            rolled_back: false,
        }
    }

    /// Advance the state machine. Illegal moves are ignored and logged.
    pub fn transition(&mut self, next: RolloutPhase) {
        if !self.phase.can_move_to(next) {
            tracing::warn!(from = %self.phase, to = %next, "ignored illegal rollout transition");
            return;
        }
        tracing::info!(deployment = %self.deployment, from = %self.phase, to = %next, "rollout phase");
        self.phase = next;
        self.transitions.push(next);
    }

    /// The image patch reached the cluster (the state machine left APPLYING).
    pub fn was_applied(&self) -> bool {
        self.transitions.contains(&RolloutPhase::RollingOut)
    }

    /// A failure after this point leaves the cluster on a new revision that
    /// undo can revert to `previous_image`.
    pub fn needs_rollback(&self) -> bool {
        self.was_applied() && self.image_changed
    }

    pub fn record_revision(&mut self, revision: Option<u64>) {
        if let Some(rev) = revision {
            if self.revision_history.last() != Some(&rev) {
                self.revision_history.push(rev);
            }
        }
    }

    /// Pods not yet running the desired image, as `pod=image (phase)` pairs.
    pub fn mismatch_detail(&self, expected_image: &str) -> String {
        if self.observed_pods.is_empty() {
            return "no pods observed".to_string();
        }
        let matching = self
            .observed_pods
            .iter()
            .filter(|p| p.matches(expected_image))
            .count();
        let off: Vec<String> = self
            .observed_pods
            .iter()
            .filter(|p| !p.matches(expected_image))
            .map(|p| {
                format!(
                    "{}={} ({})",
                    p.pod_id,
                    p.image.as_deref().unwrap_or("<none>"),
                    p.phase
                )
            })
            .collect();
        if off.is_empty() {
            format!("{matching}/{} pods on {expected_image}", self.observed_pods.len())
        } else {
            format!(
                "{matching}/{} pods on {expected_image}; mismatched: {}",
                self.observed_pods.len(),
                off.join(", ")
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Trace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Descriptor,
    Proposal,
    Checks,
    Merge,
    Rollout,
    Rollback,
    Finalize,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Descriptor => "descriptor",
            Step::Proposal => "proposal",
            Step::Checks => "checks",
            Step::Merge => "merge",
            Step::Rollout => "rollout",
            Step::Rollback => "rollback",
            Step::Finalize => "finalize",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepResult {
    Ok,
    Skipped,
    Warning,
    Failed,
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepResult::Ok => "ok",
            StepResult::Skipped => "skipped",
            StepResult::Warning => "warning",
            StepResult::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub at: DateTime<Utc>,
    pub step: Step,
    pub result: StepResult,
    pub detail: String,
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalStatus {
    Succeeded,
    ChecksFailed,
    MergeFailed,
    RolloutFailedRolledBack,
    Fatal,
    Aborted,
}

impl TerminalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalStatus::Succeeded => "SUCCEEDED",
            TerminalStatus::ChecksFailed => "CHECKS_FAILED",
            TerminalStatus::MergeFailed => "MERGE_FAILED",
            TerminalStatus::RolloutFailedRolledBack => "ROLLOUT_FAILED_ROLLED_BACK",
            TerminalStatus::Fatal => "FATAL",
            TerminalStatus::Aborted => "ABORTED",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TerminalStatus::Succeeded)
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened at the merge gate, tracked apart from the rollout result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MergeRecord {
    NotAttempted,
    Skipped,
    Merged { sha: CommitSha },
    Failed { reason: String },
}

/// The failing step plus the last external state observed before it failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub step: Step,
    pub error: String,
    pub last_observed: Option<String>,
}

/// Terminal record of one release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub release: Release,
    pub status: TerminalStatus,
    pub proposal: Option<ChangeProposal>,
    pub merge: MergeRecord,
    pub rollout: Option<RolloutState>,
    pub failure: Option<FailureDetail>,
    pub trace: Vec<TraceEntry>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PodPhase;

    fn target() -> DeploymentRef {
        DeploymentRef {
            namespace: None,
            name: "api".into(),
            container: "api".into(),
        }
    }

    fn pod(id: &str, image: &str) -> PodObservation {
        PodObservation {
            pod_id: id.into(),
            image: Some(image.into()),
            phase: PodPhase::Running,
        }
    }

    #[test]
    fn happy_path_transitions_are_recorded() {
        let mut state = RolloutState::new(target(), "api:2");
        state.transition(RolloutPhase::RollingOut);
        state.transition(RolloutPhase::Verifying);
        state.transition(RolloutPhase::Succeeded);
        assert_eq!(
            state.transitions,
            vec![
                RolloutPhase::Applying,
                RolloutPhase::RollingOut,
                RolloutPhase::Verifying,
                RolloutPhase::Succeeded
            ]
        );
        assert!(state.phase.is_terminal());
    }

    #[test]
    fn illegal_transition_is_ignored() {
        let mut state = RolloutState::new(target(), "api:2");
        state.transition(RolloutPhase::Succeeded);
        assert_eq!(state.phase, RolloutPhase::Applying);
        state.transition(RolloutPhase::Failed);
        state.transition(RolloutPhase::RollingOut);
        assert_eq!(state.phase, RolloutPhase::Failed);
    }

    #[test]
    fn rollback_needs_an_applied_image_change() {
        let mut state = RolloutState::new(target(), "api:2");
        state.image_changed = true;
        assert!(!state.needs_rollback());
        state.transition(RolloutPhase::RollingOut);
        assert!(state.needs_rollback());
        state.image_changed = false;
        assert!(!state.needs_rollback());
    }

    #[test]
    fn revision_history_dedups_consecutive_reads() {
        let mut state = RolloutState::new(target(), "api:2");
        state.record_revision(Some(4));
        state.record_revision(Some(4));
        state.record_revision(None);
        state.record_revision(Some(5));
        assert_eq!(state.revision_history, vec![4, 5]);
    }

    #[test]
    fn mismatch_detail_names_the_lagging_pods() {
        let mut state = RolloutState::new(target(), "api:2");
        state.observed_pods = vec![pod("a", "api:2"), pod("b", "api:2"), pod("c", "api:1")];
        assert_eq!(
            state.mismatch_detail("api:2"),
            "2/3 pods on api:2; mismatched: c=api:1 (Running)"
        );
        state.observed_pods.clear();
        assert_eq!(state.mismatch_detail("api:2"), "no pods observed");
    }

    #[test]
    fn terminal_status_serializes_screaming_snake() {
        let json = serde_json::to_string(&TerminalStatus::RolloutFailedRolledBack).unwrap();
        assert_eq!(json, "\"ROLLOUT_FAILED_ROLLED_BACK\"");
        assert_eq!(TerminalStatus::ChecksFailed.to_string(), "CHECKS_FAILED");
    }
}
