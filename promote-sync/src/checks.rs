//! Check synchronization engine.
//!
//! Polls the proposal's check runs, mirrors each onto the release commit as
//! a commit status, and decides pass / fail / keep waiting.
//!
//! ## Mirror ledger
//!
//! Existing statuses on the release commit are read once per session and
//! hashed into a `context → digest` map. A mirror is written only when the
//! digest of `(state, description, target_url)` differs from the ledger, so
//! polling an unchanged check set produces no writes, across sessions too.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use promote_core::descriptor::content_digest;
use promote_core::forge::SourceControl;
use promote_core::poll::{AbortSignal, PollPolicy, Poller};
use promote_core::types::{
    ChangeProposal, CheckRun, CheckState, CommitSha, CommitStatus, ProposalState, Release, RepoRef,
};
use promote_core::PromoteError;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Proof that every required check passed on `head_sha`. Only
/// [`CheckSync::wait_for_checks`] constructs one, and the merge gate requires it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksPassed {
    proposal_number: u64,
    head_sha: CommitSha,
    checks: Vec<String>,
}

impl ChecksPassed {
    pub fn proposal_number(&self) -> u64 {
        self.proposal_number
    }

    pub fn head_sha(&self) -> &CommitSha {
        &self.head_sha
    }

    pub fn checks(&self) -> &[String] {
        &self.checks
    }
}

/// One observation of the proposal's checks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CheckSummary {
    pub head_sha: Option<CommitSha>,
    pub states: BTreeMap<String, CheckState>,
}

impl CheckSummary {
    pub fn with_state(&self, state: CheckState) -> Vec<String> {
        self.states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(n, _)| n.clone())
            .collect()
    }
}

impl fmt::Display for CheckSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.states.is_empty() {
            return f.write_str("no checks reported");
        }
        let parts: Vec<String> = self.states.iter().map(|(n, s)| format!("{n}={s}")).collect();
        f.write_str(&parts.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckVerdict {
    Passed(ChecksPassed),
    /// A required check failed. Not retryable.
    Failed(CheckSummary),
    /// Still pending when the attempt budget ran out.
    TimedOut { attempts: u32, last: CheckSummary },
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CheckSettings {
    /// Repository holding the release commit that receives the mirrors.
    pub source_repo: RepoRef,
    /// Repository holding the proposal.
    pub config_repo: RepoRef,
    /// Empty means every observed check is required.
    pub required: Vec<String>,
    pub settle: Duration,
    pub policy: PollPolicy,
}

pub struct CheckSync<'a, S: SourceControl> {
    forge: &'a S,
    settings: CheckSettings,
    abort: AbortSignal,
    ledger: HashMap<String, String>,
    seeded: bool,
    mirror_writes: usize,
}

fn status_digest(status: &CommitStatus) -> String {
    content_digest(&format!(
        "{}\n{}\n{}",
        status.state,
        status.description.as_deref().unwrap_or_default(),
        status.target_url.as_deref().unwrap_or_default()
    ))
}

/// Latest run per check name (highest id wins on re-runs).
fn latest_runs(runs: Vec<CheckRun>) -> BTreeMap<String, CheckRun> {
    let mut latest: BTreeMap<String, CheckRun> = BTreeMap::new();
    for run in runs {
        match latest.get(&run.name) {
            Some(existing) if existing.id >= run.id => {}
            _ => {
                latest.insert(run.name.clone(), run);
            }
        }
    }
    latest
}

impl<'a, S: SourceControl> CheckSync<'a, S> {
    pub fn new(forge: &'a S, settings: CheckSettings, abort: AbortSignal) -> Self {
        Self {
            forge,
            settings,
            abort,
            ledger: HashMap::new(),
            seeded: false,
            mirror_writes: 0,
        }
    }

    /// Mirror statuses written during this session.
    pub fn mirror_writes(&self) -> usize {
        self.mirror_writes
    }

    async fn seed_ledger(&mut self, commit: &CommitSha) -> Result<(), PromoteError> {
        if self.seeded {
            return Ok(());
        }
        let existing = self
            .forge
            .list_statuses(&self.settings.source_repo, commit)
            .await?;
        for status in existing {
            self.ledger.insert(status.context.clone(), status_digest(&status));
        }
        self.seeded = true;
        tracing::debug!(commit = %commit.short(), entries = self.ledger.len(), "mirror ledger seeded");
        Ok(())
    }

    /// Project `runs` onto the release commit. Returns the number of writes.
    pub async fn mirror(
        &mut self,
        release: &Release,
        proposal: &ChangeProposal,
        runs: &BTreeMap<String, CheckRun>,
    ) -> Result<usize, PromoteError> {
        self.seed_ledger(&release.commit).await?;
        let mut written = 0;
        for (name, run) in runs {
            let status = CommitStatus {
                context: format!("{name} / {}", release.tag),
                state: run.state(),
                description: Some(format!("PR #{}", proposal.number)),
                target_url: run.url.clone().or_else(|| Some(proposal.url.clone())),
            };
            let digest = status_digest(&status);
            if self.ledger.get(&status.context) == Some(&digest) {
                continue;
            }
            self.forge
                .create_status(&self.settings.source_repo, &release.commit, &status)
                .await?;
            tracing::info!(context = %status.context, state = %status.state, "mirrored check");
            self.ledger.insert(status.context, digest);
            written += 1;
        }
        self.mirror_writes += written;
        Ok(written)
    }

    fn evaluate(&self, summary: &CheckSummary) -> CheckState {
        let required: Vec<&str> = if self.settings.required.is_empty() {
            summary.states.keys().map(String::as_str).collect()
        } else {
            self.settings.required.iter().map(String::as_str).collect()
        };
        if required.is_empty() {
            return CheckState::Pending;
        }
        let states: Vec<CheckState> = required
            .iter()
            .map(|name| summary.states.get(*name).copied().unwrap_or(CheckState::Pending))
            .collect();
        if states.contains(&CheckState::Failure) {
            CheckState::Failure
        } else if states.iter().all(|s| *s == CheckState::Success) {
            CheckState::Success
        } else {
            CheckState::Pending
        }
    }

    /// Settle, then poll until the required checks pass, one fails, or the
    /// budget runs out. Transient API errors count as a missed attempt.
    pub async fn wait_for_checks(
        &mut self,
        release: &Release,
        proposal: &ChangeProposal,
    ) -> Result<CheckVerdict, PromoteError> {
        if !self.settings.settle.is_zero() {
            let mut abort = self.abort.clone();
            tokio::select! {
                _ = tokio::time::sleep(self.settings.settle) => {}
                _ = abort.aborted() => {}
            }
        }

        let repo = self.settings.config_repo.clone();
        let mut poller = Poller::new(self.settings.policy, self.abort.clone(), "checks");
        let mut last = CheckSummary::default();
        while poller.next_attempt().await?.is_some() {
            match self.observe(release, proposal, &repo).await {
                Ok(summary) => {
                    let verdict = self.evaluate(&summary);
                    tracing::info!(
                        number = proposal.number,
                        attempt = poller.attempts(),
                        verdict = %verdict,
                        checks = %summary,
                        "check status"
                    );
                    match verdict {
                        CheckState::Success => {
                            let head_sha = summary
                                .head_sha
                                .clone()
                                .unwrap_or_else(|| proposal.head_sha.clone());
                            return Ok(CheckVerdict::Passed(ChecksPassed {
                                proposal_number: proposal.number,
                                head_sha,
                                checks: summary.states.keys().cloned().collect(),
                            }));
                        }
                        CheckState::Failure => return Ok(CheckVerdict::Failed(summary)),
                        CheckState::Pending => last = summary,
                    }
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(attempt = poller.attempts(), error = %e, "check poll failed; will retry");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(CheckVerdict::TimedOut {
            attempts: poller.attempts(),
            last,
        })
    }

    /// One poll: refresh the proposal head, fetch its runs, mirror them.
    async fn observe(
        &mut self,
        release: &Release,
        proposal: &ChangeProposal,
        repo: &RepoRef,
    ) -> Result<CheckSummary, PromoteError> {
        let current = self.forge.get_proposal(repo, proposal.number).await?;
        if current.state != ProposalState::Open {
            return Err(PromoteError::MissingProposal {
                branch: format!("{} (PR #{} is {})", current.branch, current.number, current.state),
            });
        }
        if current.head_sha != proposal.head_sha {
            tracing::info!(
                number = current.number,
                from = %proposal.head_sha.short(),
                to = %current.head_sha.short(),
                "proposal head moved"
            );
        }
        let runs = latest_runs(self.forge.list_check_runs(repo, &current.head_sha).await?);
        self.mirror(release, &current, &runs).await?;
        Ok(CheckSummary {
            head_sha: Some(current.head_sha),
            states: runs.into_iter().map(|(n, r)| (n, r.state())).collect(),
        })
    }
}
