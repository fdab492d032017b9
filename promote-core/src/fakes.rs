//! In-memory stand-ins for the source-control API, the cluster and the
//! health endpoint. Enabled for dependents with the `test-support` feature.
//!
//! Each fake is a cheap `Clone` over shared state, so a test can hand one
//! copy to the component under test and keep another to script behaviour and
//! inspect recorded calls.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::cluster::{Cluster, HealthProbe};
use crate::descriptor::content_digest;
use crate::error::PromoteError;
use crate::forge::{Identity, Reviewer, SourceControl};
use crate::types::{
    BranchName, ChangeProposal, CheckRun, CommitSha, CommitStatus, ContainerImage, DeploymentRef,
    DeploymentSnapshot, FileWrite, ImageUpdate, MergeRequest, NewProposal, PodObservation,
    PodPhase, ProposalState, ReleaseTag, RemoteFile, RepoRef, Review, RolloutProgress,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn api(status: u16, message: impl Into<String>) -> PromoteError {
    PromoteError::Api {
        status: Some(status),
        message: message.into(),
    }
}

/// Shorthand for a check run in a given state.
pub fn check_run(name: &str, status: &str, conclusion: Option<&str>) -> CheckRun {
    CheckRun {
        id: name.bytes().map(u64::from).sum(),
        name: name.to_string(),
        status: status.to_string(),
        conclusion: conclusion.map(str::to_owned),
        url: Some(format!("https://ci.test/runs/{name}")),
    }
}

/// `count` running pods on `image`, named `<prefix>-<n>`.
pub fn running_pods(prefix: &str, count: usize, image: &str) -> Vec<PodObservation> {
    (0..count)
        .map(|n| PodObservation {
            pod_id: format!("{prefix}-{n}"),
            image: Some(image.to_string()),
            phase: PodPhase::Running,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// FakeForge
// ---------------------------------------------------------------------------

/// Mutable state behind [`FakeForge`]. Repository arguments are ignored:
/// tags, files, branches and proposals share one namespace.
#[derive(Debug, Default)]
pub struct ForgeState {
    pub tags: HashMap<String, CommitSha>,
    /// commit sha → (path → content)
    pub commits: HashMap<String, BTreeMap<String, String>>,
    pub branches: HashMap<String, CommitSha>,
    pub proposals: Vec<ChangeProposal>,
    /// Successive `list_check_runs` answers; the last one repeats.
    pub check_script: VecDeque<Vec<CheckRun>>,
    /// commit sha → latest status per context
    pub statuses: HashMap<String, Vec<CommitStatus>>,
    pub reviews: HashMap<u64, Vec<Review>>,
    /// Operation log, one entry per mutating or polled call.
    pub calls: Vec<String>,
    /// Upcoming `write_file` calls that fail as if another writer got there first.
    pub pending_write_conflicts: u32,
    pub reject_approval: Option<String>,
    pub reject_merge: Option<String>,
    pub reject_branch_delete: bool,
    next_commit: u64,
    next_proposal: u64,
}

impl ForgeState {
    fn new_commit(&mut self, tree: BTreeMap<String, String>) -> CommitSha {
        self.next_commit += 1;
        let sha = format!("{:040x}", self.next_commit);
        self.commits.insert(sha.clone(), tree);
        CommitSha(sha)
    }

    fn tree_at(&self, git_ref: &str) -> Option<&BTreeMap<String, String>> {
        let sha = self
            .branches
            .get(git_ref)
            .map(|s| s.0.clone())
            .unwrap_or_else(|| git_ref.to_string());
        self.commits.get(&sha)
    }

    fn refresh(&self, proposal: &mut ChangeProposal) {
        if proposal.state == ProposalState::Open {
            if let Some(head) = self.branches.get(&proposal.branch.0) {
                proposal.head_sha = head.clone();
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakeForge {
    login: String,
    state: Arc<Mutex<ForgeState>>,
}

impl FakeForge {
    pub fn new(login: &str) -> Self {
        Self {
            login: login.to_string(),
            state: Arc::new(Mutex::new(ForgeState::default())),
        }
    }

    /// Another identity over the same remote state.
    pub fn as_login(&self, login: &str) -> Self {
        Self {
            login: login.to_string(),
            state: self.state.clone(),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, ForgeState> {
        lock(&self.state)
    }

    /// Create (or move) `branch` to a fresh commit holding `files`.
    pub fn seed_branch(&self, branch: &str, files: &[(&str, &str)]) -> CommitSha {
        let mut st = self.state();
        let tree = files
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect();
        let sha = st.new_commit(tree);
        st.branches.insert(branch.to_string(), sha.clone());
        sha
    }

    pub fn seed_tag(&self, tag: &str, sha: &str) {
        self.state().tags.insert(tag.to_string(), CommitSha::from(sha));
    }

    /// Inject an open proposal directly, bypassing `create_proposal`.
    pub fn inject_open_proposal(&self, branch: &str, base: &str) -> u64 {
        self.inject_open_proposal_by(branch, base, &self.login)
    }

    /// Like [`inject_open_proposal`](Self::inject_open_proposal), opened by `author`.
    pub fn inject_open_proposal_by(&self, branch: &str, base: &str, author: &str) -> u64 {
        let mut st = self.state();
        st.next_proposal += 1;
        let number = st.next_proposal;
        let head_sha = st.branches.get(branch).cloned().unwrap_or_else(|| CommitSha::from("0"));
        st.proposals.push(ChangeProposal {
            number,
            url: format!("https://github.test/pull/{number}"),
            branch: BranchName::from(branch),
            base_branch: base.to_string(),
            head_sha,
            state: ProposalState::Open,
            author: author.to_string(),
        });
        number
    }

    pub fn script_checks(&self, snapshots: Vec<Vec<CheckRun>>) {
        self.state().check_script = snapshots.into();
    }

    pub fn calls_named(&self, name: &str) -> usize {
        self.state().calls.iter().filter(|c| c.as_str() == name).count()
    }

    pub fn file_at(&self, git_ref: &str, path: &str) -> Option<String> {
        self.state().tree_at(git_ref).and_then(|t| t.get(path).cloned())
    }

    pub fn open_proposals(&self, branch: &str) -> usize {
        self.state()
            .proposals
            .iter()
            .filter(|p| p.branch.0 == branch && p.state == ProposalState::Open)
            .count()
    }

    pub fn statuses_on(&self, sha: &str) -> Vec<CommitStatus> {
        self.state().statuses.get(sha).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Identity for FakeForge {
    async fn whoami(&self) -> Result<String, PromoteError> {
        Ok(self.login.clone())
    }
}

#[async_trait]
impl SourceControl for FakeForge {
    async fn resolve_tag(&self, _repo: &RepoRef, tag: &ReleaseTag) -> Result<CommitSha, PromoteError> {
        self.state()
            .tags
            .get(&tag.0)
            .cloned()
            .ok_or_else(|| PromoteError::not_found(format!("tag {tag}")))
    }

    async fn branch_head(
        &self,
        _repo: &RepoRef,
        branch: &BranchName,
    ) -> Result<Option<CommitSha>, PromoteError> {
        Ok(self.state().branches.get(&branch.0).cloned())
    }

    async fn create_branch(
        &self,
        _repo: &RepoRef,
        branch: &BranchName,
        sha: &CommitSha,
    ) -> Result<(), PromoteError> {
        let mut st = self.state();
        st.calls.push("create_branch".into());
        if st.branches.contains_key(&branch.0) {
            return Err(PromoteError::conflict(format!("branch {branch} already exists")));
        }
        st.branches.insert(branch.0.clone(), sha.clone());
        Ok(())
    }

    async fn force_update_branch(
        &self,
        _repo: &RepoRef,
        branch: &BranchName,
        sha: &CommitSha,
    ) -> Result<(), PromoteError> {
        let mut st = self.state();
        st.calls.push("force_update_branch".into());
        match st.branches.get_mut(&branch.0) {
            Some(head) => {
                *head = sha.clone();
                Ok(())
            }
            None => Err(PromoteError::not_found(format!("branch {branch}"))),
        }
    }

    async fn delete_branch(&self, _repo: &RepoRef, branch: &BranchName) -> Result<(), PromoteError> {
        let mut st = self.state();
        st.calls.push("delete_branch".into());
        if st.reject_branch_delete {
            return Err(api(422, "reference is protected"));
        }
        st.branches
            .remove(&branch.0)
            .map(|_| ())
            .ok_or_else(|| PromoteError::not_found(format!("branch {branch}")))
    }

    async fn read_file(
        &self,
        _repo: &RepoRef,
        path: &str,
        git_ref: &str,
    ) -> Result<RemoteFile, PromoteError> {
        let st = self.state();
        let content = st
            .tree_at(git_ref)
            .and_then(|t| t.get(path))
            .cloned()
            .ok_or_else(|| PromoteError::not_found(format!("{path} at {git_ref}")))?;
        Ok(RemoteFile {
            path: path.to_string(),
            sha: content_digest(&content),
            content,
        })
    }

    async fn write_file(&self, _repo: &RepoRef, write: &FileWrite) -> Result<CommitSha, PromoteError> {
        let mut st = self.state();
        st.calls.push("write_file".into());
        if st.pending_write_conflicts > 0 {
            st.pending_write_conflicts -= 1;
            return Err(PromoteError::conflict(format!("{} does not match", write.path)));
        }
        let head = st
            .branches
            .get(&write.branch.0)
            .cloned()
            .ok_or_else(|| PromoteError::not_found(format!("branch {}", write.branch)))?;
        let mut tree = st.commits.get(&head.0).cloned().unwrap_or_default();
        let current = tree.get(&write.path).map(|c| content_digest(c));
        if current.as_deref() != Some(write.expected_sha.as_str()) {
            return Err(PromoteError::conflict(format!("{} does not match", write.path)));
        }
        tree.insert(write.path.clone(), write.content.clone());
        let sha = st.new_commit(tree);
        st.branches.insert(write.branch.0.clone(), sha.clone());
        Ok(sha)
    }

    async fn list_open_proposals(
        &self,
        _repo: &RepoRef,
        branch: &BranchName,
        base: &str,
    ) -> Result<Vec<ChangeProposal>, PromoteError> {
        let st = self.state();
        let mut out: Vec<ChangeProposal> = st
            .proposals
            .iter()
            .filter(|p| &p.branch == branch && p.base_branch == base && p.state == ProposalState::Open)
            .cloned()
            .collect();
        for p in &mut out {
            st.refresh(p);
        }
        Ok(out)
    }

    async fn create_proposal(
        &self,
        _repo: &RepoRef,
        proposal: &NewProposal,
    ) -> Result<ChangeProposal, PromoteError> {
        let mut st = self.state();
        st.calls.push("create_proposal".into());
        let duplicate = st.proposals.iter().any(|p| {
            p.branch == proposal.head && p.base_branch == proposal.base && p.state == ProposalState::Open
        });
        if duplicate {
            return Err(api(422, "A pull request already exists"));
        }
        let head_sha = st
            .branches
            .get(&proposal.head.0)
            .cloned()
            .ok_or_else(|| api(422, "head branch does not exist"))?;
        st.next_proposal += 1;
        let number = st.next_proposal;
        let created = ChangeProposal {
            number,
            url: format!("https://github.test/pull/{number}"),
            branch: proposal.head.clone(),
            base_branch: proposal.base.clone(),
            head_sha,
            state: ProposalState::Open,
            author: self.login.clone(),
        };
        st.proposals.push(created.clone());
        Ok(created)
    }

    async fn get_proposal(&self, _repo: &RepoRef, number: u64) -> Result<ChangeProposal, PromoteError> {
        let st = self.state();
        let mut p = st
            .proposals
            .iter()
            .find(|p| p.number == number)
            .cloned()
            .ok_or_else(|| PromoteError::not_found(format!("PR #{number}")))?;
        st.refresh(&mut p);
        Ok(p)
    }

    async fn list_check_runs(
        &self,
        _repo: &RepoRef,
        _sha: &CommitSha,
    ) -> Result<Vec<CheckRun>, PromoteError> {
        let mut st = self.state();
        st.calls.push("list_check_runs".into());
        let runs = if st.check_script.len() > 1 {
            st.check_script.pop_front().unwrap_or_default()
        } else {
            st.check_script.front().cloned().unwrap_or_default()
        };
        Ok(runs)
    }

    async fn list_statuses(
        &self,
        _repo: &RepoRef,
        sha: &CommitSha,
    ) -> Result<Vec<CommitStatus>, PromoteError> {
        Ok(self.state().statuses.get(&sha.0).cloned().unwrap_or_default())
    }

    async fn create_status(
        &self,
        _repo: &RepoRef,
        sha: &CommitSha,
        status: &CommitStatus,
    ) -> Result<(), PromoteError> {
        let mut st = self.state();
        st.calls.push("create_status".into());
        let list = st.statuses.entry(sha.0.clone()).or_default();
        list.retain(|s| s.context != status.context);
        list.push(status.clone());
        Ok(())
    }

    async fn finalize_release(&self, _repo: &RepoRef, tag: &ReleaseTag) -> Result<(), PromoteError> {
        let mut st = self.state();
        st.calls.push("finalize_release".into());
        if !st.tags.contains_key(&tag.0) {
            return Err(PromoteError::not_found(format!("release {tag}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Reviewer for FakeForge {
    async fn approve(&self, _repo: &RepoRef, number: u64, _sha: &CommitSha) -> Result<(), PromoteError> {
        let mut st = self.state();
        st.calls.push("approve".into());
        if let Some(reason) = st.reject_approval.clone() {
            return Err(api(422, reason));
        }
        st.reviews.entry(number).or_default().push(Review {
            login: self.login.clone(),
            state: "APPROVED".into(),
        });
        Ok(())
    }

    async fn list_reviews(&self, _repo: &RepoRef, number: u64) -> Result<Vec<Review>, PromoteError> {
        Ok(self.state().reviews.get(&number).cloned().unwrap_or_default())
    }

    async fn squash_merge(
        &self,
        _repo: &RepoRef,
        request: &MergeRequest,
    ) -> Result<CommitSha, PromoteError> {
        let mut st = self.state();
        st.calls.push("merge".into());
        if let Some(reason) = st.reject_merge.clone() {
            return Err(api(405, reason));
        }
        let idx = st
            .proposals
            .iter()
            .position(|p| p.number == request.number)
            .ok_or_else(|| PromoteError::not_found(format!("PR #{}", request.number)))?;
        let mut proposal = st.proposals[idx].clone();
        st.refresh(&mut proposal);
        if proposal.state != ProposalState::Open {
            return Err(api(405, "Pull Request is not mergeable"));
        }
        if proposal.head_sha != request.sha {
            return Err(api(409, "Head branch was modified. Review and try the merge again."));
        }
        let tree = st.commits.get(&proposal.head_sha.0).cloned().unwrap_or_default();
        let merged = st.new_commit(tree);
        st.branches.insert(proposal.base_branch.clone(), merged.clone());
        st.proposals[idx].state = ProposalState::Merged;
        st.proposals[idx].head_sha = proposal.head_sha;
        Ok(merged)
    }
}

// ---------------------------------------------------------------------------
// FakeCluster
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ClusterState {
    pub snapshot: DeploymentSnapshot,
    pub replicas: usize,
    /// Images of earlier revisions, oldest first; `rollout_undo` pops from here.
    pub history: Vec<String>,
    /// Successive `rollout_progress` answers; the last one repeats. Empty means complete.
    pub progress_script: VecDeque<RolloutProgress>,
    /// Successive `list_pods` answers; the last one repeats. Empty means every
    /// replica runs the current image.
    pub pod_script: VecDeque<Vec<PodObservation>>,
    /// Replaces `pod_script` when `rollout_undo` runs.
    pub pods_after_undo: VecDeque<Vec<PodObservation>>,
    /// Upcoming non-dry-run `set_image` calls that lose a race with another writer.
    pub pending_conflicts: u32,
    pub calls: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    /// A deployment with one container `container` running `image`.
    pub fn new(container: &str, image: &str, replicas: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClusterState {
                snapshot: DeploymentSnapshot {
                    name: "deployment".into(),
                    resource_version: "100".into(),
                    revision: Some(1),
                    containers: vec![ContainerImage {
                        name: container.to_string(),
                        image: image.to_string(),
                    }],
                },
                replicas,
                history: Vec::new(),
                progress_script: VecDeque::new(),
                pod_script: VecDeque::new(),
                pods_after_undo: VecDeque::new(),
                pending_conflicts: 0,
                calls: Vec::new(),
            })),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, ClusterState> {
        lock(&self.state)
    }

    pub fn script_progress(&self, script: Vec<RolloutProgress>) {
        self.state().progress_script = script.into();
    }

    pub fn script_pods(&self, script: Vec<Vec<PodObservation>>) {
        self.state().pod_script = script.into();
    }

    pub fn script_pods_after_undo(&self, script: Vec<Vec<PodObservation>>) {
        self.state().pods_after_undo = script.into();
    }

    pub fn calls_named(&self, name: &str) -> usize {
        self.state().calls.iter().filter(|c| c.as_str() == name).count()
    }

    pub fn current_image(&self, container: &str) -> Option<String> {
        self.state().snapshot.image_of(container).map(str::to_owned)
    }
}

fn bump(version: &str) -> String {
    version
        .parse::<u64>()
        .map(|v| (v + 1).to_string())
        .unwrap_or_else(|_| format!("{version}+1"))
}

fn next_scripted<T: Clone>(script: &mut VecDeque<T>) -> Option<T> {
    if script.len() > 1 {
        script.pop_front()
    } else {
        script.front().cloned()
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn deployment(&self, _target: &DeploymentRef) -> Result<DeploymentSnapshot, PromoteError> {
        Ok(self.state().snapshot.clone())
    }

    async fn set_image(
        &self,
        _target: &DeploymentRef,
        update: &ImageUpdate,
    ) -> Result<DeploymentSnapshot, PromoteError> {
        let mut st = self.state();
        if update.dry_run {
            st.calls.push("set_image_dry_run".into());
        } else {
            st.calls.push("set_image".into());
            if st.pending_conflicts > 0 {
                st.pending_conflicts -= 1;
                let raced = bump(&st.snapshot.resource_version);
                st.snapshot.resource_version = raced;
            }
        }
        if st.snapshot.resource_version != update.expected_resource_version {
            return Err(PromoteError::conflict("deployment resourceVersion changed"));
        }
        let mut next = st.snapshot.clone();
        let Some(container) = next.containers.iter_mut().find(|c| c.name == update.container) else {
            return Err(PromoteError::not_found(format!("container {}", update.container)));
        };
        let old_image = std::mem::replace(&mut container.image, update.image.clone());
        // an identical image is a no-op patch: no new revision to undo
        if update.dry_run || old_image == update.image {
            return Ok(next);
        }
        next.resource_version = bump(&next.resource_version);
        next.revision = next.revision.map(|r| r + 1);
        st.history.push(old_image);
        st.snapshot = next.clone();
        Ok(next)
    }

    async fn rollout_progress(&self, _target: &DeploymentRef) -> Result<RolloutProgress, PromoteError> {
        let mut st = self.state();
        st.calls.push("rollout_progress".into());
        let desired = st.replicas as u32;
        Ok(next_scripted(&mut st.progress_script).unwrap_or(RolloutProgress {
            desired,
            updated: desired,
            available: desired,
            stale: 0,
            observed_latest: true,
            stalled_reason: None,
        }))
    }

    async fn list_pods(&self, target: &DeploymentRef) -> Result<Vec<PodObservation>, PromoteError> {
        let mut st = self.state();
        st.calls.push("list_pods".into());
        if let Some(pods) = next_scripted(&mut st.pod_script) {
            return Ok(pods);
        }
        let image = st.snapshot.image_of(&target.container).unwrap_or_default().to_string();
        Ok(running_pods(&target.name, st.replicas, &image))
    }

    async fn rollout_undo(&self, target: &DeploymentRef) -> Result<(), PromoteError> {
        let mut st = self.state();
        st.calls.push("rollout_undo".into());
        let Some(previous) = st.history.pop() else {
            return Err(PromoteError::not_found("previous revision"));
        };
        if let Some(c) = st
            .snapshot
            .containers
            .iter_mut()
            .find(|c| c.name == target.container)
        {
            c.image = previous;
        }
        let version = bump(&st.snapshot.resource_version);
        st.snapshot.resource_version = version;
        st.snapshot.revision = st.snapshot.revision.map(|r| r + 1);
        let after = std::mem::take(&mut st.pods_after_undo);
        st.pod_script = after;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeHealth
// ---------------------------------------------------------------------------

/// Scripted endpoint. `None` entries simulate a connection failure; the last
/// entry repeats; an empty script always answers 200.
#[derive(Debug, Clone, Default)]
pub struct FakeHealth {
    state: Arc<Mutex<(VecDeque<Option<u16>>, usize)>>,
}

impl FakeHealth {
    pub fn new(script: Vec<Option<u16>>) -> Self {
        Self {
            state: Arc::new(Mutex::new((script.into(), 0))),
        }
    }

    pub fn probes(&self) -> usize {
        lock(&self.state).1
    }
}

#[async_trait]
impl HealthProbe for FakeHealth {
    async fn probe(&self, url: &str) -> Result<u16, PromoteError> {
        let mut st = lock(&self.state);
        st.1 += 1;
        match next_scripted(&mut st.0) {
            None => Ok(200),
            Some(Some(code)) => Ok(code),
            Some(None) => Err(PromoteError::Api {
                status: None,
                message: format!("connection refused: {url}"),
            }),
        }
    }
}
