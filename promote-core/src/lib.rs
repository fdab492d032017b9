//! Promote core library: domain types, the environment descriptor, errors,
//! configuration, bounded polling and the seams to source control and the
//! cluster.
//!
//! - [`types`]: newtypes and domain structs
//! - [`descriptor`]: lossless `KEY=value` descriptor editing
//! - [`error`]: [`PromoteError`], [`ConfigError`]
//! - [`config`]: `~/.promote/config.yaml`
//! - [`poll`]: [`PollPolicy`], [`Poller`], abort signalling
//! - [`forge`] / [`cluster`]: traits the adapters implement
//! - [`outcome`]: rollout state machine, step trace, terminal outcome

pub mod cluster;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod forge;
pub mod outcome;
pub mod poll;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod fakes;

pub use cluster::{Cluster, HealthProbe};
pub use config::{EnvironmentConfig, PromoteConfig};
pub use descriptor::EnvironmentDescriptor;
pub use error::{ConfigError, PromoteError};
pub use forge::{Identity, Reviewer, SourceControl};
pub use outcome::{
    FailureDetail, MergeRecord, Outcome, RolloutPhase, RolloutState, Step, StepResult,
    TerminalStatus, TraceEntry,
};
pub use poll::{abort_pair, AbortHandle, AbortSignal, PollOutcome, PollPolicy, Poller};
pub use types::{
    BranchName, ChangeProposal, CheckRun, CheckState, CommitSha, CommitStatus, DeploymentRef,
    DeploymentSnapshot, Environment, PodObservation, PodPhase, Release, ReleaseTag, RepoRef,
    RolloutProgress,
};
