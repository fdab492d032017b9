//! # promote-rollout
//!
//! Cluster side of a release: the `kubectl` adapter, the HTTP health probe,
//! and the rollout / rollback controllers that drive a deployment through
//! `APPLYING → ROLLING_OUT → VERIFYING → {SUCCEEDED | FAILED}`.

pub mod controller;
pub mod error;
pub mod health;
pub mod kubectl;

pub use controller::{RollbackController, RolloutController, RolloutPlan, RolloutSettings};
pub use error::KubectlError;
pub use health::HttpHealthProbe;
pub use kubectl::KubectlCluster;
