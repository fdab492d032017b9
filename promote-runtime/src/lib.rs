//! # promote-runtime
//!
//! Drives one release through the sync and rollout components and owns the
//! process plumbing around it: tracing, the tokio runtime, Ctrl-C abort, and
//! outcome reporting.

mod error;
pub mod orchestrator;
mod runtime;
pub mod summary;

pub use error::RuntimeError;
pub use orchestrator::{rollout_settings, rollout_target, Clients, Orchestrator, ReleaseRequest};
pub use runtime::{block_on, init_tracing, run_with_ctrl_c};
pub use summary::{append_summary, outcome_json, summary_destination, STEP_SUMMARY_ENV};
