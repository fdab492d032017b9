//! # promote-sync
//!
//! Everything that happens in source control for one release: the
//! descriptor commit, the change proposal, check mirroring and the merge
//! gate. Each component borrows its client; none owns global state.

pub mod checks;
pub mod diff;
pub mod merge;
pub mod proposal;
pub mod store;

pub use checks::{CheckSettings, CheckSummary, CheckSync, CheckVerdict, ChecksPassed};
pub use diff::{descriptor_diff, plan_descriptor, DescriptorPlan};
pub use merge::MergeGate;
pub use proposal::{ProposalManager, ProposalSettings, ProposalUpdate};
pub use store::{DescriptorSnapshot, DescriptorStore};
