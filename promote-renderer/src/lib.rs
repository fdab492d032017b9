//! # promote-renderer
//!
//! Tera templates for everything the orchestrator writes for humans: pull
//! request title and body, commit messages, and the Markdown run summary.
//!
//! ```rust,no_run
//! use promote_renderer::{ProposalContext, Renderer};
//!
//! fn title(ctx: &ProposalContext) -> Option<String> {
//!     Renderer::new().ok()?.proposal_title(ctx).ok()
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::{describe_merge, ProposalContext, SummaryContext};
pub use engine::{Renderer, TemplateKind};
pub use error::RenderError;
