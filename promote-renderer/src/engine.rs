//! Tera rendering engine: [`TemplateKind`] and [`Renderer`].
//!
//! | Kind            | Used for                                     |
//! |-----------------|----------------------------------------------|
//! | ProposalTitle   | pull request title                           |
//! | ProposalBody    | pull request body                            |
//! | CommitMessage   | descriptor commit on the release branch      |
//! | MergeTitle      | squash-merge commit title                    |
//! | MergeMessage    | squash-merge commit body                     |
//! | Summary         | Markdown run summary (`$GITHUB_STEP_SUMMARY`) |

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tera::Tera;

use promote_core::Outcome;

use crate::context::{ProposalContext, SummaryContext};
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("proposal_title.tera", include_str!("templates/proposal_title.tera")),
    ("proposal_body.tera", include_str!("templates/proposal_body.tera")),
    ("commit_message.tera", include_str!("templates/commit_message.tera")),
    ("merge_title.tera", include_str!("templates/merge_title.tera")),
    ("merge_message.tera", include_str!("templates/merge_message.tera")),
    ("summary.md.tera", include_str!("templates/summary.md.tera")),
];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io {
        path: path.into(),
        source,
    }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

/// `.tera` files directly inside `dir`, keyed by normalised file name.
fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    let mut templates = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("tera") {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        let name = normalize_template_name(Path::new(file_name));
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((name, contents));
    }
    Ok(templates)
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = TPLS
        .iter()
        .map(|(name, content)| (name.to_string(), content.to_string()))
        .collect();
    if let Some(dir) = user_template_dir {
        for (name, content) in load_user_templates(dir)? {
            tracing::debug!(template = %name, dir = %dir.display(), "template override");
            templates.insert(name, content);
        }
    }

    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);
    tera.add_raw_templates(templates.into_iter().collect::<Vec<_>>())?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// TemplateKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    ProposalTitle,
    ProposalBody,
    CommitMessage,
    MergeTitle,
    MergeMessage,
    Summary,
}

impl TemplateKind {
    pub fn all() -> &'static [TemplateKind] {
        &[
            TemplateKind::ProposalTitle,
            TemplateKind::ProposalBody,
            TemplateKind::CommitMessage,
            TemplateKind::MergeTitle,
            TemplateKind::MergeMessage,
            TemplateKind::Summary,
        ]
    }

    pub fn template_name(&self) -> &'static str {
        match self {
            TemplateKind::ProposalTitle => "proposal_title.tera",
            TemplateKind::ProposalBody  => "proposal_body.tera",
            TemplateKind::CommitMessage => "commit_message.tera",
            TemplateKind::MergeTitle    => "merge_title.tera",
            TemplateKind::MergeMessage  => "merge_message.tera",
            TemplateKind::Summary       => "summary.md.tera",
        }
    }

    /// Single-line outputs are trimmed; multi-line ones keep one trailing newline.
    fn is_single_line(&self) -> bool {
        matches!(
            self,
            TemplateKind::ProposalTitle | TemplateKind::CommitMessage | TemplateKind::MergeTitle
        )
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Embedded templates plus optional overrides. Create once and reuse.
///
/// An override directory may hold `.tera` files named like the embedded
/// templates (`proposal_body.tera`, `summary.md.tera`, ...); each replaces
/// its default.
pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    pub fn new() -> Result<Self, RenderError> {
        Self::with_overrides(None)
    }

    pub fn with_overrides(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        Ok(Renderer {
            tera: build_tera(user_template_dir)?,
        })
    }

    fn render(&self, kind: TemplateKind, ctx: &tera::Context) -> Result<String, RenderError> {
        let raw = self.tera.render(kind.template_name(), ctx)?;
        let out = raw.replace("\r\n", "\n");
        if kind.is_single_line() {
            Ok(out.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or_default().to_string())
        } else {
            Ok(format!("{}\n", out.trim_end()))
        }
    }

    pub fn render_proposal(
        &self,
        kind: TemplateKind,
        ctx: &ProposalContext,
    ) -> Result<String, RenderError> {
        self.render(kind, &ctx.to_tera_context()?)
    }

    pub fn proposal_title(&self, ctx: &ProposalContext) -> Result<String, RenderError> {
        self.render_proposal(TemplateKind::ProposalTitle, ctx)
    }

    pub fn proposal_body(&self, ctx: &ProposalContext) -> Result<String, RenderError> {
        self.render_proposal(TemplateKind::ProposalBody, ctx)
    }

    pub fn commit_message(&self, ctx: &ProposalContext) -> Result<String, RenderError> {
        self.render_proposal(TemplateKind::CommitMessage, ctx)
    }

    /// `(title, message)` for the squash-merge commit. `ctx.number` must be set.
    pub fn merge_commit(&self, ctx: &ProposalContext) -> Result<(String, String), RenderError> {
        Ok((
            self.render_proposal(TemplateKind::MergeTitle, ctx)?,
            self.render_proposal(TemplateKind::MergeMessage, ctx)?,
        ))
    }

    pub fn summary(&self, outcome: &Outcome) -> Result<String, RenderError> {
        let ctx = SummaryContext::from_outcome(outcome);
        self.render(TemplateKind::Summary, &ctx.to_tera_context()?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use promote_core::types::{CommitSha, Environment, Release, ReleaseTag, RepoRef};
    use promote_core::EnvironmentDescriptor;

    fn ctx() -> ProposalContext {
        let release = Release {
            tag: ReleaseTag::from("1.2.3"),
            commit: CommitSha::from("0123456789abcdef"),
            environment: Environment::PreProd,
            skip_merge: false,
            delete_branch: false,
            finalize: false,
        };
        let descriptor =
            EnvironmentDescriptor::parse("IMAGE_NAME=registry/api\nIMAGE_VERSION=1.2.2\n");
        ProposalContext::new(&release, &RepoRef::new("acme", "api"), "envs/pre-prod.env", &descriptor)
    }

    #[test]
    fn renderer_new_succeeds() {
        Renderer::new().expect("Renderer::new should succeed with embedded templates");
    }

    #[test]
    fn proposal_title_names_environment_and_tag() {
        let r = Renderer::new().unwrap();
        assert_eq!(r.proposal_title(&ctx()).unwrap(), "Update PRE-PROD image tag with 1.2.3");
    }

    #[test]
    fn commit_message_names_the_descriptor() {
        let r = Renderer::new().unwrap();
        assert_eq!(
            r.commit_message(&ctx()).unwrap(),
            "Update PRE-PROD (envs/pre-prod.env) with image tag 1.2.3"
        );
    }

    #[test]
    fn proposal_body_shows_previous_and_new_image() {
        let r = Renderer::new().unwrap();
        let body = r.proposal_body(&ctx()).unwrap();
        assert!(body.contains("`registry/api:1.2.3`"), "{body}");
        assert!(body.contains("`1.2.2`"), "{body}");
        assert!(body.contains("`0123456`"), "{body}");
        assert!(body.ends_with('\n') && !body.ends_with("\n\n"));
    }

    #[test]
    fn merge_commit_carries_the_number() {
        let r = Renderer::new().unwrap();
        let (title, message) = r.merge_commit(&ctx().with_number(42)).unwrap();
        assert_eq!(title, "Update PRE-PROD image tag with 1.2.3 (#42)");
        assert!(message.contains("0123456"));
    }

    #[test]
    fn every_kind_has_an_embedded_template() {
        for kind in TemplateKind::all() {
            assert!(
                TPLS.iter().any(|(name, _)| *name == kind.template_name()),
                "missing template for {kind:?}"
            );
        }
    }

    #[test]
    fn no_crlf_in_rendered_output() {
        let r = Renderer::new().unwrap();
        for out in [
            r.proposal_title(&ctx()).unwrap(),
            r.proposal_body(&ctx()).unwrap(),
            r.commit_message(&ctx()).unwrap(),
        ] {
            assert!(!out.contains('\r'));
        }
    }
}
