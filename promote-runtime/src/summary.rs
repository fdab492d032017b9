//! Outcome reporting: Markdown step summary and JSON.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use promote_core::Outcome;
use promote_renderer::Renderer;

use crate::error::{io_err, RuntimeError};

/// Environment variable GitHub Actions sets to the job summary file.
pub const STEP_SUMMARY_ENV: &str = "GITHUB_STEP_SUMMARY";

/// `explicit`, else `$GITHUB_STEP_SUMMARY`, else nowhere.
pub fn summary_destination(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit.map(Path::to_path_buf).or_else(|| {
        std::env::var_os(STEP_SUMMARY_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    })
}

/// Append the rendered summary to `path`, creating it if needed.
pub fn append_summary(
    renderer: &Renderer,
    outcome: &Outcome,
    path: &Path,
) -> Result<(), RuntimeError> {
    let markdown = renderer.summary(outcome)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err(path, e))?;
    file.write_all(markdown.as_bytes())
        .map_err(|e| io_err(path, e))?;
    if !markdown.ends_with('\n') {
        file.write_all(b"\n").map_err(|e| io_err(path, e))?;
    }
    tracing::info!(path = %path.display(), "wrote release summary");
    Ok(())
}

pub fn outcome_json(outcome: &Outcome) -> Result<String, RuntimeError> {
    Ok(serde_json::to_string_pretty(outcome)?)
}
