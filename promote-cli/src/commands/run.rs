//! `promote run`: the mutating promotion.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use promote_core::{abort_pair, CommitSha, Environment, Outcome, StepResult, TerminalStatus};
use promote_renderer::{describe_merge, Renderer};
use promote_rollout::KubectlCluster;
use promote_runtime::{
    append_summary, block_on, outcome_json, run_with_ctrl_c, summary_destination, Clients,
    Orchestrator, ReleaseRequest,
};

use super::TokenArgs;

/// Arguments for `promote run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Release tag in the source repository.
    #[arg(long)]
    pub tag: String,

    /// Target environment.
    #[arg(long = "env", value_name = "ENV")]
    pub environment: Environment,

    /// Release commit; resolved from the tag when omitted.
    #[arg(long, value_name = "SHA")]
    pub commit: Option<String>,

    /// Leave the proposal open after checks pass.
    #[arg(long, overrides_with = "no_skip_merge")]
    pub skip_merge: bool,

    /// Merge even if the environment skips merges by default.
    #[arg(long, overrides_with = "skip_merge")]
    pub no_skip_merge: bool,

    /// Delete the release branch after merging.
    #[arg(long)]
    pub delete_branch: bool,

    /// Mark the source release final once the rollout succeeds.
    #[arg(long)]
    pub finalize: bool,

    /// Append the Markdown summary here (default: $GITHUB_STEP_SUMMARY).
    #[arg(long, value_name = "PATH")]
    pub summary: Option<PathBuf>,

    /// Print the outcome as JSON instead of a table.
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub tokens: TokenArgs,
}

impl RunArgs {
    fn skip_merge_override(&self) -> Option<bool> {
        match (self.skip_merge, self.no_skip_merge) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }

    pub fn run(self, config_path: Option<&Path>) -> Result<ExitCode> {
        let config = super::load_config(config_path)?;
        let env = config.environment(self.environment)?;
        let source = self.tokens.proposer(&config)?;
        let reviewer = self.tokens.merger(&config)?;
        let cluster = KubectlCluster::new(env.kube_context.clone());
        let health = super::health_probe(&config)?;
        let renderer = Renderer::with_overrides(config.templates_dir.as_deref())
            .context("failed to load message templates")?;

        let request = ReleaseRequest {
            tag: self.tag.as_str().into(),
            environment: self.environment,
            commit: self.commit.as_deref().map(CommitSha::from),
            skip_merge: self.skip_merge_override(),
            delete_branch: self.delete_branch,
            finalize: self.finalize,
        };

        let (abort, signal) = abort_pair();
        let outcome = block_on(async {
            let clients = Clients {
                source: &source,
                reviewer: &reviewer,
                cluster: &cluster,
                health: &health,
            };
            let orchestrator = Orchestrator::new(clients, &config, &renderer, signal);
            run_with_ctrl_c(abort, orchestrator.promote(request)).await
        })??;

        if let Some(path) = summary_destination(self.summary.as_deref()) {
            append_summary(&renderer, &outcome, &path)
                .with_context(|| format!("failed to write summary to {}", path.display()))?;
        }

        if self.json {
            println!("{}", outcome_json(&outcome).context("failed to serialize outcome")?);
        } else {
            print_outcome(&outcome);
        }
        Ok(ExitCode::from(exit_status(outcome.status)))
    }
}

/// 0 only for SUCCEEDED.
pub fn exit_status(status: TerminalStatus) -> u8 {
    match status {
        TerminalStatus::Succeeded => 0,
        TerminalStatus::ChecksFailed
        | TerminalStatus::MergeFailed
        | TerminalStatus::RolloutFailedRolledBack => 1,
        TerminalStatus::Fatal => 2,
        TerminalStatus::Aborted => 130,
    }
}

#[derive(Tabled)]
struct TraceRow {
    #[tabled(rename = "time")]
    time: String,
    #[tabled(rename = "step")]
    step: String,
    #[tabled(rename = "result")]
    result: String,
    #[tabled(rename = "detail")]
    detail: String,
}

fn print_outcome(outcome: &Outcome) {
    let status = outcome.status.as_str();
    let status = if outcome.status.is_success() {
        status.green().bold()
    } else {
        status.red().bold()
    };
    println!(
        "Release {} → {} | {} | merge: {}",
        outcome.release.tag.to_string().bold(),
        outcome.release.environment,
        status,
        describe_merge(&outcome.merge),
    );

    let rows: Vec<TraceRow> = outcome
        .trace
        .iter()
        .map(|entry| TraceRow {
            time: entry.at.format("%H:%M:%S").to_string(),
            step: entry.step.to_string(),
            result: result_label(entry.result),
            detail: entry.detail.clone(),
        })
        .collect();
    if !rows.is_empty() {
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    if let Some(failure) = &outcome.failure {
        println!("{} {}: {}", "✗".red().bold(), failure.step, failure.error);
        if let Some(observed) = &failure.last_observed {
            println!("  last observed: {observed}");
        }
    }
}

fn result_label(result: StepResult) -> String {
    let label = result.to_string();
    match result {
        StepResult::Ok => label.green().to_string(),
        StepResult::Skipped => label.bright_black().to_string(),
        StepResult::Warning => label.yellow().to_string(),
        StepResult::Failed => label.red().to_string(),
    }
}
