//! `promote plan`: descriptor diff plus a server-side dry run of the image
//! update. Read-only: no commit, no proposal, no cluster change.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use promote_core::{AbortSignal, Environment, ReleaseTag};
use promote_rollout::{KubectlCluster, RolloutController};
use promote_runtime::{block_on, rollout_settings};
use promote_sync::plan_descriptor;

use super::TokenArgs;

/// Arguments for `promote plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Release tag in the source repository.
    #[arg(long)]
    pub tag: String,

    /// Target environment.
    #[arg(long = "env", value_name = "ENV")]
    pub environment: Environment,

    /// Skip the cluster dry run and only show the descriptor diff.
    #[arg(long)]
    pub no_cluster: bool,

    #[command(flatten)]
    pub tokens: TokenArgs,
}

impl PlanArgs {
    pub fn run(self, config_path: Option<&Path>) -> Result<()> {
        let config = super::load_config(config_path)?;
        let env = config.environment(self.environment)?;
        let source = self.tokens.proposer(&config)?;
        let tag = ReleaseTag::from(self.tag.as_str());

        block_on(async {
            let plan = plan_descriptor(
                &source,
                &config.config_repo,
                &config.base_branch,
                self.environment,
                &env.descriptor_path,
                &tag,
            )
            .await
            .with_context(|| format!("failed to plan {}", env.descriptor_path))?;

            if plan.is_noop() {
                println!(
                    "{} {} already at {}",
                    "·".bright_black(),
                    plan.path,
                    plan.desired_version
                );
            } else {
                print!("{}", plan.unified_diff);
                if !plan.unified_diff.ends_with('\n') {
                    println!();
                }
            }

            if self.no_cluster {
                return Ok(());
            }

            let target = plan.updated.deployment_ref(env.namespace.clone())?;
            let image = plan
                .updated
                .image_reference()
                .context("descriptor has no IMAGE_NAME")?;
            let cluster = KubectlCluster::new(env.kube_context.clone());
            let health = super::health_probe(&config)?;
            let controller = RolloutController::new(
                &cluster,
                &health,
                rollout_settings(&config, env),
                AbortSignal::never(),
            );
            let rollout = controller
                .plan(&target, &image)
                .await
                .with_context(|| format!("dry run against deployment {target} failed"))?;

            if rollout.is_noop() {
                println!("{} {target} already runs {image}", "·".bright_black());
            } else {
                println!(
                    "{} {target}: {} → {} (server dry run accepted)",
                    "~".yellow(),
                    rollout.current_image().unwrap_or("<none>"),
                    image
                );
            }
            Ok::<(), anyhow::Error>(())
        })?
    }
}
