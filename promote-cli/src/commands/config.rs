//! `promote config`: configuration inspection.

use std::path::Path;

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use promote_core::{PollPolicy, PromoteConfig};

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Load and validate the configuration, then print the environments.
    Check,
}

pub fn run(command: ConfigCommand, config_path: Option<&Path>) -> Result<()> {
    match command {
        ConfigCommand::Check => check(config_path),
    }
}

#[derive(Tabled)]
struct EnvironmentRow {
    #[tabled(rename = "environment")]
    environment: String,
    #[tabled(rename = "descriptor")]
    descriptor: String,
    #[tabled(rename = "namespace")]
    namespace: String,
    #[tabled(rename = "context")]
    context: String,
    #[tabled(rename = "health")]
    health: String,
    #[tabled(rename = "skip merge")]
    skip_merge: String,
}

fn check(config_path: Option<&Path>) -> Result<()> {
    let path = super::config_path(config_path)?;
    let config = super::load_config(Some(&path))?;
    println!("{} {}", "✓".green().bold(), path.display());
    print_config(&config);
    Ok(())
}

fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

fn policy(p: PollPolicy) -> String {
    format!("every {}s, {} attempts", p.interval_secs, p.max_attempts)
}

fn print_config(config: &PromoteConfig) {
    println!("source repo:  {}", config.source_repo);
    println!("config repo:  {} ({})", config.config_repo, config.base_branch);
    println!("api:          {}", config.api_base_url);
    let required = if config.checks.required.is_empty() {
        "all reported checks".to_string()
    } else {
        config.checks.required.join(", ")
    };
    println!("checks:       {required}; {}", policy(config.checks.poll));
    println!("rollout:      {}", policy(config.rollout.progress));
    println!("pods:         {}", policy(config.rollout.pods));
    println!("health:       {}", policy(config.health.poll));

    let rows: Vec<EnvironmentRow> = config
        .environments
        .iter()
        .map(|(env, cfg)| EnvironmentRow {
            environment: env.to_string(),
            descriptor: cfg.descriptor_path.clone(),
            namespace: or_dash(cfg.namespace.as_deref()),
            context: or_dash(cfg.kube_context.as_deref()),
            health: or_dash(cfg.health_url.as_deref()),
            skip_merge: if cfg.skip_merge { "yes" } else { "no" }.to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
