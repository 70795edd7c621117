//! # Flowhook — addon hook engine CLI
//!
//! Loads the bundled addon into an [`AddonHost`] and exercises it without a
//! live proxy in front.
//!
//! Usage:
//!   flowhook replay flows.json            # Dispatch recorded flows
//!   flowhook check DOMAIN-SUFFIX,a.com x.a.com b.com
//!   flowhook run --for-secs 60            # Run the job scheduler
//!   flowhook status                       # Loaded addons, hooks and jobs

mod demo;
mod replay;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use flowhook_core::FlowhookConfig;
use flowhook_host::AddonHost;
use flowhook_rules::ConditionRule;

#[derive(Parser)]
#[command(
    name = "flowhook",
    version,
    about = "🪝 Flowhook — addon hook dispatch, rule matching and job scheduling"
)]
struct Cli {
    /// Config file (default: ~/.flowhook/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dispatch a JSON array of recorded flows through the loaded addons
    Replay {
        /// Path to the flows file
        file: PathBuf,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Parse a condition rule and test hosts against it
    Check {
        /// Rule, e.g. DOMAIN-SUFFIX,misskey-hub.net
        rule: String,
        /// Hosts to test
        hosts: Vec<String>,
    },

    /// Run the job scheduler for a while (Ctrl-C stops early)
    Run {
        #[arg(long, default_value = "60")]
        for_secs: u64,
    },

    /// Show loaded addons and their jobs
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The `flowhook` prefix also covers the flowhook_* library targets.
    let filter = if cli.verbose { "flowhook=debug" } else { "flowhook=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    if let Command::Check { rule, hosts } = &cli.command {
        return check(rule, hosts);
    }

    let (config, config_path) = match &cli.config {
        Some(path) => {
            let path = PathBuf::from(shellexpand::tilde(path).to_string());
            let config = if path.exists() {
                FlowhookConfig::load_from(&path)?
            } else {
                FlowhookConfig::default()
            };
            (config, path)
        }
        None => (FlowhookConfig::load()?, FlowhookConfig::default_path()),
    };

    let host = Arc::new(AddonHost::from_config(config, Some(config_path)));
    host.load(demo::TestAddon::new())?;

    match cli.command {
        Command::Replay { file, json } => {
            let records = replay::load_flows(&file)?;
            let (_, summary) = replay::replay(host.clone(), records).await;
            host.shutdown().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("🪝 Replayed {} flows", summary.flows);
                println!("   Matched:  {}", summary.matched);
                println!("   Invoked:  {}", summary.invoked);
                println!("   Failed:   {}", summary.failed);
                println!("   Disabled: {}", summary.skipped_disabled);
                if summary.refused > 0 || summary.cancelled > 0 {
                    println!("   ⚠️  Refused: {}, cancelled: {}", summary.refused, summary.cancelled);
                }
            }
        }
        Command::Run { for_secs } => {
            let cancel = CancellationToken::new();
            let handle = host.start_scheduler(cancel.clone());
            println!("⏰ Scheduler running for {for_secs}s (Ctrl-C to stop)");
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(for_secs)) => {}
                _ = tokio::signal::ctrl_c() => println!("\nStopping..."),
            }
            cancel.cancel();
            handle.await?;
            print_jobs(&host);
        }
        Command::Status => {
            for status in host.status() {
                let flag = if status.enabled { "✅" } else { "⏸️ " };
                println!(
                    "{flag} {} v{} (order {}) — {} hooks, {} jobs, running: {}",
                    status.name, status.version, status.order, status.hooks, status.jobs, status.running
                );
            }
            for rejected in host.registry().rejected() {
                println!(
                    "⚠️  {} {}: rejected '{}' ({})",
                    rejected.addon, rejected.event, rejected.condition, rejected.error
                );
            }
            print_jobs(&host);
        }
        Command::Check { .. } => {}
    }

    Ok(())
}

fn check(rule: &str, hosts: &[String]) -> Result<()> {
    let rule = ConditionRule::parse(rule)
        .map_err(|e| anyhow::anyhow!("Invalid rule '{rule}': {e}"))?;
    println!("📐 {rule}");
    for host in hosts {
        let mark = if rule.matches_host(host) { "✅" } else { "❌" };
        println!("   {mark} {host}");
    }
    Ok(())
}

fn print_jobs(host: &AddonHost) {
    for job in host.scheduler().jobs() {
        let next = job
            .next_run
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".into());
        println!(
            "📅 {} [{}] {:?} next: {} runs: {}{}",
            job.key,
            job.trigger,
            job.status,
            next,
            job.run_count,
            job.last_error
                .map(|e| format!(" last error: {e}"))
                .unwrap_or_default()
        );
    }
}
