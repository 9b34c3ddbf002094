//! Switchboard CLI
//!
//! # Usage
//!
//! ```bash
//! # Route 500 simulated requests through the built-in fleet
//! switchboard simulate --requests 500 --tier balanced
//!
//! # Same, learning across runs
//! switchboard --snapshot ./state.json simulate --requests 500
//!
//! # Inspect what was learned
//! switchboard --snapshot ./state.json stats --tier fast
//! switchboard --snapshot ./state.json rank --tier deep
//!
//! # Custom fleet, overrides from the environment
//! SWITCHBOARD_EPSILON=0.05 switchboard --config fleet.toml validate
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::info;

use switchboard::persistence::spawn_writer;
use switchboard::{
    AdaptiveRouter, CandidateId, JsonFileStore, SharedRouter, SnapshotStore, StatsScope, Tier,
    WriterCadence,
};
use switchboard_cli::{SimulatedBackend, SimulationSummary, SwitchboardConfig};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Fleet and router configuration (TOML); the built-in fleet when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Snapshot file for learned state (overrides persistence.path)
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Route simulated requests through the fleet
    Simulate {
        #[arg(long, default_value_t = 100)]
        requests: u64,

        #[arg(long, default_value = "balanced")]
        tier: String,

        /// Requests in flight at once
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },
    /// Show the current ranking of a tier
    Rank {
        #[arg(long)]
        tier: String,
    },
    /// Print learned statistics for a tier, a candidate, or everything
    Stats {
        #[arg(long, conflicts_with = "candidate")]
        tier: Option<String>,

        #[arg(long)]
        candidate: Option<String>,
    },
    /// Check a configuration and exit
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = SwitchboardConfig::load(args.config.as_deref())?;
    if let Some(path) = args.snapshot {
        config.router.persistence.path = Some(path);
    }

    match args.command {
        Command::Validate => {
            info!(
                candidates = config.candidates.len(),
                tiers = config.router.tier_weights.len(),
                "Configuration is valid"
            );
            print_json(&config)?;
        }
        Command::Rank { tier } => {
            let (router, _) = build_router(&config)?;
            print_json(&router.rank(&Tier::from(tier))?)?;
        }
        Command::Stats { tier, candidate } => {
            let (router, _) = build_router(&config)?;
            let scope = match (tier, candidate) {
                (Some(tier), _) => StatsScope::Tier(Tier::from(tier)),
                (None, Some(id)) => StatsScope::Candidate(CandidateId::from(id)),
                (None, None) => StatsScope::Global,
            };
            print_json(&router.get_stats(&scope)?)?;
        }
        Command::Simulate {
            requests,
            tier,
            concurrency,
        } => {
            let (router, store) = build_router(&config)?;
            let writer = store.map(|store| {
                let cadence = WriterCadence::from(&config.router.persistence);
                spawn_writer(Arc::clone(&router), store, cadence)
            });

            let tier = Tier::from(tier);
            let summary = simulate(&router, &tier, requests, concurrency).await?;
            info!(
                requests = summary.requests,
                succeeded = summary.succeeded,
                failed = summary.failed,
                attempts = summary.total_attempts,
                "Simulation finished"
            );

            if let Some(writer) = writer {
                writer.shutdown().await;
            }
            print_json(&json!({
                "summary": summary,
                "success_rate": summary.success_rate(),
                "stats": router.get_stats(&StatsScope::Tier(tier))?,
            }))?;
        }
    }

    Ok(())
}

/// Router over simulated backends, hydrated from the snapshot if one is configured.
fn build_router(config: &SwitchboardConfig) -> Result<(SharedRouter, Option<Arc<dyn SnapshotStore>>)> {
    let backend = Arc::new(SimulatedBackend::new(&config.candidates, config.router.seed));
    let router = AdaptiveRouter::new(config.router.clone(), backend)?.shared();

    let store: Option<Arc<dyn SnapshotStore>> = config
        .router
        .persistence
        .path
        .as_ref()
        .map(|path| Arc::new(JsonFileStore::new(path)) as Arc<dyn SnapshotStore>);
    if let Some(store) = &store {
        router
            .load_from(store.as_ref())
            .with_context(|| format!("Failed to load snapshot from {}", store.describe()))?;
    }
    config.register_fleet(&router)?;
    Ok((router, store))
}

async fn simulate(
    router: &SharedRouter,
    tier: &Tier,
    requests: u64,
    concurrency: usize,
) -> Result<SimulationSummary> {
    let next = Arc::new(AtomicU64::new(0));
    let mut workers = JoinSet::new();
    for _ in 0..concurrency.max(1) {
        let router = Arc::clone(router);
        let tier = tier.clone();
        let next = Arc::clone(&next);
        workers.spawn(async move {
            let mut reports = Vec::new();
            loop {
                let n = next.fetch_add(1, Ordering::Relaxed);
                if n >= requests {
                    break;
                }
                reports.push(router.execute_default(&tier, json!({ "request": n })).await);
            }
            reports
        });
    }

    let mut summary = SimulationSummary::default();
    while let Some(joined) = workers.join_next().await {
        for report in joined.context("Simulation worker panicked")? {
            summary.observe(&report);
        }
    }
    Ok(summary)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
