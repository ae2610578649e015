//! IDQL Orchestrator
//!
//! Seeds the integration inventory and keeps application discovery running.
//! With `--once`, runs a single discovery pass and exits.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use idql_orchestrator::config::{seed_inventory, Cli, SeedFile};
use idql_orchestrator::discovery::IntegrationFinder;
use idql_orchestrator::providers::policy_agent::FsBundleClient;
use idql_orchestrator::providers::PolicyAgentAdapter;
use idql_orchestrator::{DiscoveryWorker, Integration, Inventory, ProviderRegistry, Scheduler};

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .json()
        .init();

    let cli = Cli::parse();

    info!(
        interval = cli.interval,
        once = cli.once,
        prune_empty_discoveries = cli.prune_empty_discoveries,
        "Starting IDQL Orchestrator"
    );

    let inventory = Inventory::new();
    match &cli.config {
        Some(path) => {
            let seed = SeedFile::load(path)?;
            seed_inventory(&inventory, &seed).await?;
        }
        None => warn!("No seed file configured, inventory starts empty"),
    }

    let bundles = PolicyAgentAdapter::new(Arc::new(FsBundleClient::new()));
    let registry = Arc::new(ProviderRegistry::new().with(Arc::new(bundles)));
    info!(providers = ?registry.providers(), "Provider adapters ready");

    let worker = Arc::new(DiscoveryWorker::new(
        inventory.clone(),
        registry,
        cli.discovery_config(),
    ));
    let scheduler = Arc::new(
        Scheduler::<Integration>::new(Arc::new(IntegrationFinder::new(inventory.clone())), cli.period())
            .with_worker(worker.clone()),
    );

    if cli.once {
        match scheduler.tick().await {
            Some(true) => info!("Discovery pass complete"),
            Some(false) => anyhow::bail!("Discovery pass failed"),
            None => anyhow::bail!("Discovery pass could not find work"),
        }
        if let Some(report) = worker.last_report().await {
            info!(report = %serde_json::to_string(&report)?, "Discovery report");
        }
        return Ok(());
    }

    scheduler.start().await;

    let signals = scheduler.signals();
    tokio::spawn(async move {
        while let Ok(ok) = signals.recv().await {
            if !ok {
                error!("Discovery tick failed");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    scheduler.stop().await;

    Ok(())
}
