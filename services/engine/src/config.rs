//! Command-line and seed-file configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine;
use clap::{ArgAction, Parser};
use serde::Deserialize;
use tracing::info;

use crate::discovery::DiscoveryConfig;
use crate::inventory::{Integration, Inventory};
use crate::providers::ProviderKind;

/// IDQL Orchestrator - keeps application inventory and provider policy in sync
#[derive(Parser, Debug, Clone)]
#[command(name = "orchestrator", version, about)]
pub struct Cli {
    /// Integration seed file (JSON)
    #[arg(long, env = "ORCHESTRATOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Discovery interval in seconds
    #[arg(long, default_value = "300", env = "DISCOVERY_INTERVAL")]
    pub interval: u64,

    /// Run one discovery pass and exit
    #[arg(long, default_value = "false")]
    pub once: bool,

    /// Prune applications of integrations that report no applications
    #[arg(long, default_value = "true", env = "PRUNE_EMPTY_DISCOVERIES", action = ArgAction::Set)]
    pub prune_empty_discoveries: bool,
}

impl Cli {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.interval.max(1))
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            prune_empty_discoveries: self.prune_empty_discoveries,
        }
    }
}

/// One integration in the seed file
#[derive(Debug, Clone, Deserialize)]
pub struct IntegrationSeed {
    pub name: String,
    pub provider: ProviderKind,
    /// Base64-encoded credential blob
    pub key: String,
}

impl IntegrationSeed {
    pub fn decode_key(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(self.key.trim())
            .with_context(|| format!("Integration {} has an invalid base64 key", self.name))
    }
}

#[derive(Debug, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub integrations: Vec<IntegrationSeed>,
}

impl SeedFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;

        serde_json::from_str(&raw).with_context(|| format!("Invalid seed file {}", path.display()))
    }
}

/// Register every seeded integration.
///
/// All keys are decoded before anything is inserted.
pub async fn seed_inventory(inventory: &Inventory, seed: &SeedFile) -> Result<Vec<Integration>> {
    let decoded = seed
        .integrations
        .iter()
        .map(|s| s.decode_key().map(|key| (s, key)))
        .collect::<Result<Vec<_>>>()?;

    let mut created = Vec::with_capacity(decoded.len());
    for (seed, key) in decoded {
        created.push(inventory.create_integration(&seed.name, seed.provider, key).await);
    }

    info!(count = created.len(), "Seeded integrations");
    Ok(created)
}
