//! Discovery Worker
//!
//! Full-reconciliation inventory sync: every integration is asked for its
//! current applications, results are upserted, then everything not seen in
//! the pass is pruned.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use super::scheduler::{WorkFinder, Worker};
use crate::fanout::fan_out;
use crate::inventory::{Integration, Inventory};
use crate::providers::ProviderRegistry;

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Prune applications of integrations that reported zero applications
    pub prune_empty_discoveries: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            prune_empty_discoveries: true,
        }
    }
}

/// Outcome of one discovery pass
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryReport {
    pub upserted: Vec<Uuid>,
    pub pruned: Vec<Uuid>,
    /// Aliases of integrations whose adapter could not be resolved or failed
    pub failed_integrations: Vec<String>,
    pub finished_at: DateTime<Utc>,
}

pub struct DiscoveryWorker {
    inventory: Inventory,
    registry: Arc<ProviderRegistry>,
    config: DiscoveryConfig,
    last_report: RwLock<Option<DiscoveryReport>>,
}

impl DiscoveryWorker {
    pub fn new(inventory: Inventory, registry: Arc<ProviderRegistry>, config: DiscoveryConfig) -> Self {
        Self {
            inventory,
            registry,
            config,
            last_report: RwLock::new(None),
        }
    }

    pub async fn last_report(&self) -> Option<DiscoveryReport> {
        self.last_report.read().await.clone()
    }

    /// Discover every integration, upsert the results, then prune.
    ///
    /// Pruning waits for every discovery call. Failed integrations are
    /// logged and their applications are not kept.
    pub async fn run_pass(&self, integrations: &[Integration]) -> DiscoveryReport {
        let outcome = fan_out(integrations.iter(), |integration| async move {
            let info = integration.info();
            let adapter = self.registry.resolve(&info)?;
            let apps = adapter
                .discover_applications(&info)
                .await
                .with_context(|| format!("Discovery failed for {}", integration.alias))?;
            Ok::<_, anyhow::Error>((integration, apps))
        })
        .await;

        let mut failed_integrations = Vec::new();
        for (integration, err) in &outcome.failed {
            warn!(
                integration = %integration.alias,
                provider = %integration.provider,
                error = %err,
                "Skipping integration for this discovery pass"
            );
            failed_integrations.push(integration.alias.clone());
        }

        let mut keep: HashSet<Uuid> = HashSet::new();
        let mut retained: HashSet<Uuid> = HashSet::new();
        let mut upserted = Vec::new();

        for (integration, apps) in outcome.succeeded {
            if apps.is_empty() && !self.config.prune_empty_discoveries {
                info!(integration = %integration.alias, "Empty discovery, keeping known applications");
                retained.insert(integration.id);
                continue;
            }

            for app in &apps {
                let record = self.inventory.upsert_application(integration.id, app).await;
                keep.insert(record.id);
                upserted.push(record.id);
            }
        }

        let pruned: Vec<Uuid> = self
            .inventory
            .prune_applications(&keep, &retained)
            .await
            .into_iter()
            .map(|app| {
                info!(alias = %app.alias, object_id = %app.object_id, "Pruned application");
                app.id
            })
            .collect();

        let report = DiscoveryReport {
            upserted,
            pruned,
            failed_integrations,
            finished_at: Utc::now(),
        };

        info!(
            upserted = report.upserted.len(),
            pruned = report.pruned.len(),
            failed = report.failed_integrations.len(),
            "Discovery pass complete"
        );

        *self.last_report.write().await = Some(report.clone());
        report
    }
}

#[async_trait]
impl Worker<Integration> for DiscoveryWorker {
    fn name(&self) -> &str {
        "discovery"
    }

    /// Fails only when every integration in a non-empty batch failed
    async fn run(&self, work: &[Integration]) -> Result<()> {
        let report = self.run_pass(work).await;
        if !work.is_empty() && report.failed_integrations.len() == work.len() {
            anyhow::bail!(
                "Discovery failed for every integration: {}",
                report.failed_integrations.join(", ")
            );
        }
        Ok(())
    }
}

/// Finds the integrations to discover on each tick
pub struct IntegrationFinder {
    inventory: Inventory,
}

impl IntegrationFinder {
    pub fn new(inventory: Inventory) -> Self {
        Self { inventory }
    }
}

#[async_trait]
impl WorkFinder<Integration> for IntegrationFinder {
    async fn find_work(&self) -> Result<Vec<Integration>> {
        Ok(self.inventory.integrations().await)
    }
}
