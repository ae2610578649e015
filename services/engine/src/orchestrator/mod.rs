//! Policy Service and Cross-Provider Orchestration
//!
//! Entry points the HTTP layer calls: read or write one application's
//! policy, discover one integration, or replay policy observed at one
//! application onto another.
//!
//! Orchestration is a single pass. Every step before the final write only
//! reads, so a failed run leaves the target untouched.

pub mod rules;
pub mod transform;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::inventory::{Application, Integration, Inventory};
use crate::policy::PolicyInfo;
use crate::providers::{ProviderAdapter, ProviderRegistry, WriteStatus};

pub use rules::{pair_rule, PairRule};
pub use transform::{ensure_user_members, retain_action, retain_resource};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationRequest {
    pub from_application_alias: String,
    pub to_application_alias: String,
}

/// An application with the integration and adapter that serve it
pub struct ResolvedApplication {
    pub application: Application,
    pub integration: Integration,
    pub adapter: Arc<dyn ProviderAdapter>,
}

pub struct Orchestrator {
    inventory: Inventory,
    registry: Arc<ProviderRegistry>,
}

impl Orchestrator {
    pub fn new(inventory: Inventory, registry: Arc<ProviderRegistry>) -> Self {
        Self { inventory, registry }
    }

    pub async fn resolve(&self, alias: &str) -> OrchestratorResult<ResolvedApplication> {
        let application = self
            .inventory
            .application_by_alias(alias)
            .await
            .ok_or_else(|| OrchestratorError::ApplicationNotFound(alias.to_string()))?;

        let integration = self
            .inventory
            .integration(application.integration_id)
            .await
            .ok_or_else(|| OrchestratorError::IntegrationNotFound(application.integration_id.to_string()))?;

        let adapter = self.adapter_for(alias, &integration)?;

        Ok(ResolvedApplication {
            application,
            integration,
            adapter,
        })
    }

    fn adapter_for(&self, alias: &str, integration: &Integration) -> OrchestratorResult<Arc<dyn ProviderAdapter>> {
        self.registry
            .resolve(&integration.info())
            .map_err(|err| OrchestratorError::AdapterNotFound {
                alias: alias.to_string(),
                reason: err.to_string(),
            })
    }

    pub async fn get_policies(&self, alias: &str) -> OrchestratorResult<Vec<PolicyInfo>> {
        let target = self.resolve(alias).await?;
        read_policies(&target).await
    }

    pub async fn set_policies(&self, alias: &str, policies: &[PolicyInfo]) -> OrchestratorResult<WriteStatus> {
        let target = self.resolve(alias).await?;
        write_policies(&target, policies).await
    }

    /// Discover one integration now and upsert what it reports.
    ///
    /// Nothing is pruned; that is left to the periodic full pass.
    pub async fn discover(&self, integration_alias: &str) -> OrchestratorResult<Vec<Application>> {
        let integration = self
            .inventory
            .integration_by_alias(integration_alias)
            .await
            .ok_or_else(|| OrchestratorError::IntegrationNotFound(integration_alias.to_string()))?;

        let info = integration.info();
        let adapter = self.adapter_for(integration_alias, &integration)?;
        let apps = adapter.discover_applications(&info).await?;

        let mut upserted = Vec::with_capacity(apps.len());
        for app in &apps {
            upserted.push(self.inventory.upsert_application(integration.id, app).await);
        }

        info!(integration = %integration.alias, count = upserted.len(), "Discovered integration");
        Ok(upserted)
    }

    /// Replay the policy of one application onto another.
    ///
    /// Returns the statements submitted to the target.
    pub async fn orchestrate(&self, request: &OrchestrationRequest) -> OrchestratorResult<Vec<PolicyInfo>> {
        let from = self.resolve(&request.from_application_alias).await?;
        let to = self.resolve(&request.to_application_alias).await?;

        let (from_kind, to_kind) = (from.integration.provider, to.integration.provider);
        let rule = pair_rule(from_kind, to_kind)?;

        let from_policies = read_policies(&from).await?;
        if rule.requires_user_members() {
            ensure_user_members(&from_policies, from_kind, to_kind)?;
        }

        let to_policies = read_policies(&to).await?;
        let mut rewritten = retain_resource(&from_policies, &to_policies)?;
        if rule.retains_target_action() {
            rewritten = retain_action(&rewritten, &to_policies)?;
        }

        write_policies(&to, &rewritten).await?;

        info!(
            from = %from.application.alias,
            to = %to.application.alias,
            from_provider = %from_kind,
            to_provider = %to_kind,
            statements = rewritten.len(),
            "Orchestrated policy"
        );
        Ok(rewritten)
    }
}

async fn read_policies(target: &ResolvedApplication) -> OrchestratorResult<Vec<PolicyInfo>> {
    let policies = target
        .adapter
        .get_policy_info(&target.integration.info(), &target.application.info())
        .await?;
    Ok(policies)
}

async fn write_policies(target: &ResolvedApplication, policies: &[PolicyInfo]) -> OrchestratorResult<WriteStatus> {
    let status = target
        .adapter
        .set_policy_info(&target.integration.info(), &target.application.info(), policies)
        .await?;

    if !status.is_created() {
        return Err(OrchestratorError::ProviderWrite {
            provider: target.integration.provider,
            status: status.code(),
        });
    }
    Ok(status)
}
