//! API Gateway Adapter
//!
//! Gateways that authorize requests from a role table of named
//! resource-action-role entries. Writes go through `calc_updates`, so only
//! entries that already exist and actually changed are rewritten.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{ApplicationInfo, IntegrationInfo, ProviderAdapter, ProviderKind, WriteStatus};
use crate::policy::{calc_updates, PolicyInfo, ResourceActionRoles, DEFAULT_RAR_PREFIX};

/// Logical grouping reported for gateway applications
const GATEWAY_SERVICE: &str = "ApiGateway";

/// An API published by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayApi {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A stored role table entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Storage key (canonical record name)
    pub name: String,
    pub resource: String,
    pub action: String,
    pub roles: Vec<String>,
}

impl RoleEntry {
    pub fn from_rar(rar: &ResourceActionRoles, prefix: &str) -> Self {
        Self {
            name: rar.name(prefix),
            resource: rar.resource.clone(),
            action: rar.action.to_string(),
            roles: rar.roles.clone(),
        }
    }
}

/// Gateway control-plane client
#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn list_apis(&self, integration: &IntegrationInfo) -> Result<Vec<GatewayApi>>;

    async fn list_role_entries(&self, integration: &IntegrationInfo, api_id: &str) -> Result<Vec<RoleEntry>>;

    /// Store one entry whole, keyed by its name
    async fn put_role_entry(&self, integration: &IntegrationInfo, api_id: &str, entry: &RoleEntry) -> Result<()>;
}

pub struct ApiGatewayAdapter {
    client: Arc<dyn GatewayClient>,
    prefix: String,
}

impl ApiGatewayAdapter {
    pub fn new(client: Arc<dyn GatewayClient>) -> Self {
        Self {
            client,
            prefix: DEFAULT_RAR_PREFIX.to_string(),
        }
    }

    /// Use a custom storage key prefix
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    async fn existing_rars(
        &self,
        integration: &IntegrationInfo,
        application: &ApplicationInfo,
    ) -> Result<Vec<ResourceActionRoles>> {
        let entries = self
            .client
            .list_role_entries(integration, &application.object_id)
            .await
            .with_context(|| format!("Failed to list role entries for {}", application.name))?;

        Ok(entries
            .iter()
            .filter_map(|entry| {
                let rar = ResourceActionRoles::new(&entry.resource, &entry.action, &entry.roles);
                if rar.is_none() {
                    warn!(entry = %entry.name, "Ignoring malformed role table entry");
                }
                rar
            })
            .collect())
    }
}

#[async_trait]
impl ProviderAdapter for ApiGatewayAdapter {
    fn name(&self) -> &str {
        "api-gateway"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::ApiGateway
    }

    async fn discover_applications(&self, integration: &IntegrationInfo) -> Result<Vec<ApplicationInfo>> {
        let apis = self.client.list_apis(integration).await?;

        info!(integration = %integration.name, count = apis.len(), "Discovered gateway APIs");

        Ok(apis
            .into_iter()
            .map(|api| ApplicationInfo {
                object_id: api.id,
                name: api.name,
                description: api.description,
                service: GATEWAY_SERVICE.to_string(),
            })
            .collect())
    }

    async fn get_policy_info(
        &self,
        integration: &IntegrationInfo,
        application: &ApplicationInfo,
    ) -> Result<Vec<PolicyInfo>> {
        let rars = self.existing_rars(integration, application).await?;
        Ok(rars.iter().map(ResourceActionRoles::to_policy).collect())
    }

    async fn set_policy_info(
        &self,
        integration: &IntegrationInfo,
        application: &ApplicationInfo,
        policies: &[PolicyInfo],
    ) -> Result<WriteStatus> {
        let existing = self.existing_rars(integration, application).await?;
        let updates = calc_updates(&existing, policies);

        for rar in &updates {
            let entry = RoleEntry::from_rar(rar, &self.prefix);
            self.client
                .put_role_entry(integration, &application.object_id, &entry)
                .await
                .with_context(|| format!("Failed to write role entry {}", entry.name))?;
        }

        info!(
            application = %application.name,
            updated = updates.len(),
            "Reconciled gateway role table"
        );
        Ok(WriteStatus::Created)
    }
}
