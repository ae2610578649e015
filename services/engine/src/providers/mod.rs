//! Provider Adapters
//!
//! Trait-based abstraction over the authorization surfaces of each
//! integrated provider. The reconciliation engine and orchestrator only ever
//! talk to [`ProviderAdapter`]; each adapter delegates network calls to an
//! injected client trait.
//!
//! ## Adapters
//!
//! - [`cloud_iam`]: role bindings on cloud IAM protected backend services
//! - [`identity_platform`]: app-role assignments on directory applications
//! - [`api_gateway`]: named resource-action-role entries in a gateway role table
//! - [`policy_agent`]: IDQL statements served in a policy-agent bundle

pub mod api_gateway;
pub mod cloud_iam;
pub mod identity_platform;
pub mod policy_agent;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::policy::PolicyInfo;

pub use api_gateway::ApiGatewayAdapter;
pub use cloud_iam::CloudIamAdapter;
pub use identity_platform::IdentityPlatformAdapter;
pub use policy_agent::PolicyAgentAdapter;

/// Provider type of an integration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    CloudIam,
    IdentityPlatform,
    ApiGateway,
    PolicyAgent,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::CloudIam => write!(f, "cloud_iam"),
            ProviderKind::IdentityPlatform => write!(f, "identity_platform"),
            ProviderKind::ApiGateway => write!(f, "api_gateway"),
            ProviderKind::PolicyAgent => write!(f, "policy_agent"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cloud_iam" => Ok(Self::CloudIam),
            "identity_platform" => Ok(Self::IdentityPlatform),
            "api_gateway" => Ok(Self::ApiGateway),
            "policy_agent" => Ok(Self::PolicyAgent),
            _ => Err(format!("Unknown provider: {s}")),
        }
    }
}

/// Credentials an adapter needs to reach one integration
#[derive(Clone)]
pub struct IntegrationInfo {
    pub name: String,
    pub provider: ProviderKind,
    /// Opaque provider-specific credential blob
    pub key: Vec<u8>,
}

impl std::fmt::Debug for IntegrationInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationInfo")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// An application discovered at a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInfo {
    /// Provider-native id
    pub object_id: String,
    pub name: String,
    pub description: String,
    /// Logical grouping, e.g. gateway or service principal id
    pub service: String,
}

/// Outcome of a policy write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Provider accepted the full computed update set
    Created,
    Rejected { status: u16 },
}

impl WriteStatus {
    pub fn is_created(&self) -> bool {
        matches!(self, WriteStatus::Created)
    }

    pub fn code(&self) -> u16 {
        match self {
            WriteStatus::Created => 201,
            WriteStatus::Rejected { status } => *status,
        }
    }
}

/// Uniform capability set every provider implements
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Provider type served by this adapter
    fn kind(&self) -> ProviderKind;

    /// List the applications currently exposed by the integration
    async fn discover_applications(&self, integration: &IntegrationInfo) -> Result<Vec<ApplicationInfo>>;

    /// Read the application's native authorization state as IDQL
    async fn get_policy_info(
        &self,
        integration: &IntegrationInfo,
        application: &ApplicationInfo,
    ) -> Result<Vec<PolicyInfo>>;

    /// Reconcile the application's native state onto `policies`
    async fn set_policy_info(
        &self,
        integration: &IntegrationInfo,
        application: &ApplicationInfo,
        policies: &[PolicyInfo],
    ) -> Result<WriteStatus>;
}

/// Adapters by provider type
#[derive(Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one for the same provider
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        info!(provider = %adapter.kind(), adapter = %adapter.name(), "Registered provider adapter");
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn providers(&self) -> Vec<ProviderKind> {
        self.adapters.keys().copied().collect()
    }

    /// Resolve the adapter serving an integration.
    ///
    /// Fails when no adapter is registered for its provider or the
    /// integration carries no credentials.
    pub fn resolve(&self, integration: &IntegrationInfo) -> Result<Arc<dyn ProviderAdapter>> {
        let adapter = self
            .adapters
            .get(&integration.provider)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No adapter registered for provider {}", integration.provider))?;

        if integration.key.is_empty() {
            anyhow::bail!("Integration {} has no credentials", integration.name);
        }

        Ok(adapter)
    }
}

/// Parse an integration's JSON credential blob
pub(crate) fn parse_key<T: serde::de::DeserializeOwned>(integration: &IntegrationInfo) -> Result<T> {
    serde_json::from_slice(&integration.key).map_err(|e| {
        anyhow::anyhow!(
            "Invalid credentials for integration {} ({}): {}",
            integration.name,
            integration.provider,
            e
        )
    })
}
