//! Policy Agent Adapter
//!
//! Policy agents load IDQL statements from bundles; each bundle service is
//! one application whose `data.json` carries a [`BundleDocument`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{parse_key, ApplicationInfo, IntegrationInfo, ProviderAdapter, ProviderKind, WriteStatus};
use crate::policy::normalize::flatten;
use crate::policy::PolicyInfo;

/// Data file inside each bundle directory
pub const BUNDLE_DATA_FILE: &str = "data.json";

const BUNDLE_SERVICE: &str = "PolicyAgent";

/// A bundle served to one or more agents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleService {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Bundle data payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleDocument {
    #[serde(default)]
    pub policies: Vec<PolicyInfo>,
}

impl BundleDocument {
    /// Replace every statement for the resources named by `incoming`.
    ///
    /// Statements for other resources are kept; the result is flattened.
    pub fn replace_resources(&self, incoming: &[PolicyInfo]) -> BundleDocument {
        let incoming = flatten(incoming);
        let replaced: BTreeSet<&str> = incoming.iter().map(|p| p.resource_id.as_str()).collect();

        let mut policies: Vec<PolicyInfo> = self
            .policies
            .iter()
            .filter(|p| !replaced.contains(p.resource_id.trim()))
            .cloned()
            .collect();
        policies.extend(incoming.iter().cloned());

        BundleDocument {
            policies: flatten(&policies),
        }
    }
}

/// Bundle server client
#[async_trait]
pub trait BundleClient: Send + Sync {
    async fn list_bundles(&self, integration: &IntegrationInfo) -> Result<Vec<BundleService>>;

    async fn fetch_bundle(&self, integration: &IntegrationInfo, bundle_id: &str) -> Result<BundleDocument>;

    async fn publish_bundle(
        &self,
        integration: &IntegrationInfo,
        bundle_id: &str,
        document: &BundleDocument,
    ) -> Result<()>;
}

pub struct PolicyAgentAdapter {
    client: Arc<dyn BundleClient>,
}

impl PolicyAgentAdapter {
    pub fn new(client: Arc<dyn BundleClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for PolicyAgentAdapter {
    fn name(&self) -> &str {
        "policy-agent"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::PolicyAgent
    }

    async fn discover_applications(&self, integration: &IntegrationInfo) -> Result<Vec<ApplicationInfo>> {
        let bundles = self.client.list_bundles(integration).await?;

        info!(integration = %integration.name, count = bundles.len(), "Discovered policy bundles");

        Ok(bundles
            .into_iter()
            .map(|bundle| ApplicationInfo {
                object_id: bundle.id,
                name: bundle.name,
                description: bundle.description,
                service: BUNDLE_SERVICE.to_string(),
            })
            .collect())
    }

    async fn get_policy_info(
        &self,
        integration: &IntegrationInfo,
        application: &ApplicationInfo,
    ) -> Result<Vec<PolicyInfo>> {
        let document = self
            .client
            .fetch_bundle(integration, &application.object_id)
            .await
            .with_context(|| format!("Failed to fetch bundle {}", application.object_id))?;

        Ok(document.policies)
    }

    async fn set_policy_info(
        &self,
        integration: &IntegrationInfo,
        application: &ApplicationInfo,
        policies: &[PolicyInfo],
    ) -> Result<WriteStatus> {
        let current = self
            .client
            .fetch_bundle(integration, &application.object_id)
            .await
            .with_context(|| format!("Failed to fetch bundle {}", application.object_id))?;

        let updated = current.replace_resources(policies);
        if updated.policies == flatten(&current.policies) {
            debug!(bundle = %application.object_id, "Bundle already converged");
            return Ok(WriteStatus::Created);
        }

        self.client
            .publish_bundle(integration, &application.object_id, &updated)
            .await
            .with_context(|| format!("Failed to publish bundle {}", application.object_id))?;

        info!(
            bundle = %application.object_id,
            statements = updated.policies.len(),
            "Published policy bundle"
        );
        Ok(WriteStatus::Created)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FsBundleKey {
    bundle_dir: PathBuf,
}

/// Bundle client over a local directory.
///
/// The integration key is `{"bundleDir": "<path>"}`. Every subdirectory that
/// holds a `data.json` is one bundle, named after the subdirectory.
#[derive(Debug, Default, Clone)]
pub struct FsBundleClient;

impl FsBundleClient {
    pub fn new() -> Self {
        Self
    }

    fn root(integration: &IntegrationInfo) -> Result<PathBuf> {
        let key: FsBundleKey = parse_key(integration)?;
        Ok(key.bundle_dir)
    }

    fn data_path(root: &Path, bundle_id: &str) -> Result<PathBuf> {
        if bundle_id.is_empty() || bundle_id.contains(['/', '\\']) || bundle_id == "." || bundle_id == ".." {
            anyhow::bail!("Invalid bundle id: {}", bundle_id);
        }
        Ok(root.join(bundle_id).join(BUNDLE_DATA_FILE))
    }
}

#[async_trait]
impl BundleClient for FsBundleClient {
    async fn list_bundles(&self, integration: &IntegrationInfo) -> Result<Vec<BundleService>> {
        let root = Self::root(integration)?;
        let mut entries = tokio::fs::read_dir(&root)
            .await
            .with_context(|| format!("Failed to read bundle directory {}", root.display()))?;

        let mut bundles = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_bundle = tokio::fs::metadata(path.join(BUNDLE_DATA_FILE))
                .await
                .map(|meta| meta.is_file())
                .unwrap_or(false);
            if !is_bundle {
                continue;
            }

            let id = entry.file_name().to_string_lossy().to_string();
            bundles.push(BundleService {
                name: id.clone(),
                description: format!("Bundle at {}", path.display()),
                id,
            });
        }

        bundles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(bundles)
    }

    async fn fetch_bundle(&self, integration: &IntegrationInfo, bundle_id: &str) -> Result<BundleDocument> {
        let path = Self::data_path(&Self::root(integration)?, bundle_id)?;
        let raw = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        serde_json::from_slice(&raw).with_context(|| format!("Invalid bundle data in {}", path.display()))
    }

    async fn publish_bundle(
        &self,
        integration: &IntegrationInfo,
        bundle_id: &str,
        document: &BundleDocument,
    ) -> Result<()> {
        let path = Self::data_path(&Self::root(integration)?, bundle_id)?;
        let body = serde_json::to_vec_pretty(document)?;

        // Write then rename so agents never load a half-written file
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, &body)
            .await
            .with_context(|| format!("Failed to write {}", staging.display()))?;
        tokio::fs::rename(&staging, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        Ok(())
    }
}
