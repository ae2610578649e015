//! Integration and application inventory
//!
//! Shared by the discovery worker (writer) and the policy service (reader).
//! Cloning an [`Inventory`] yields another handle to the same store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::providers::{ApplicationInfo, IntegrationInfo, ProviderKind};

/// A configured provider connection
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Integration {
    pub id: Uuid,
    pub alias: String,
    pub name: String,
    pub provider: ProviderKind,
    #[serde(skip_serializing)]
    pub key: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Integration {
    pub fn info(&self) -> IntegrationInfo {
        IntegrationInfo {
            name: self.name.clone(),
            provider: self.provider,
            key: self.key.clone(),
        }
    }
}

impl std::fmt::Debug for Integration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Integration")
            .field("id", &self.id)
            .field("alias", &self.alias)
            .field("name", &self.name)
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

/// A discovered application owned by one integration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: Uuid,
    pub integration_id: Uuid,
    pub alias: String,
    pub object_id: String,
    pub name: String,
    pub description: String,
    pub service: String,
    pub discovered_at: DateTime<Utc>,
}

impl Application {
    pub fn info(&self) -> ApplicationInfo {
        ApplicationInfo {
            object_id: self.object_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            service: self.service.clone(),
        }
    }
}

#[derive(Default)]
struct Store {
    integrations: HashMap<Uuid, Integration>,
    applications: HashMap<Uuid, Application>,
}

impl Store {
    fn alias_taken(&self, alias: &str) -> bool {
        self.integrations.values().any(|i| i.alias == alias)
            || self.applications.values().any(|a| a.alias == alias)
    }

    fn fresh_alias(&self, prefix: &str) -> String {
        loop {
            let id = Uuid::new_v4().simple().to_string();
            let alias = format!("{}-{}", prefix, &id[..8]);
            if !self.alias_taken(&alias) {
                return alias;
            }
        }
    }
}

/// Lock-guarded inventory store
#[derive(Clone, Default)]
pub struct Inventory {
    inner: Arc<RwLock<Store>>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an integration under a freshly generated alias
    pub async fn create_integration(&self, name: &str, provider: ProviderKind, key: Vec<u8>) -> Integration {
        let mut store = self.inner.write().await;

        let integration = Integration {
            id: Uuid::new_v4(),
            alias: store.fresh_alias("int"),
            name: name.to_string(),
            provider,
            key,
            created_at: Utc::now(),
        };
        store.integrations.insert(integration.id, integration.clone());

        info!(alias = %integration.alias, provider = %provider, "Created integration");
        integration
    }

    /// All integrations, ordered by creation time
    pub async fn integrations(&self) -> Vec<Integration> {
        let store = self.inner.read().await;
        let mut all: Vec<Integration> = store.integrations.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.alias.cmp(&b.alias)));
        all
    }

    pub async fn integration(&self, id: Uuid) -> Option<Integration> {
        self.inner.read().await.integrations.get(&id).cloned()
    }

    pub async fn integration_by_alias(&self, alias: &str) -> Option<Integration> {
        self.inner
            .read()
            .await
            .integrations
            .values()
            .find(|i| i.alias == alias)
            .cloned()
    }

    /// Delete an integration and every application it owns
    pub async fn delete_integration(&self, id: Uuid) -> Option<Integration> {
        let mut store = self.inner.write().await;
        let removed = store.integrations.remove(&id)?;
        store.applications.retain(|_, app| app.integration_id != id);

        info!(alias = %removed.alias, "Deleted integration");
        Some(removed)
    }

    /// Create or refresh the application with this object id under `integration_id`.
    ///
    /// Existing records keep their id and alias.
    pub async fn upsert_application(&self, integration_id: Uuid, app: &ApplicationInfo) -> Application {
        let mut store = self.inner.write().await;
        let now = Utc::now();

        let existing = store
            .applications
            .values_mut()
            .find(|a| a.integration_id == integration_id && a.object_id == app.object_id);

        if let Some(current) = existing {
            current.name = app.name.clone();
            current.description = app.description.clone();
            current.service = app.service.clone();
            current.discovered_at = now;
            return current.clone();
        }

        let created = Application {
            id: Uuid::new_v4(),
            integration_id,
            alias: store.fresh_alias("app"),
            object_id: app.object_id.clone(),
            name: app.name.clone(),
            description: app.description.clone(),
            service: app.service.clone(),
            discovered_at: now,
        };
        store.applications.insert(created.id, created.clone());

        info!(alias = %created.alias, object_id = %created.object_id, "Added application");
        created
    }

    /// All applications, ordered by alias
    pub async fn applications(&self) -> Vec<Application> {
        let store = self.inner.read().await;
        let mut all: Vec<Application> = store.applications.values().cloned().collect();
        all.sort_by(|a, b| a.alias.cmp(&b.alias));
        all
    }

    pub async fn application_by_alias(&self, alias: &str) -> Option<Application> {
        self.inner
            .read()
            .await
            .applications
            .values()
            .find(|a| a.alias == alias)
            .cloned()
    }

    pub async fn delete_application(&self, id: Uuid) -> Option<Application> {
        self.inner.write().await.applications.remove(&id)
    }

    /// Delete every application not in `keep`, except those owned by `retain_integrations`.
    ///
    /// Returns the removed applications.
    pub async fn prune_applications(&self, keep: &HashSet<Uuid>, retain_integrations: &HashSet<Uuid>) -> Vec<Application> {
        let mut store = self.inner.write().await;

        let doomed: Vec<Uuid> = store
            .applications
            .values()
            .filter(|a| !keep.contains(&a.id) && !retain_integrations.contains(&a.integration_id))
            .map(|a| a.id)
            .collect();

        let mut pruned: Vec<Application> = doomed
            .iter()
            .filter_map(|id| store.applications.remove(id))
            .collect();
        pruned.sort_by(|a, b| a.alias.cmp(&b.alias));
        pruned
    }
}
