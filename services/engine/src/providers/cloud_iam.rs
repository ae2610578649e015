//! Cloud IAM Adapter
//!
//! Backend services protected by a cloud identity-aware proxy, whose access
//! is an IAM policy of role bindings. Each binding maps to one IDQL
//! statement with a `gcp:<role>` action URI.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{ApplicationInfo, IntegrationInfo, ProviderAdapter, ProviderKind, WriteStatus};
use crate::lro::{await_completion, PollConfig, PollState};
use crate::policy::normalize::{compact_members, flatten};
use crate::policy::types::{action_uri, split_action_uri};
use crate::policy::PolicyInfo;

/// Action URI scheme for IAM roles
pub const IAM_SCHEME: &str = "gcp";

/// A backend service behind the proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendService {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Hosting kind, e.g. `Kubernetes` or `AppEngine`
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamBinding {
    pub role: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamPolicy {
    pub bindings: Vec<IamBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Result of submitting an IAM policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetPolicyOutcome {
    Applied,
    /// Accepted; completion must be polled through the named operation
    Pending { operation: String },
}

/// Cloud IAM client
#[async_trait]
pub trait IamClient: Send + Sync {
    async fn list_backend_services(&self, integration: &IntegrationInfo) -> Result<Vec<BackendService>>;

    async fn get_iam_policy(&self, integration: &IntegrationInfo, resource_id: &str) -> Result<IamPolicy>;

    async fn set_iam_policy(
        &self,
        integration: &IntegrationInfo,
        resource_id: &str,
        policy: &IamPolicy,
    ) -> Result<SetPolicyOutcome>;

    async fn operation_status(&self, integration: &IntegrationInfo, operation: &str) -> Result<PollState<()>>;
}

pub struct CloudIamAdapter {
    client: Arc<dyn IamClient>,
    poll: PollConfig,
}

impl CloudIamAdapter {
    pub fn new(client: Arc<dyn IamClient>) -> Self {
        Self {
            client,
            poll: PollConfig::default(),
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }
}

/// Role → members for the statements addressed to `resource_id`
fn desired_bindings(resource_id: &str, policies: &[PolicyInfo]) -> BTreeMap<String, Vec<String>> {
    let mut bindings: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for policy in flatten(policies) {
        if policy.resource_id != resource_id {
            warn!(
                resource = %policy.resource_id,
                expected = %resource_id,
                "Skipping statement for a different resource"
            );
            continue;
        }

        let action = &policy.actions[0];
        match split_action_uri(action) {
            Some((scheme, role)) if scheme == IAM_SCHEME => {
                let members = bindings.entry(role.to_string()).or_default();
                *members = compact_members(members, &policy.subject_members);
            }
            _ => warn!(action = %action, "Skipping action that is not an IAM role"),
        }
    }

    bindings
}

/// Replace the bindings of every desired role, keep the rest.
///
/// Roles whose desired member set is empty are dropped from the policy.
fn merge_bindings(current: &IamPolicy, desired: &BTreeMap<String, Vec<String>>) -> IamPolicy {
    let mut merged: BTreeMap<String, Vec<String>> = current
        .bindings
        .iter()
        .map(|b| (b.role.clone(), compact_members(&b.members, &[])))
        .collect();

    for (role, members) in desired {
        if members.is_empty() {
            merged.remove(role);
        } else {
            merged.insert(role.clone(), members.clone());
        }
    }

    IamPolicy {
        bindings: merged
            .into_iter()
            .map(|(role, members)| IamBinding { role, members })
            .collect(),
        etag: current.etag.clone(),
    }
}

fn normalized(policy: &IamPolicy) -> BTreeMap<String, Vec<String>> {
    let mut roles: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for binding in &policy.bindings {
        let members = roles.entry(binding.role.clone()).or_default();
        *members = compact_members(members, &binding.members);
    }
    roles.retain(|_, members| !members.is_empty());
    roles
}

#[async_trait]
impl ProviderAdapter for CloudIamAdapter {
    fn name(&self) -> &str {
        "cloud-iam"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::CloudIam
    }

    async fn discover_applications(&self, integration: &IntegrationInfo) -> Result<Vec<ApplicationInfo>> {
        let services = self.client.list_backend_services(integration).await?;

        info!(integration = %integration.name, count = services.len(), "Discovered backend services");

        Ok(services
            .into_iter()
            .map(|svc| ApplicationInfo {
                object_id: svc.id,
                name: svc.name,
                description: svc.description,
                service: svc.kind,
            })
            .collect())
    }

    async fn get_policy_info(
        &self,
        integration: &IntegrationInfo,
        application: &ApplicationInfo,
    ) -> Result<Vec<PolicyInfo>> {
        let policy = self
            .client
            .get_iam_policy(integration, &application.object_id)
            .await
            .with_context(|| format!("Failed to read IAM policy for {}", application.name))?;

        Ok(normalized(&policy)
            .into_iter()
            .map(|(role, members)| {
                PolicyInfo::new(
                    vec![action_uri(IAM_SCHEME, &role)],
                    members,
                    application.object_id.clone(),
                )
            })
            .collect())
    }

    async fn set_policy_info(
        &self,
        integration: &IntegrationInfo,
        application: &ApplicationInfo,
        policies: &[PolicyInfo],
    ) -> Result<WriteStatus> {
        let desired = desired_bindings(&application.object_id, policies);

        let current = self
            .client
            .get_iam_policy(integration, &application.object_id)
            .await
            .with_context(|| format!("Failed to read IAM policy for {}", application.name))?;

        let merged = merge_bindings(&current, &desired);
        if normalized(&merged) == normalized(&current) {
            debug!(application = %application.name, "IAM policy already converged");
            return Ok(WriteStatus::Created);
        }

        let outcome = self
            .client
            .set_iam_policy(integration, &application.object_id, &merged)
            .await
            .with_context(|| format!("Failed to write IAM policy for {}", application.name))?;

        if let SetPolicyOutcome::Pending { operation } = outcome {
            info!(operation = %operation, "Waiting for IAM policy update");
            await_completion(&self.poll, || self.client.operation_status(integration, &operation))
                .await
                .with_context(|| format!("IAM policy update {} did not complete", operation))?;
        }

        info!(
            application = %application.name,
            roles = desired.len(),
            "Reconciled IAM bindings"
        );
        Ok(WriteStatus::Created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeIam {
        policy: Mutex<IamPolicy>,
        writes: Mutex<u32>,
        pending_polls: Mutex<u32>,
        asynchronous: bool,
    }

    #[async_trait]
    impl IamClient for FakeIam {
        async fn list_backend_services(&self, _: &IntegrationInfo) -> Result<Vec<BackendService>> {
            Ok(vec![BackendService {
                id: "k8s-be-1".to_string(),
                name: "hr-backend".to_string(),
                description: String::new(),
                kind: "Kubernetes".to_string(),
            }])
        }

        async fn get_iam_policy(&self, _: &IntegrationInfo, _: &str) -> Result<IamPolicy> {
            Ok(self.policy.lock().unwrap().clone())
        }

        async fn set_iam_policy(
            &self,
            _: &IntegrationInfo,
            _: &str,
            policy: &IamPolicy,
        ) -> Result<SetPolicyOutcome> {
            *self.writes.lock().unwrap() += 1;
            *self.policy.lock().unwrap() = policy.clone();
            if self.asynchronous {
                *self.pending_polls.lock().unwrap() = 2;
                return Ok(SetPolicyOutcome::Pending {
                    operation: "op-1".to_string(),
                });
            }
            Ok(SetPolicyOutcome::Applied)
        }

        async fn operation_status(&self, _: &IntegrationInfo, _: &str) -> Result<PollState<()>> {
            let mut remaining = self.pending_polls.lock().unwrap();
            if *remaining == 0 {
                return Ok(PollState::Done(()));
            }
            *remaining -= 1;
            Ok(PollState::Pending {
                retry_after: Some(Duration::from_millis(1)),
            })
        }
    }

    fn integration() -> IntegrationInfo {
        IntegrationInfo {
            name: "cloud".to_string(),
            provider: ProviderKind::CloudIam,
            key: b"{}".to_vec(),
        }
    }

    fn application() -> ApplicationInfo {
        ApplicationInfo {
            object_id: "k8s-be-1".to_string(),
            name: "hr-backend".to_string(),
            description: String::new(),
            service: "Kubernetes".to_string(),
        }
    }

    fn binding(role: &str, members: &[&str]) -> IamBinding {
        IamBinding {
            role: role.to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_get_policy_info_maps_bindings() {
        let iam = FakeIam::default();
        *iam.policy.lock().unwrap() = IamPolicy {
            bindings: vec![binding("roles/viewer", &["user:b@x.io", "user:a@x.io"])],
            etag: None,
        };
        let adapter = CloudIamAdapter::new(Arc::new(iam));

        let policies = adapter.get_policy_info(&integration(), &application()).await.unwrap();

        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].actions, vec!["gcp:roles/viewer".to_string()]);
        assert_eq!(
            policies[0].subject_members,
            vec!["user:a@x.io".to_string(), "user:b@x.io".to_string()]
        );
        assert_eq!(policies[0].resource_id, "k8s-be-1");
    }

    #[tokio::test]
    async fn test_set_replaces_named_roles_and_keeps_others() {
        let iam = Arc::new(FakeIam::default());
        *iam.policy.lock().unwrap() = IamPolicy {
            bindings: vec![
                binding("roles/viewer", &["user:old@x.io"]),
                binding("roles/owner", &["user:root@x.io"]),
            ],
            etag: Some("etag-1".to_string()),
        };
        let adapter = CloudIamAdapter::new(iam.clone());

        let desired = vec![PolicyInfo::new(
            vec!["gcp:roles/viewer".to_string()],
            vec!["user:new@x.io".to_string()],
            "k8s-be-1",
        )];
        adapter.set_policy_info(&integration(), &application(), &desired).await.unwrap();

        let stored = iam.policy.lock().unwrap().clone();
        assert_eq!(
            stored.bindings,
            vec![
                binding("roles/owner", &["user:root@x.io"]),
                binding("roles/viewer", &["user:new@x.io"]),
            ]
        );
        assert_eq!(stored.etag.as_deref(), Some("etag-1"));
    }

    #[tokio::test]
    async fn test_set_skips_write_when_converged() {
        let iam = Arc::new(FakeIam::default());
        *iam.policy.lock().unwrap() = IamPolicy {
            bindings: vec![binding("roles/viewer", &["user:a@x.io"])],
            etag: None,
        };
        let adapter = CloudIamAdapter::new(iam.clone());

        let desired = vec![PolicyInfo::new(
            vec!["gcp:roles/viewer".to_string()],
            vec!["user:a@x.io".to_string()],
            "k8s-be-1",
        )];
        let status = adapter
            .set_policy_info(&integration(), &application(), &desired)
            .await
            .unwrap();

        assert!(status.is_created());
        assert_eq!(*iam.writes.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_waits_for_pending_operation() {
        let iam = Arc::new(FakeIam {
            asynchronous: true,
            ..Default::default()
        });
        let adapter = CloudIamAdapter::new(iam.clone()).with_poll_config(PollConfig {
            max_attempts: 5,
            default_interval: Duration::from_millis(1),
        });

        let desired = vec![PolicyInfo::new(
            vec!["gcp:roles/viewer".to_string()],
            vec!["user:a@x.io".to_string()],
            "k8s-be-1",
        )];
        adapter.set_policy_info(&integration(), &application(), &desired).await.unwrap();

        assert_eq!(*iam.writes.lock().unwrap(), 1);
        assert_eq!(*iam.pending_polls.lock().unwrap(), 0);
    }

    #[test]
    fn test_desired_bindings_filters_foreign_statements() {
        let policies = vec![
            PolicyInfo::new(vec!["gcp:roles/viewer".to_string()], vec!["user:a@x.io".to_string()], "k8s-be-1"),
            PolicyInfo::new(vec!["gcp:roles/viewer".to_string()], vec!["user:b@x.io".to_string()], "other"),
            PolicyInfo::new(vec!["http:GET".to_string()], vec!["user:c@x.io".to_string()], "k8s-be-1"),
        ];

        let bindings = desired_bindings("k8s-be-1", &policies);

        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings["roles/viewer"], vec!["user:a@x.io".to_string()]);
    }

    #[test]
    fn test_merge_drops_emptied_roles() {
        let current = IamPolicy {
            bindings: vec![binding("roles/viewer", &["user:a@x.io"])],
            etag: None,
        };
        let mut desired = BTreeMap::new();
        desired.insert("roles/viewer".to_string(), Vec::new());

        assert!(merge_bindings(&current, &desired).bindings.is_empty());
    }
}
