//! Identity Platform Adapter
//!
//! Directory applications expose app roles; access is the set of
//! (role, service principal, user) assignments. Reads report one statement
//! per role with `azure:<role value>` actions and `user:<email>` members.
//! Writes go through the assignment planner.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{ApplicationInfo, IntegrationInfo, ProviderAdapter, ProviderKind, WriteStatus};
use crate::fanout::fan_out;
use crate::policy::normalize::flatten;
use crate::policy::types::{action_uri, member_value, split_action_uri};
use crate::policy::{apply_plan, plan_assignments, AppRoleAssignment, AssignmentWriter, MemberKind, PolicyInfo};

/// Action URI scheme for app roles
pub const APP_ROLE_SCHEME: &str = "azure";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryApplication {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Service principal that owns the app roles
    pub service_principal_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRole {
    pub id: String,
    pub value: String,
    #[serde(default)]
    pub display_name: String,
}

/// Directory client
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn list_applications(&self, integration: &IntegrationInfo) -> Result<Vec<DirectoryApplication>>;

    async fn list_app_roles(&self, integration: &IntegrationInfo, service_principal_id: &str) -> Result<Vec<AppRole>>;

    async fn list_assignments(
        &self,
        integration: &IntegrationInfo,
        service_principal_id: &str,
    ) -> Result<Vec<AppRoleAssignment>>;

    async fn principal_email(&self, integration: &IntegrationInfo, principal_id: &str) -> Result<String>;

    async fn principal_id_for_email(&self, integration: &IntegrationInfo, email: &str) -> Result<String>;

    async fn add_assignment(&self, integration: &IntegrationInfo, assignment: &AppRoleAssignment) -> Result<()>;

    async fn remove_assignment(&self, integration: &IntegrationInfo, assignment: &AppRoleAssignment) -> Result<()>;
}

/// Binds a directory client to one integration for the assignment planner
struct DirectoryWriter<'a> {
    client: &'a dyn DirectoryClient,
    integration: &'a IntegrationInfo,
}

#[async_trait]
impl<'a> AssignmentWriter for DirectoryWriter<'a> {
    async fn add_assignment(&self, assignment: &AppRoleAssignment) -> Result<()> {
        self.client.add_assignment(self.integration, assignment).await
    }

    async fn remove_assignment(&self, assignment: &AppRoleAssignment) -> Result<()> {
        self.client.remove_assignment(self.integration, assignment).await
    }
}

pub struct IdentityPlatformAdapter {
    client: Arc<dyn DirectoryClient>,
}

impl IdentityPlatformAdapter {
    pub fn new(client: Arc<dyn DirectoryClient>) -> Self {
        Self { client }
    }

    /// Resolve principal ids to emails, dropping principals that cannot be resolved
    async fn emails_by_principal(
        &self,
        integration: &IntegrationInfo,
        assignments: &[AppRoleAssignment],
    ) -> HashMap<String, String> {
        let mut principals: Vec<String> = assignments.iter().map(|a| a.principal_id.clone()).collect();
        principals.sort();
        principals.dedup();

        fan_out(principals, |principal| async move {
            let email = self.client.principal_email(integration, &principal).await?;
            Ok::<_, anyhow::Error>((principal, email))
        })
        .await
        .into_logged("Principal lookup")
        .into_iter()
        .collect()
    }

    /// Resolve every email to a principal id.
    ///
    /// Fails when any email cannot be resolved, so a write never revokes a
    /// user whose lookup failed.
    async fn principals_by_email(&self, integration: &IntegrationInfo, emails: Vec<String>) -> Result<HashMap<String, String>> {
        let outcome = fan_out(emails, |email| async move {
            let principal = self.client.principal_id_for_email(integration, &email).await?;
            Ok::<_, anyhow::Error>((email, principal))
        })
        .await;

        if !outcome.is_complete() {
            for (email, err) in &outcome.failed {
                warn!(email = %email, error = %err, "User lookup failed");
            }
            let unresolved: Vec<&str> = outcome.failed.iter().map(|(email, _)| email.as_str()).collect();
            anyhow::bail!("Could not resolve users: {}", unresolved.join(", "));
        }

        Ok(outcome.succeeded.into_iter().collect())
    }
}

#[async_trait]
impl ProviderAdapter for IdentityPlatformAdapter {
    fn name(&self) -> &str {
        "identity-platform"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::IdentityPlatform
    }

    async fn discover_applications(&self, integration: &IntegrationInfo) -> Result<Vec<ApplicationInfo>> {
        let apps = self.client.list_applications(integration).await?;

        info!(integration = %integration.name, count = apps.len(), "Discovered directory applications");

        Ok(apps
            .into_iter()
            .map(|app| ApplicationInfo {
                object_id: app.id,
                name: app.name,
                description: app.description,
                service: app.service_principal_id,
            })
            .collect())
    }

    async fn get_policy_info(
        &self,
        integration: &IntegrationInfo,
        application: &ApplicationInfo,
    ) -> Result<Vec<PolicyInfo>> {
        let sp = &application.service;

        let mut roles = self
            .client
            .list_app_roles(integration, sp)
            .await
            .with_context(|| format!("Failed to list app roles for {}", application.name))?;
        roles.sort_by(|a, b| a.value.cmp(&b.value));

        let assignments = self
            .client
            .list_assignments(integration, sp)
            .await
            .with_context(|| format!("Failed to list assignments for {}", application.name))?;

        let emails = self.emails_by_principal(integration, &assignments).await;

        Ok(roles
            .iter()
            .map(|role| {
                let mut members: Vec<String> = assignments
                    .iter()
                    .filter(|a| a.app_role_id == role.id)
                    .filter_map(|a| emails.get(&a.principal_id))
                    .map(|email| format!("{}:{}", MemberKind::User, email))
                    .collect();
                members.sort();
                members.dedup();

                PolicyInfo::new(vec![action_uri(APP_ROLE_SCHEME, &role.value)], members, sp.clone())
            })
            .collect())
    }

    async fn set_policy_info(
        &self,
        integration: &IntegrationInfo,
        application: &ApplicationInfo,
        policies: &[PolicyInfo],
    ) -> Result<WriteStatus> {
        let sp = &application.service;

        let roles = self
            .client
            .list_app_roles(integration, sp)
            .await
            .with_context(|| format!("Failed to list app roles for {}", application.name))?;
        let role_ids: HashMap<&str, &str> = roles.iter().map(|r| (r.value.as_str(), r.id.as_str())).collect();

        // (role id, user email) pairs to grant
        let mut wanted: Vec<(String, String)> = Vec::new();
        for policy in flatten(policies) {
            let action = &policy.actions[0];
            let role_id = match split_action_uri(action) {
                Some((scheme, value)) if scheme == APP_ROLE_SCHEME => role_ids.get(value),
                _ => None,
            };
            let Some(role_id) = role_id else {
                warn!(action = %action, application = %application.name, "Skipping unknown app role");
                continue;
            };

            for member in &policy.subject_members {
                if MemberKind::of(member) != MemberKind::User {
                    warn!(member = %member, "Only user members can be assigned app roles, skipping");
                    continue;
                }
                wanted.push((role_id.to_string(), member_value(member).to_string()));
            }
        }

        let mut emails: Vec<String> = wanted.iter().map(|(_, email)| email.clone()).collect();
        emails.sort();
        emails.dedup();
        let principals = self
            .principals_by_email(integration, emails)
            .await
            .with_context(|| format!("Refusing to update app roles for {}", application.name))?;

        let desired: Vec<AppRoleAssignment> = wanted
            .iter()
            .filter_map(|(role_id, email)| {
                principals
                    .get(email)
                    .map(|principal| AppRoleAssignment::new(role_id, principal, sp))
            })
            .collect();

        let existing = self
            .client
            .list_assignments(integration, sp)
            .await
            .with_context(|| format!("Failed to list assignments for {}", application.name))?;

        let plan = plan_assignments(&existing, &desired);
        if plan.is_empty() {
            info!(application = %application.name, "App role assignments already converged");
            return Ok(WriteStatus::Created);
        }

        let writer = DirectoryWriter {
            client: self.client.as_ref(),
            integration,
        };
        apply_plan(&plan, &writer).await?;

        Ok(WriteStatus::Created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeDirectory {
        roles: Vec<AppRole>,
        users: Vec<(String, String)>,
        assignments: Mutex<Vec<AppRoleAssignment>>,
        removed: Mutex<Vec<String>>,
        unreachable: Vec<String>,
    }

    impl FakeDirectory {
        fn new() -> Self {
            Self {
                roles: vec![
                    AppRole {
                        id: "role-w".to_string(),
                        value: "Writer".to_string(),
                        display_name: "Writer".to_string(),
                    },
                    AppRole {
                        id: "role-r".to_string(),
                        value: "Reader".to_string(),
                        display_name: "Reader".to_string(),
                    },
                ],
                users: vec![
                    ("u1".to_string(), "alice@x.io".to_string()),
                    ("u2".to_string(), "bob@x.io".to_string()),
                    ("u3".to_string(), "carol@x.io".to_string()),
                ],
                assignments: Mutex::new(Vec::new()),
                removed: Mutex::new(Vec::new()),
                unreachable: Vec::new(),
            }
        }

        fn with_unreachable(mut self, email: &str) -> Self {
            self.unreachable.push(email.to_string());
            self
        }

        fn assign(&self, role: &str, principal: &str) {
            let mut assignment = AppRoleAssignment::new(role, principal, "sp-1");
            assignment.id = Some(format!("{}-{}", role, principal));
            self.assignments.lock().unwrap().push(assignment);
        }
    }

    #[async_trait]
    impl DirectoryClient for FakeDirectory {
        async fn list_applications(&self, _: &IntegrationInfo) -> Result<Vec<DirectoryApplication>> {
            Ok(vec![DirectoryApplication {
                id: "app-1".to_string(),
                name: "payroll".to_string(),
                description: String::new(),
                service_principal_id: "sp-1".to_string(),
            }])
        }

        async fn list_app_roles(&self, _: &IntegrationInfo, _: &str) -> Result<Vec<AppRole>> {
            Ok(self.roles.clone())
        }

        async fn list_assignments(&self, _: &IntegrationInfo, _: &str) -> Result<Vec<AppRoleAssignment>> {
            Ok(self.assignments.lock().unwrap().clone())
        }

        async fn principal_email(&self, _: &IntegrationInfo, principal_id: &str) -> Result<String> {
            self.users
                .iter()
                .find(|(id, _)| id == principal_id)
                .map(|(_, email)| email.clone())
                .ok_or_else(|| anyhow::anyhow!("unknown principal {}", principal_id))
        }

        async fn principal_id_for_email(&self, _: &IntegrationInfo, email: &str) -> Result<String> {
            if self.unreachable.iter().any(|e| e == email) {
                anyhow::bail!("directory unavailable (503)");
            }
            self.users
                .iter()
                .find(|(_, e)| e == email)
                .map(|(id, _)| id.clone())
                .ok_or_else(|| anyhow::anyhow!("unknown user {}", email))
        }

        async fn add_assignment(&self, _: &IntegrationInfo, assignment: &AppRoleAssignment) -> Result<()> {
            self.assignments.lock().unwrap().push(assignment.clone());
            Ok(())
        }

        async fn remove_assignment(&self, _: &IntegrationInfo, assignment: &AppRoleAssignment) -> Result<()> {
            self.removed.lock().unwrap().push(assignment.principal_id.clone());
            self.assignments.lock().unwrap().retain(|a| {
                !(a.app_role_id == assignment.app_role_id && a.principal_id == assignment.principal_id)
            });
            Ok(())
        }
    }

    fn integration() -> IntegrationInfo {
        IntegrationInfo {
            name: "directory".to_string(),
            provider: ProviderKind::IdentityPlatform,
            key: b"{}".to_vec(),
        }
    }

    fn application() -> ApplicationInfo {
        ApplicationInfo {
            object_id: "app-1".to_string(),
            name: "payroll".to_string(),
            description: String::new(),
            service: "sp-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_discover_uses_service_principal_as_service() {
        let adapter = IdentityPlatformAdapter::new(Arc::new(FakeDirectory::new()));
        let apps = adapter.discover_applications(&integration()).await.unwrap();

        assert_eq!(apps[0].object_id, "app-1");
        assert_eq!(apps[0].service, "sp-1");
    }

    #[tokio::test]
    async fn test_get_policy_info_reports_every_role() {
        let directory = FakeDirectory::new();
        directory.assign("role-r", "u2");
        directory.assign("role-r", "u1");
        directory.assign("role-r", "ghost");
        let adapter = IdentityPlatformAdapter::new(Arc::new(directory));

        let policies = adapter.get_policy_info(&integration(), &application()).await.unwrap();

        assert_eq!(policies.len(), 2);
        assert_eq!(policies[0].actions, vec!["azure:Reader".to_string()]);
        assert_eq!(
            policies[0].subject_members,
            vec!["user:alice@x.io".to_string(), "user:bob@x.io".to_string()]
        );
        assert_eq!(policies[0].resource_id, "sp-1");
        assert_eq!(policies[1].actions, vec!["azure:Writer".to_string()]);
        assert!(policies[1].subject_members.is_empty());
    }

    #[tokio::test]
    async fn test_set_adds_and_removes_assignments() {
        let directory = Arc::new(FakeDirectory::new());
        directory.assign("role-r", "u1");
        directory.assign("role-w", "u3");
        let adapter = IdentityPlatformAdapter::new(directory.clone());

        let desired = vec![PolicyInfo::new(
            vec!["azure:Reader".to_string()],
            vec!["user:bob@x.io".to_string(), "group:admins".to_string()],
            "sp-1",
        )];
        let status = adapter
            .set_policy_info(&integration(), &application(), &desired)
            .await
            .unwrap();

        assert!(status.is_created());
        assert_eq!(*directory.removed.lock().unwrap(), vec!["u1".to_string()]);

        let mut current: Vec<(String, String)> = directory
            .assignments
            .lock()
            .unwrap()
            .iter()
            .map(|a| (a.app_role_id.clone(), a.principal_id.clone()))
            .collect();
        current.sort();
        assert_eq!(
            current,
            vec![
                ("role-r".to_string(), "u2".to_string()),
                ("role-w".to_string(), "u3".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_set_skips_unknown_roles() {
        let directory = Arc::new(FakeDirectory::new());
        let adapter = IdentityPlatformAdapter::new(directory.clone());

        let desired = vec![PolicyInfo::new(
            vec!["azure:Auditor".to_string()],
            vec!["user:bob@x.io".to_string()],
            "sp-1",
        )];
        adapter.set_policy_info(&integration(), &application(), &desired).await.unwrap();

        assert!(directory.assignments.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_fails_without_writes_when_a_user_lookup_fails() {
        let directory = Arc::new(FakeDirectory::new().with_unreachable("alice@x.io"));
        directory.assign("role-r", "u1");
        let adapter = IdentityPlatformAdapter::new(directory.clone());

        let desired = vec![PolicyInfo::new(
            vec!["azure:Reader".to_string()],
            vec!["user:alice@x.io".to_string(), "user:bob@x.io".to_string()],
            "sp-1",
        )];
        let err = adapter
            .set_policy_info(&integration(), &application(), &desired)
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("alice@x.io"));
        assert!(directory.removed.lock().unwrap().is_empty());

        let current: Vec<String> = directory
            .assignments
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.principal_id.clone())
            .collect();
        assert_eq!(current, vec!["u1".to_string()]);
    }

    #[tokio::test]
    async fn test_get_tolerates_failed_email_lookups() {
        let directory = FakeDirectory::new();
        directory.assign("role-w", "u3");
        directory.assign("role-w", "ghost-1");
        directory.assign("role-w", "ghost-2");
        let adapter = IdentityPlatformAdapter::new(Arc::new(directory));

        let policies = adapter.get_policy_info(&integration(), &application()).await.unwrap();

        assert_eq!(policies[1].actions, vec!["azure:Writer".to_string()]);
        assert_eq!(policies[1].subject_members, vec!["user:carol@x.io".to_string()]);
    }
}
