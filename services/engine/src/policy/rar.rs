//! Resource-Action-Role records
//!
//! The provider-native analogue of a flattened policy statement: one
//! resource path plus one HTTP verb mapped to a set of role identifiers.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::normalize::compact_members;
use super::types::{HttpVerb, PolicyInfo};

/// Default name prefix for RAR storage keys
pub const DEFAULT_RAR_PREFIX: &str = "resrc-ac-roles";

/// A resource + action pair and the roles granted on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceActionRoles {
    /// `/`-rooted resource path
    pub resource: String,
    /// Canonical HTTP verb
    pub action: HttpVerb,
    /// Sorted, duplicate-free role identifiers
    pub roles: Vec<String>,
}

impl ResourceActionRoles {
    /// Build a record from raw inputs.
    ///
    /// Returns `None` when the resource or action is blank or the action does
    /// not resolve to an HTTP verb; no partially-populated record is produced.
    pub fn new(resource: &str, action: &str, roles: &[String]) -> Option<Self> {
        let resource = resource.trim();
        if resource.is_empty() || action.trim().is_empty() {
            return None;
        }

        let Some(action) = HttpVerb::from_action(action) else {
            warn!(resource = %resource, action = %action, "Unresolvable action verb");
            return None;
        };

        let resource = if resource.starts_with('/') {
            resource.to_string()
        } else {
            format!("/{}", resource)
        };

        Some(Self {
            resource,
            action,
            roles: compact_members(roles, &[]),
        })
    }

    /// Canonical key: `prefix-ACTION-resource` with `/` replaced by `-`.
    ///
    /// The leading `/` of the resource is dropped first, so `/hr/us` with
    /// action `GET` and prefix `p` is named `p-GET-hr-us`.
    pub fn name(&self, prefix: &str) -> String {
        rar_name(prefix, self.action, &self.resource)
    }

    /// Copy of this record with a new role set
    pub fn with_roles(&self, roles: &[String]) -> Self {
        Self {
            resource: self.resource.clone(),
            action: self.action,
            roles: compact_members(roles, &[]),
        }
    }

    /// Canonical statement form (`http:<VERB>` action URI)
    pub fn to_policy(&self) -> PolicyInfo {
        PolicyInfo::new(
            vec![self.action.action_uri()],
            self.roles.clone(),
            self.resource.clone(),
        )
    }
}

pub fn rar_name(prefix: &str, action: HttpVerb, resource: &str) -> String {
    let path = resource.trim().trim_start_matches('/').replace('/', "-");
    format!("{}-{}-{}", prefix, action, path)
}
