//! App-Role Assignment Reconciliation
//!
//! Lower-level variant of the diff engine for providers that store one
//! assignment per (role, resource, principal) triple.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// A single provider-native role assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRoleAssignment {
    /// Provider assignment id, absent for assignments not yet created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub app_role_id: String,
    pub principal_id: String,
    /// Service principal / resource the role belongs to
    pub resource_id: String,
}

impl AppRoleAssignment {
    pub fn new(app_role_id: &str, principal_id: &str, resource_id: &str) -> Self {
        Self {
            id: None,
            app_role_id: app_role_id.to_string(),
            principal_id: principal_id.to_string(),
            resource_id: resource_id.to_string(),
        }
    }

    fn same_role(&self, other: &AppRoleAssignment) -> bool {
        self.app_role_id == other.app_role_id && self.resource_id == other.resource_id
    }

    fn same_triple(&self, other: &AppRoleAssignment) -> bool {
        self.same_role(other) && self.principal_id == other.principal_id
    }
}

/// Assignments to create and delete
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentPlan {
    pub should_add: Vec<AppRoleAssignment>,
    pub should_remove: Vec<AppRoleAssignment>,
}

impl AssignmentPlan {
    pub fn is_empty(&self) -> bool {
        self.should_add.is_empty() && self.should_remove.is_empty()
    }
}

/// Compare existing assignments against desired ones.
///
/// - `should_add`: desired triples with no existing match.
/// - `should_remove`: existing assignments whose (role, resource) is named
///   by some desired entry but whose principal is not desired for that pair.
///
/// Existing assignments for roles absent from `desired` are left alone.
pub fn plan_assignments(
    existing: &[AppRoleAssignment],
    desired: &[AppRoleAssignment],
) -> AssignmentPlan {
    let mut plan = AssignmentPlan::default();

    for wanted in desired {
        let present = existing.iter().any(|e| e.same_triple(wanted));
        let queued = plan.should_add.iter().any(|a| a.same_triple(wanted));
        if !present && !queued {
            plan.should_add.push(wanted.clone());
        }
    }

    for current in existing {
        let role_managed = desired.iter().any(|d| d.same_role(current));
        let principal_wanted = desired.iter().any(|d| d.same_triple(current));
        if role_managed && !principal_wanted {
            plan.should_remove.push(current.clone());
        }
    }

    plan
}

/// Write side of an assignment store
#[async_trait]
pub trait AssignmentWriter: Send + Sync {
    async fn add_assignment(&self, assignment: &AppRoleAssignment) -> Result<()>;

    async fn remove_assignment(&self, assignment: &AppRoleAssignment) -> Result<()>;
}

/// Apply a plan: every addition first, then every removal.
///
/// A failed addition aborts before any removal runs, so a principal never
/// ends up with less access than intended mid-reconciliation.
pub async fn apply_plan(plan: &AssignmentPlan, writer: &dyn AssignmentWriter) -> Result<()> {
    for assignment in &plan.should_add {
        writer.add_assignment(assignment).await.with_context(|| {
            format!(
                "Failed to add role {} for principal {}",
                assignment.app_role_id, assignment.principal_id
            )
        })?;
    }

    for assignment in &plan.should_remove {
        writer.remove_assignment(assignment).await.with_context(|| {
            format!(
                "Failed to remove role {} for principal {}",
                assignment.app_role_id, assignment.principal_id
            )
        })?;
    }

    info!(
        added = plan.should_add.len(),
        removed = plan.should_remove.len(),
        "Applied app role assignment changes"
    );
    Ok(())
}
