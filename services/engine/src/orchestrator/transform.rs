//! Policy rewrites applied before replaying policy on another application

use std::collections::BTreeSet;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::policy::{MemberKind, PolicyInfo};
use crate::providers::ProviderKind;

/// Rewrite every statement to carry the target's single resource id.
///
/// `target` must reference exactly one distinct non-blank resource id.
pub fn retain_resource(policies: &[PolicyInfo], target: &[PolicyInfo]) -> OrchestratorResult<Vec<PolicyInfo>> {
    let resources: BTreeSet<&str> = target
        .iter()
        .map(|p| p.resource_id.trim())
        .filter(|r| !r.is_empty())
        .collect();

    let resource = match resources.len() {
        0 => return Err(OrchestratorError::NoTargetResource),
        1 => resources.iter().next().copied().unwrap_or_default(),
        _ => {
            return Err(OrchestratorError::AmbiguousTarget(
                resources.iter().map(|r| r.to_string()).collect(),
            ))
        }
    };

    Ok(policies.iter().map(|p| p.with_resource(resource)).collect())
}

/// Replace every statement's actions with the target's first action URI
pub fn retain_action(policies: &[PolicyInfo], target: &[PolicyInfo]) -> OrchestratorResult<Vec<PolicyInfo>> {
    let action = target
        .iter()
        .flat_map(|p| p.actions.iter())
        .map(|a| a.trim())
        .find(|a| !a.is_empty())
        .ok_or(OrchestratorError::NoTargetResource)?;

    Ok(policies
        .iter()
        .map(|p| p.with_actions(vec![action.to_string()]))
        .collect())
}

/// Fail on the first subject member that is not a user
pub fn ensure_user_members(policies: &[PolicyInfo], from: ProviderKind, to: ProviderKind) -> OrchestratorResult<()> {
    let offender = policies
        .iter()
        .flat_map(|p| p.subject_members.iter())
        .find(|m| MemberKind::of(m) != MemberKind::User);

    match offender {
        Some(member) => Err(OrchestratorError::NonUserMember {
            member: member.clone(),
            from,
            to,
        }),
        None => Ok(()),
    }
}
