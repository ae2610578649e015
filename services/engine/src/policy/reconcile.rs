//! Reconciliation (Diff) Engine
//!
//! Computes the minimal set of resource-action-role records that must be
//! written to move a provider from its current state to a desired policy set.

use std::collections::{hash_map::Entry, BTreeMap, HashMap};

use tracing::{debug, warn};

use super::normalize::{compact_members, diff_unique, flatten};
use super::rar::{ResourceActionRoles, DEFAULT_RAR_PREFIX};
use super::types::PolicyInfo;

/// Compute the changed records needed to converge `existing` onto `desired`.
///
/// - Desired pairs the provider does not already expose are skipped; the
///   engine never creates resource/action pairs.
/// - A matched pair whose roles already equal the desired members yields no
///   update, so re-running against a converged provider returns nothing.
/// - A matched pair with an empty desired member set yields a record with
///   zero roles (remove every assignment for that action).
/// - Pairs not named by `desired` are never touched.
///
/// Output is ordered by canonical record name.
pub fn calc_updates(
    existing: &[ResourceActionRoles],
    desired: &[PolicyInfo],
) -> Vec<ResourceActionRoles> {
    let mut index: HashMap<String, &ResourceActionRoles> = HashMap::new();
    for rar in existing {
        match index.entry(rar.name(DEFAULT_RAR_PREFIX)) {
            Entry::Occupied(entry) => {
                warn!(name = %entry.key(), "Duplicate existing resource-action record, keeping first");
            }
            Entry::Vacant(entry) => {
                entry.insert(rar);
            }
        }
    }

    // Distinct action URIs may resolve to the same verb (`GET`, `http:GET`),
    // so desired members are merged per canonical name before diffing.
    let mut wanted: BTreeMap<String, (&ResourceActionRoles, Vec<String>)> = BTreeMap::new();

    for policy in flatten(desired) {
        let action = &policy.actions[0];
        let Some(candidate) = ResourceActionRoles::new(&policy.resource_id, action, &[]) else {
            warn!(
                resource = %policy.resource_id,
                action = %action,
                "Skipping desired statement that is not a valid resource action"
            );
            continue;
        };

        let name = candidate.name(DEFAULT_RAR_PREFIX);
        let Some(current) = index.get(&name) else {
            warn!(
                resource = %candidate.resource,
                action = %candidate.action,
                "Provider does not expose this resource action, skipping"
            );
            continue;
        };

        let entry = wanted.entry(name).or_insert_with(|| (*current, Vec::new()));
        entry.1 = compact_members(&entry.1, &policy.subject_members);
    }

    wanted
        .into_iter()
        .filter_map(|(name, (current, members))| {
            let diff = diff_unique(&current.roles, &members);
            if diff.is_converged() {
                debug!(name = %name, "Resource action already converged");
                return None;
            }

            debug!(
                name = %name,
                removed = diff.only_in_a.len(),
                added = diff.only_in_b.len(),
                "Resource action requires update"
            );

            let mut roles = diff.in_both;
            roles.extend(diff.only_in_b);
            Some(current.with_roles(&roles))
        })
        .collect()
}
