//! Normalization Engine
//!
//! Brings policy statements and member lists into a canonical, comparable
//! form. Every function here is total: malformed statements are logged and
//! skipped, never reported as errors.

use std::collections::BTreeMap;

use tracing::warn;

use super::types::{PolicyInfo, IDQL_VERSION};

/// Three-way classification of two member sets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberDiff {
    pub only_in_a: Vec<String>,
    pub in_both: Vec<String>,
    pub only_in_b: Vec<String>,
}

impl MemberDiff {
    /// Both sides hold the same members
    pub fn is_converged(&self) -> bool {
        self.only_in_a.is_empty() && self.only_in_b.is_empty()
    }
}

/// Merge statements into one statement per distinct (resource, action) pair.
///
/// Members of statements sharing a pair are unioned. Statements with a blank
/// resource id and blank action URIs are dropped. Output is sorted by
/// resource id, then action URI.
pub fn flatten(policies: &[PolicyInfo]) -> Vec<PolicyInfo> {
    let mut grouped: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();

    for policy in policies {
        let resource = policy.resource_id.trim();
        if resource.is_empty() {
            warn!(
                actions = ?policy.actions,
                "Dropping policy statement without a resource id"
            );
            continue;
        }

        if policy.actions.iter().all(|a| a.trim().is_empty()) {
            warn!(resource = %resource, "Dropping policy statement without actions");
            continue;
        }

        for action in &policy.actions {
            let action = action.trim();
            if action.is_empty() {
                warn!(resource = %resource, "Skipping blank action URI");
                continue;
            }

            let members = grouped
                .entry((resource.to_string(), action.to_string()))
                .or_default();
            let merged = compact_members(members, &policy.subject_members);
            *members = merged;
        }
    }

    grouped
        .into_iter()
        .map(|((resource, action), members)| PolicyInfo {
            version: IDQL_VERSION.to_string(),
            actions: vec![action],
            subject_members: members,
            resource_id: resource,
        })
        .collect()
}

/// Concatenate two member lists into a trimmed, sorted, duplicate-free list.
pub fn compact_members(existing: &[String], new: &[String]) -> Vec<String> {
    let mut members: Vec<String> = existing
        .iter()
        .chain(new.iter())
        .map(|m| m.trim())
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect();

    members.sort();
    members.dedup();
    members
}

/// Classify the members of `a` and `b` as only-in-a, in-both, only-in-b.
///
/// Both inputs are compacted first, so blank entries appear in no output.
pub fn diff_unique(a: &[String], b: &[String]) -> MemberDiff {
    let a = compact_members(a, &[]);
    let b = compact_members(b, &[]);

    let mut diff = MemberDiff::default();
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => {
                diff.only_in_a.push(a[i].clone());
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                diff.only_in_b.push(b[j].clone());
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                diff.in_both.push(a[i].clone());
                i += 1;
                j += 1;
            }
        }
    }

    diff.only_in_a.extend(a[i..].iter().cloned());
    diff.only_in_b.extend(b[j..].iter().cloned());
    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn policy(actions: &[&str], members: &[&str], resource: &str) -> PolicyInfo {
        PolicyInfo::new(strings(actions), strings(members), resource)
    }

    #[test]
    fn test_flatten_merges_members_for_same_pair() {
        let flat = flatten(&[
            policy(&["A"], &["x"], "R"),
            policy(&["A"], &["y"], "R"),
        ]);

        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].resource_id, "R");
        assert_eq!(flat[0].actions, strings(&["A"]));
        assert_eq!(flat[0].subject_members, strings(&["x", "y"]));
    }

    #[test]
    fn test_flatten_splits_multi_action_statements() {
        let flat = flatten(&[policy(&["http:POST", "http:GET"], &["b", "a", "b"], "/hr")]);

        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].actions, strings(&["http:GET"]));
        assert_eq!(flat[1].actions, strings(&["http:POST"]));
        for p in &flat {
            assert_eq!(p.subject_members, strings(&["a", "b"]));
        }
    }

    #[test]
    fn test_flatten_sorts_by_resource_then_action() {
        let flat = flatten(&[
            policy(&["http:PUT"], &["m"], "/b"),
            policy(&["http:GET"], &["m"], "/b"),
            policy(&["http:PUT"], &["m"], "/a"),
        ]);

        let keys: Vec<(String, String)> = flat
            .iter()
            .map(|p| (p.resource_id.clone(), p.actions[0].clone()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("/a".to_string(), "http:PUT".to_string()),
                ("/b".to_string(), "http:GET".to_string()),
                ("/b".to_string(), "http:PUT".to_string()),
            ]
        );
    }

    #[test]
    fn test_flatten_drops_blank_resource_and_action() {
        let flat = flatten(&[
            policy(&["http:GET"], &["x"], "  "),
            policy(&[], &["x"], "/r"),
            policy(&[" "], &["x"], "/r"),
            policy(&["", "http:GET"], &["x"], "/r"),
        ]);

        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].actions, strings(&["http:GET"]));
    }

    #[test]
    fn test_flatten_keeps_statements_with_no_members() {
        let flat = flatten(&[policy(&["http:GET"], &[], "/r")]);

        assert_eq!(flat.len(), 1);
        assert!(flat[0].subject_members.is_empty());
    }

    #[test]
    fn test_flatten_is_idempotent() {
        let once = flatten(&[
            policy(&["http:GET", "http:PUT"], &["y", "x"], "/r"),
            policy(&["http:GET"], &["z"], "/r"),
        ]);
        let twice = flatten(&once);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_compact_members() {
        let compacted = compact_members(&strings(&["b", " a ", ""]), &strings(&["a", "c", "  "]));
        assert_eq!(compacted, strings(&["a", "b", "c"]));
    }

    #[test]
    fn test_diff_unique() {
        let diff = diff_unique(&strings(&["a", "b"]), &strings(&["b", "c"]));

        assert_eq!(diff.only_in_a, strings(&["a"]));
        assert_eq!(diff.in_both, strings(&["b"]));
        assert_eq!(diff.only_in_b, strings(&["c"]));
        assert!(!diff.is_converged());
    }

    #[test]
    fn test_diff_unique_excludes_blank_entries() {
        let diff = diff_unique(&strings(&["", "a", " "]), &strings(&["\t", "a"]));

        assert!(diff.only_in_a.is_empty());
        assert!(diff.only_in_b.is_empty());
        assert_eq!(diff.in_both, strings(&["a"]));
        assert!(diff.is_converged());
    }

    #[test]
    fn test_diff_unique_ignores_order_and_duplicates() {
        let diff = diff_unique(&strings(&["c", "a", "a"]), &strings(&["a", "c"]));
        assert!(diff.is_converged());
        assert_eq!(diff.in_both, strings(&["a", "c"]));
    }
}
