//! Canonical Policy Pipeline
//!
//! Provider-neutral IDQL statements and the algorithms that turn a desired
//! statement set into minimal provider-native changes.
//!
//! ## Layers
//!
//! - [`types`]: `PolicyInfo`, member and action URI helpers
//! - [`normalize`]: flatten / compact / three-way member diff
//! - [`rar`]: resource-action-role records and their canonical names
//! - [`reconcile`]: `calc_updates` over resource-action-role records
//! - [`assignments`]: add/remove planning for per-principal role assignments

pub mod assignments;
pub mod normalize;
pub mod rar;
pub mod reconcile;
pub mod types;

pub use assignments::{apply_plan, plan_assignments, AppRoleAssignment, AssignmentPlan, AssignmentWriter};
pub use normalize::{compact_members, diff_unique, flatten, MemberDiff};
pub use rar::{ResourceActionRoles, DEFAULT_RAR_PREFIX};
pub use reconcile::calc_updates;
pub use types::{HttpVerb, MemberKind, PolicyInfo, IDQL_VERSION};
