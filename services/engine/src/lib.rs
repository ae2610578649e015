//! IDQL Orchestrator Library
//!
//! Policy reconciliation and sync across cloud IAM, identity platform,
//! API gateway and policy-agent providers.

pub mod config;
pub mod discovery;
pub mod error;
pub mod fanout;
pub mod inventory;
pub mod lro;
pub mod orchestrator;
pub mod policy;
pub mod providers;

pub use discovery::{DiscoveryConfig, DiscoveryReport, DiscoveryWorker, Scheduler, SchedulerState};
pub use error::{OrchestratorError, OrchestratorResult};
pub use inventory::{Application, Integration, Inventory};
pub use orchestrator::{OrchestrationRequest, Orchestrator};
pub use policy::{calc_updates, PolicyInfo, ResourceActionRoles};
pub use providers::{ProviderAdapter, ProviderKind, ProviderRegistry};
