//! Application discovery
//!
//! A [`Scheduler`] drives the [`DiscoveryWorker`] on a fixed period, feeding
//! it every integration in the inventory.

pub mod scheduler;
pub mod worker;

pub use scheduler::{Scheduler, SchedulerState, WorkFinder, Worker};
pub use worker::{DiscoveryConfig, DiscoveryReport, DiscoveryWorker, IntegrationFinder};
