//! Orchestrator error taxonomy

use thiserror::Error;

use crate::providers::ProviderKind;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors surfaced by policy and orchestration operations
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Unknown application alias
    #[error("Application not found: {0}")]
    ApplicationNotFound(String),

    /// Unknown integration alias or id
    #[error("Integration not found: {0}")]
    IntegrationNotFound(String),

    /// No usable adapter for the integration serving an alias
    #[error("No provider adapter for {alias}: {reason}")]
    AdapterNotFound { alias: String, reason: String },

    /// Target policies reference more than one resource id
    #[error("Ambiguous target resource: {0:?}")]
    AmbiguousTarget(Vec<String>),

    /// Target exposes no policy to take a resource id or action from
    #[error("Target application has no policy to retain a resource or action from")]
    NoTargetResource,

    /// Provider pair is not allow-listed
    #[error("Orchestration from {from} to {to} is unsupported")]
    UnsupportedPair { from: ProviderKind, to: ProviderKind },

    /// Member cannot be replayed across a restricted provider pair
    #[error("Member {member} is not a user and cannot be orchestrated from {from} to {to}")]
    NonUserMember {
        member: String,
        from: ProviderKind,
        to: ProviderKind,
    },

    /// Provider accepted the call but did not report the write as created
    #[error("Provider {provider} rejected policy write (status {status})")]
    ProviderWrite { provider: ProviderKind, status: u16 },

    /// Adapter or client failure
    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}
