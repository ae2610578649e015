//! Provider pair rules

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::providers::ProviderKind;

/// How policy may travel between two providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairRule {
    /// Same provider on both ends
    Same,
    /// Allowed for user members only; actions are taken from the target
    Restricted,
    /// Allowed without member restrictions
    Trusted,
}

impl PairRule {
    pub fn requires_user_members(&self) -> bool {
        matches!(self, PairRule::Restricted)
    }

    pub fn retains_target_action(&self) -> bool {
        matches!(self, PairRule::Restricted)
    }
}

const RESTRICTED_PAIRS: &[(ProviderKind, ProviderKind)] = &[
    (ProviderKind::CloudIam, ProviderKind::IdentityPlatform),
    (ProviderKind::IdentityPlatform, ProviderKind::CloudIam),
];

const TRUSTED_PAIRS: &[(ProviderKind, ProviderKind)] = &[
    (ProviderKind::ApiGateway, ProviderKind::PolicyAgent),
    (ProviderKind::PolicyAgent, ProviderKind::ApiGateway),
];

/// Look up the rule for orchestrating from `from` to `to`
pub fn pair_rule(from: ProviderKind, to: ProviderKind) -> OrchestratorResult<PairRule> {
    if from == to {
        return Ok(PairRule::Same);
    }
    if RESTRICTED_PAIRS.contains(&(from, to)) {
        return Ok(PairRule::Restricted);
    }
    if TRUSTED_PAIRS.contains(&(from, to)) {
        return Ok(PairRule::Trusted);
    }
    Err(OrchestratorError::UnsupportedPair { from, to })
}
