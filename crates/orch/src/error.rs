//! Top-level error taxonomy for one orchestrator run.

use crate::descriptor::DescriptorError;
use crate::exit_codes;
use crate::fix_loop::FixError;
use crate::github::HostError;
use crate::provider::ProviderError;
use crate::scope::ScopeError;
use orch_core::artifacts::ArtifactError;
use orch_core::config::ConfigError;
use orch_core::json::ExtractError;
use orch_core::PatchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("model call failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("pull-request host error: {0}")]
    Host(#[from] HostError),
    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("could not parse plan response: {0}")]
    PlanParse(ExtractError),
    #[error("scope resolution failed: {0}")]
    Scope(#[from] ScopeError),
    #[error("change-set rejected: {0}")]
    Patch(#[from] PatchError),
    #[error("fix mode requires artifacts from a prior implement run: {0}")]
    MissingArtifacts(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl From<FixError> for OrchestratorError {
    fn from(e: FixError) -> Self {
        match e {
            FixError::Provider(e) => Self::Provider(e),
            FixError::Artifact(e) => Self::Artifact(e),
        }
    }
}

impl OrchestratorError {
    /// Parse and apply failures end the current stage after being reported
    /// to the pull request. Everything else is fatal for the run.
    pub fn is_stage_failure(&self) -> bool {
        matches!(
            self,
            Self::PlanParse(_) | Self::Patch(_) | Self::Scope(ScopeError::Parse { .. })
        )
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_stage_failure() {
            exit_codes::STAGE_FAILED
        } else {
            exit_codes::FATAL
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_failures_map_to_their_exit_code() {
        let truncated = OrchestratorError::from(PatchError::Truncated { line: "+ ".into() });
        assert!(truncated.is_stage_failure());
        assert_eq!(truncated.exit_code(), exit_codes::STAGE_FAILED);

        let plan = OrchestratorError::PlanParse(ExtractError::NoObject);
        assert_eq!(plan.exit_code(), exit_codes::STAGE_FAILED);
    }

    #[test]
    fn configuration_and_provider_errors_are_fatal() {
        let missing = OrchestratorError::from(DescriptorError::MissingRepository);
        assert!(!missing.is_stage_failure());
        assert_eq!(missing.exit_code(), exit_codes::FATAL);

        let provider = OrchestratorError::from(FixError::Provider(ProviderError::NoProviders));
        assert!(matches!(provider, OrchestratorError::Provider(_)));
        assert_eq!(provider.exit_code(), exit_codes::FATAL);
    }
}
