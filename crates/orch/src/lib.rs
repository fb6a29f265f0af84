//! orch - AI change orchestrator for CI
//!
//! Library components behind the `orch` binary: the provider gateway, the
//! run descriptor builder, scope resolution, the test runner, the fix loop
//! and the mode pipeline that ties them together.

pub mod descriptor;
pub mod error;
pub mod exit_codes;
pub mod fix_loop;
pub mod git;
pub mod github;
pub mod pipeline;
pub mod provider;
pub mod providers;
pub mod scope;
pub mod verifier;

pub use descriptor::{DescriptorBuilder, TriggerInputs};
pub use error::OrchestratorError;
pub use github::{GithubClient, PullRequestHost};
pub use pipeline::{Pipeline, RunOutcome};
pub use provider::{Provider, ProviderError, ProviderGateway};
pub use verifier::{TestRunner, TestSuite};
