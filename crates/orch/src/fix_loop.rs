//! Bounded repair loop driven by failing tests.
//!
//! Iteration `n` (1-based) makes exactly one model call. The loop stops on
//! the first green test run, on the first change-set that cannot be parsed
//! or applied, or after `max_iterations` attempts.

use crate::provider::{ProviderError, ProviderGateway};
use crate::scope::read_file_contents;
use crate::verifier::TestSuite;
use orch_core::artifacts::ArtifactError;
use orch_core::comment::format_test_results;
use orch_core::config::ChangeFormat;
use orch_core::{
    all_passed, prompts, ArtifactStore, ChangeSet, Constraints, PatchError, ReportRow, Scope,
    TestResult,
};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum FixError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

pub type Result<T> = std::result::Result<T, FixError>;

/// Terminal state of one fix-loop run.
#[derive(Debug)]
pub enum FixOutcome {
    /// The initial test run passed; no model call was made.
    AlreadyPassing,
    Fixed { iterations: u32 },
    /// Every iteration was used and tests still fail.
    Exhausted {
        iterations: u32,
        failures: Vec<TestResult>,
    },
    /// A fix could not be parsed or applied; the loop stopped there.
    Aborted { iteration: u32, error: PatchError },
}

impl FixOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::AlreadyPassing | Self::Fixed { .. })
    }

    /// Line recorded in `fix-result.txt`.
    pub fn result_line(&self) -> String {
        match self {
            Self::AlreadyPassing => "All tests passing.".to_string(),
            Self::Fixed { iterations } => format!("Fixed after {iterations} iteration(s)."),
            Self::Exhausted { iterations, .. } => {
                format!("Failed to fix after {iterations} iterations.")
            }
            Self::Aborted { iteration, error } => {
                format!("Stopped at iteration {iteration}: {error}")
            }
        }
    }
}

fn failing(results: &[TestResult]) -> Vec<TestResult> {
    results.iter().filter(|r| !r.success).cloned().collect()
}

fn stem(iteration: u32) -> String {
    format!("fix-{iteration:02}")
}

/// Collaborators and bounds for one fix-loop run.
pub struct FixLoop<'a> {
    gateway: &'a ProviderGateway,
    suite: &'a dyn TestSuite,
    repo_root: &'a Path,
    scope: &'a Scope,
    format: ChangeFormat,
    strict_diff: bool,
    constraints: Constraints,
}

impl std::fmt::Debug for FixLoop<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixLoop")
            .field("repo_root", &self.repo_root)
            .field("format", &self.format)
            .field("max_iterations", &self.constraints.max_iterations)
            .finish_non_exhaustive()
    }
}

impl<'a> FixLoop<'a> {
    pub fn new(
        gateway: &'a ProviderGateway,
        suite: &'a dyn TestSuite,
        repo_root: &'a Path,
        scope: &'a Scope,
        constraints: Constraints,
    ) -> Self {
        Self {
            gateway,
            suite,
            repo_root,
            scope,
            format: ChangeFormat::default(),
            strict_diff: true,
            constraints,
        }
    }

    pub fn with_format(mut self, format: ChangeFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_strict_diff(mut self, strict_diff: bool) -> Self {
        self.strict_diff = strict_diff;
        self
    }

    pub async fn run(&self, store: &mut ArtifactStore) -> Result<FixOutcome> {
        let initial = self.suite.run_all().await;
        store.write_json("test-results.json", &initial)?;
        if all_passed(&initial) {
            info!(stage = "fix", "tests already passing, nothing to fix");
            return Ok(FixOutcome::AlreadyPassing);
        }

        let max = self.constraints.max_iterations;
        let mut failures = failing(&initial);

        for iteration in 1..=max {
            info!(
                stage = "fix",
                iteration,
                max_iterations = max,
                failing = failures.len(),
                "fix iteration"
            );
            let name = stem(iteration);

            let files = read_file_contents(self.repo_root, self.scope);
            let prompt = prompts::fixer(&format_test_results(&failures), &files, self.format);
            let raw = self
                .gateway
                .call(&prompt.system, &prompt.user, self.constraints.max_fix_tokens)
                .await?;
            store.write(&format!("{name}-raw.txt"), &raw)?;

            let change = match ChangeSet::parse(
                self.format,
                &raw,
                self.strict_diff,
                self.constraints.max_diff_lines,
            ) {
                Ok(change) => change,
                Err(error) => {
                    warn!(iteration, error = %error, "could not parse fix response");
                    store.write(&format!("{name}-parse-error.txt"), &error.to_string())?;
                    return Ok(FixOutcome::Aborted { iteration, error });
                }
            };
            store.write(&change.artifact_name(&name), &change.payload())?;

            let report = match change.apply(self.repo_root) {
                Ok(report) => report,
                Err(error) => {
                    warn!(iteration, error = %error, "could not apply fix");
                    store.write(&format!("{name}-apply-error.txt"), &error.to_string())?;
                    return Ok(FixOutcome::Aborted { iteration, error });
                }
            };

            let results = self.suite.run_all().await;
            store.write_json(&format!("{name}-test-results.json"), &results)?;
            let passed = all_passed(&results);
            store.record(
                ReportRow::now("FIX_ITERATION")
                    .with_iteration(iteration)
                    .with_message(format!(
                        "files={} passed={passed}",
                        report.files.len()
                    )),
            )?;

            if passed {
                info!(stage = "fix", iterations = iteration, "tests passing after fix");
                return Ok(FixOutcome::Fixed {
                    iterations: iteration,
                });
            }
            failures = failing(&results);
        }

        warn!(stage = "fix", iterations = max, "fix loop exhausted");
        Ok(FixOutcome::Exhausted {
            iterations: max,
            failures,
        })
    }
}
