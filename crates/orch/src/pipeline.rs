//! Mode orchestration: plan, implement and fix.
//!
//! Each mode is a straight sequence of awaited stages. Every intermediate
//! product is written to the artifact store as soon as it exists, and a
//! parse or apply failure is reported to the pull request before the error
//! is returned.

use crate::error::{OrchestratorError, Result};
use crate::exit_codes;
use crate::fix_loop::{FixLoop, FixOutcome};
use crate::git::{self, CommitOutcome};
use crate::github::PullRequestHost;
use crate::provider::ProviderGateway;
use crate::scope::{self, ScopeError};
use crate::verifier::TestSuite;
use chrono::Utc;
use orch_core::comment::{self, format_test_results};
use orch_core::config::Config;
use orch_core::json::parse_object;
use orch_core::plan_markdown::render_plan;
use orch_core::{
    all_passed, prompts, ArtifactStore, ChangeSet, Plan, ReportRow, RunDescriptor, RunMode, Scope,
};
use std::path::Path;
use tracing::{info, warn};

const IMPLEMENT_TITLE: &str = "AI Implementation";
const PLAN_TITLE: &str = "AI Plan";

/// How a mode finished when it did not fail.
#[derive(Debug)]
pub enum RunOutcome {
    Planned(Plan),
    Implemented { tests_passed: bool, pushed: bool },
    Fixed(FixOutcome),
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Planned(_) | Self::Implemented { tests_passed: true, .. } => exit_codes::OK,
            Self::Implemented { tests_passed: false, .. } => exit_codes::TESTS_FAILING,
            Self::Fixed(outcome) => match outcome {
                FixOutcome::AlreadyPassing | FixOutcome::Fixed { .. } => exit_codes::OK,
                FixOutcome::Exhausted { .. } => exit_codes::TESTS_FAILING,
                FixOutcome::Aborted { .. } => exit_codes::STAGE_FAILED,
            },
        }
    }
}

/// Collaborators for one run.
pub struct Pipeline<'a> {
    config: &'a Config,
    gateway: &'a ProviderGateway,
    suite: &'a dyn TestSuite,
    repo_root: &'a Path,
    host: Option<&'a dyn PullRequestHost>,
}

impl std::fmt::Debug for Pipeline<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("gateway", self.gateway)
            .field("repo_root", &self.repo_root)
            .field("has_host", &self.host.is_some())
            .finish_non_exhaustive()
    }
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Config,
        gateway: &'a ProviderGateway,
        suite: &'a dyn TestSuite,
        repo_root: &'a Path,
    ) -> Self {
        Self {
            config,
            gateway,
            suite,
            repo_root,
            host: None,
        }
    }

    pub fn with_host(mut self, host: &'a dyn PullRequestHost) -> Self {
        self.host = Some(host);
        self
    }

    /// Run the descriptor's mode to completion.
    pub async fn run(
        &self,
        descriptor: &RunDescriptor,
        store: &mut ArtifactStore,
    ) -> Result<RunOutcome> {
        store.write_json(&format!("descriptor-{}.json", descriptor.mode), descriptor)?;
        let start = Utc::now();

        let outcome = match descriptor.mode {
            RunMode::Plan => self.run_plan(descriptor, store).await,
            RunMode::Implement => self.run_implement(descriptor, store).await,
            RunMode::Fix => self.run_fix(descriptor, store).await,
        };

        let duration_ms = u64::try_from((Utc::now() - start).num_milliseconds()).unwrap_or(0);
        let row = ReportRow::now("RUN_END").with_duration_ms(duration_ms);
        let row = match &outcome {
            Ok(o) => row.with_message(format!("run={} exit={}", descriptor.run_id, o.exit_code())),
            Err(e) => row.with_message(format!("run={} error: {e}", descriptor.run_id)),
        };
        store.record(row)?;
        outcome
    }

    /// Post a comment when the run is tied to a pull request.
    async fn comment(
        &self,
        descriptor: &RunDescriptor,
        store: &mut ArtifactStore,
        body: &str,
    ) -> Result<()> {
        let (Some(pr), Some(host)) = (descriptor.pr_number, self.host) else {
            info!("no pull request to comment on, skipping");
            return Ok(());
        };
        host.comment_on_pull_request(&descriptor.repository, pr, body).await?;
        store.write("commented.txt", &format!("pr={pr}\n\n{body}"))?;
        Ok(())
    }

    /// Ask the model for a plan and persist it.
    async fn generate_plan(
        &self,
        descriptor: &RunDescriptor,
        store: &mut ArtifactStore,
        structure: &str,
    ) -> Result<Plan> {
        let prompt = prompts::planner(&descriptor.feature_text, structure, self.suite.commands());
        let raw = self
            .gateway
            .call(
                &prompt.system,
                &prompt.user,
                descriptor.constraints.max_plan_tokens,
            )
            .await?;
        store.write("plan-raw.txt", &raw)?;

        match parse_object::<Plan>(&raw) {
            Ok(plan) => {
                store.write_json("plan.json", &plan)?;
                info!(
                    stage = "plan",
                    files = plan.files_to_modify.len() + plan.files_to_create.len(),
                    "plan generated"
                );
                Ok(plan)
            }
            Err(e) => {
                warn!(stage = "plan", error = %e, "could not parse plan response");
                let body = comment::parse_failure(
                    PLAN_TITLE,
                    &e.to_string(),
                    &raw,
                    self.config.comment_preview_chars,
                );
                self.comment(descriptor, store, &body).await?;
                Err(OrchestratorError::PlanParse(e))
            }
        }
    }

    pub async fn run_plan(
        &self,
        descriptor: &RunDescriptor,
        store: &mut ArtifactStore,
    ) -> Result<RunOutcome> {
        info!(stage = "plan", "running plan mode");
        let structure = scope::repo_structure(self.repo_root);
        let plan = self.generate_plan(descriptor, store, &structure).await?;

        let body = render_plan(&plan);
        store.write("plan-comment.md", &body)?;
        self.comment(descriptor, store, &body).await?;
        Ok(RunOutcome::Planned(plan))
    }

    pub async fn run_implement(
        &self,
        descriptor: &RunDescriptor,
        store: &mut ArtifactStore,
    ) -> Result<RunOutcome> {
        info!(stage = "implement", "running implement mode");
        let structure = scope::repo_structure(self.repo_root);

        let plan = if let Some(plan) = &descriptor.prior_plan {
            info!(stage = "plan", "reusing plan from earlier comment, skipping planning");
            store.write_json("plan.json", plan)?;
            plan.clone()
        } else {
            self.generate_plan(descriptor, store, &structure).await?
        };

        let scope = match scope::resolve(
            self.gateway,
            &plan,
            &structure,
            self.repo_root,
            &descriptor.constraints,
        )
        .await
        {
            Ok(resolution) => {
                store.write("scope-raw.txt", &resolution.raw)?;
                store.write_json("scope.json", &resolution.scope)?;
                resolution.scope
            }
            Err(ScopeError::Parse { source, raw }) => {
                store.write("scope-raw.txt", &raw)?;
                let body = comment::parse_failure(
                    IMPLEMENT_TITLE,
                    &source.to_string(),
                    &raw,
                    self.config.comment_preview_chars,
                );
                self.comment(descriptor, store, &body).await?;
                return Err(ScopeError::Parse { source, raw }.into());
            }
            Err(e) => return Err(e.into()),
        };

        let files = scope::read_file_contents(self.repo_root, &scope);
        let prompt = prompts::implementer(&plan, &scope, &files, self.config.change_format);
        let raw = self
            .gateway
            .call(
                &prompt.system,
                &prompt.user,
                descriptor.constraints.max_implement_tokens,
            )
            .await?;
        store.write("implement-raw.txt", &raw)?;

        let change = match ChangeSet::parse(
            self.config.change_format,
            &raw,
            self.config.strict_diff,
            descriptor.constraints.max_diff_lines,
        ) {
            Ok(change) => change,
            Err(e) => {
                warn!(stage = "implement", error = %e, "could not parse implementation");
                store.write("apply-error.txt", &e.to_string())?;
                let body = comment::parse_failure(
                    IMPLEMENT_TITLE,
                    &e.to_string(),
                    &raw,
                    self.config.comment_preview_chars,
                );
                self.comment(descriptor, store, &body).await?;
                return Err(e.into());
            }
        };
        store.write(&change.artifact_name("changes"), &change.payload())?;

        let report = match change.apply(self.repo_root) {
            Ok(report) => report,
            Err(e) => {
                warn!(stage = "implement", error = %e, "could not apply implementation");
                store.write("apply-error.txt", &e.to_string())?;
                let body = comment::apply_failure(IMPLEMENT_TITLE, &e.to_string());
                self.comment(descriptor, store, &body).await?;
                return Err(e.into());
            }
        };
        store.write("change-summary.txt", &report.summarize())?;

        let results = self.suite.run_all().await;
        store.write_json("test-results.json", &results)?;
        store.write("test-output.txt", &format_test_results(&results))?;
        let tests_passed = all_passed(&results);

        let pushed = tests_passed && self.commit(store, &plan.summary)?;
        let body = comment::implementation_result(&plan.summary, &report, &results, pushed);
        self.comment(descriptor, store, &body).await?;

        info!(stage = "implement", tests_passed, pushed, "implement mode complete");
        Ok(RunOutcome::Implemented {
            tests_passed,
            pushed,
        })
    }

    pub async fn run_fix(
        &self,
        descriptor: &RunDescriptor,
        store: &mut ArtifactStore,
    ) -> Result<RunOutcome> {
        info!(stage = "fix", "running fix mode");
        let plan: Plan = store
            .read_json("plan.json")
            .map_err(|e| OrchestratorError::MissingArtifacts(e.to_string()))?;
        let scope: Scope = store
            .read_json("scope.json")
            .map_err(|e| OrchestratorError::MissingArtifacts(e.to_string()))?;

        let outcome = FixLoop::new(
            self.gateway,
            self.suite,
            self.repo_root,
            &scope,
            descriptor.constraints,
        )
        .with_format(self.config.change_format)
        .with_strict_diff(self.config.strict_diff)
        .run(store)
        .await?;
        store.write("fix-result.txt", &outcome.result_line())?;

        let body = match &outcome {
            FixOutcome::AlreadyPassing => comment::fix_success(0, false),
            FixOutcome::Fixed { iterations } => {
                let pushed = self.commit(store, &plan.summary)?;
                comment::fix_success(*iterations, pushed)
            }
            FixOutcome::Exhausted {
                iterations,
                failures,
            } => comment::fix_exhausted(*iterations, &format_test_results(failures)),
            FixOutcome::Aborted { iteration, error } => {
                comment::fix_aborted(*iteration, &error.to_string())
            }
        };
        self.comment(descriptor, store, &body).await?;
        Ok(RunOutcome::Fixed(outcome))
    }

    /// Commit and push applied changes. Git failures are recorded, not fatal.
    fn commit(&self, store: &mut ArtifactStore, summary: &str) -> Result<bool> {
        if !self.config.commit_changes {
            return Ok(false);
        }
        match git::commit_and_push(
            self.repo_root,
            &git::commit_message(summary),
            store.root(),
        ) {
            Ok(CommitOutcome::Pushed) => Ok(true),
            Ok(CommitOutcome::NothingToCommit) => Ok(false),
            Err(e) => {
                warn!(error = %e, "failed to commit or push changes");
                store.write("git-error.txt", &e.to_string())?;
                Ok(false)
            }
        }
    }
}
