//! Run descriptor builder.
//!
//! Turns the heterogeneous CI trigger (manual dispatch, issue comment, pull
//! request label, plan-comment reaction) into one immutable [`RunDescriptor`].

use crate::github::{HostError, PullRequestHost};
use chrono::Utc;
use orch_core::config::Config;
use orch_core::plan_markdown::{is_plan_comment, parse_plan_comment};
use orch_core::{Id, Plan, RunDescriptor, RunMode, TriggerInfo, TriggerSource};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("missing repository (set GITHUB_REPOSITORY or --repository)")]
    MissingRepository,
    #[error("missing commit id (set GITHUB_SHA or --sha)")]
    MissingCommit,
    #[error("invalid mode override: {0}")]
    InvalidMode(String),
    #[error("comment {0} does not contain a plan")]
    NotAPlan(u64),
    #[error(transparent)]
    Host(#[from] HostError),
}

pub type Result<T> = std::result::Result<T, DescriptorError>;

/// Used when every other feature source is empty.
pub const PLACEHOLDER_FEATURE: &str =
    "No feature text provided. Produce a reasonable planning checklist and ask for missing details.";

const SLASH_COMMAND: &str = "/ai";

/// Raw trigger inputs as collected at the CLI boundary.
#[derive(Debug, Clone, Default)]
pub struct TriggerInputs {
    pub mode_override: Option<String>,
    pub feature_override: Option<String>,
    pub pr_number_override: Option<u64>,
    pub plan_comment_id: Option<u64>,
    pub event_name: String,
    /// Parsed webhook payload; `Value::Null` when unavailable.
    pub event: Value,
    pub repository: Option<String>,
    pub commit_id: Option<String>,
}

impl TriggerInputs {
    fn comment_body(&self) -> Option<&str> {
        self.event
            .pointer("/comment/body")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|b| !b.is_empty())
    }

    fn is_reaction(&self) -> bool {
        self.event_name.contains("reaction") || self.event.get("reaction").is_some()
    }
}

/// Split a leading `/ai <word>` command off a comment body.
///
/// Returns the command word and the text after it.
pub fn parse_slash_command(body: &str) -> Option<(&str, &str)> {
    let body = body.trim_start();
    let prefix = body.get(..SLASH_COMMAND.len())?;
    if !prefix.eq_ignore_ascii_case(SLASH_COMMAND) {
        return None;
    }
    let rest = &body[SLASH_COMMAND.len()..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim_start();
    let end = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    Some((&rest[..end], rest[end..].trim()))
}

/// Mode from override, slash command, pull-request label, else `plan`.
pub fn resolve_mode(inputs: &TriggerInputs) -> Result<RunMode> {
    if let Some(raw) = inputs
        .mode_override
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
    {
        return raw.parse().map_err(DescriptorError::InvalidMode);
    }

    match TriggerSource::from_event_name(&inputs.event_name) {
        TriggerSource::IssueComment => {
            let Some((word, _)) = inputs.comment_body().and_then(parse_slash_command) else {
                return Ok(RunMode::Plan);
            };
            Ok(word.parse().unwrap_or_else(|_| {
                warn!(command = word, "unknown slash command, defaulting to plan");
                RunMode::Plan
            }))
        }
        TriggerSource::PullRequest => {
            let label = inputs
                .event
                .pointer("/label/name")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(match label {
                "ai-implement" => RunMode::Implement,
                "ai-fix" => RunMode::Fix,
                _ => RunMode::Plan,
            })
        }
        _ => Ok(RunMode::Plan),
    }
}

/// PR number from override, the pull-request payload, or a PR-backed issue.
pub fn resolve_pr_number(inputs: &TriggerInputs) -> Option<u64> {
    if let Some(n) = inputs.pr_number_override.filter(|n| *n > 0) {
        return Some(n);
    }
    if let Some(n) = inputs.event.pointer("/pull_request/number").and_then(Value::as_u64) {
        return Some(n);
    }
    let issue = inputs.event.get("issue")?;
    issue.get("pull_request")?;
    issue.get("number").and_then(Value::as_u64)
}

/// Builds the run descriptor from trigger inputs.
pub struct DescriptorBuilder<'a> {
    config: &'a Config,
    host: Option<&'a dyn PullRequestHost>,
}

impl std::fmt::Debug for DescriptorBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorBuilder")
            .field("has_host", &self.host.is_some())
            .finish_non_exhaustive()
    }
}

impl<'a> DescriptorBuilder<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config, host: None }
    }

    pub fn with_host(mut self, host: &'a dyn PullRequestHost) -> Self {
        self.host = Some(host);
        self
    }

    pub async fn build(&self, inputs: &TriggerInputs) -> Result<RunDescriptor> {
        let repository = inputs
            .repository
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or(DescriptorError::MissingRepository)?
            .to_string();
        let commit_id = inputs
            .commit_id
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(DescriptorError::MissingCommit)?
            .to_string();

        let mode = resolve_mode(inputs)?;
        let pr_number = resolve_pr_number(inputs);
        let prior = self.prior_plan(inputs, &repository, pr_number).await?;
        let feature_text = self
            .feature_text(inputs, &repository, pr_number, prior.as_ref())
            .await?;

        let trigger = TriggerInfo {
            event_name: inputs.event_name.clone(),
            actor: inputs
                .event
                .pointer("/sender/login")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            source: TriggerSource::from_event_name(&inputs.event_name),
        };

        let run_id = Id::new();
        info!(
            %run_id,
            %mode,
            repository = %repository,
            pr_number = ?pr_number,
            prior_plan = prior.is_some(),
            "run descriptor built"
        );

        Ok(RunDescriptor {
            run_id,
            mode,
            repository,
            commit_id,
            pr_number,
            feature_text,
            prior_plan: prior.map(|p| p.plan),
            trigger,
            constraints: self.config.constraints(),
            created_at: Utc::now(),
        })
    }

    /// Plan comment referenced by id, or the newest one when reacting.
    async fn prior_plan(
        &self,
        inputs: &TriggerInputs,
        repository: &str,
        pr_number: Option<u64>,
    ) -> Result<Option<PriorPlan>> {
        let wants_lookup = inputs.plan_comment_id.is_some() || inputs.is_reaction();
        if !wants_lookup {
            return Ok(None);
        }
        let Some(host) = self.host else {
            warn!("plan comment lookup requested but no pull-request host is configured");
            return Ok(None);
        };

        if let Some(id) = inputs.plan_comment_id {
            let body = host.get_comment_by_id(repository, id).await?;
            let plan = parse_plan_comment(&body).ok_or(DescriptorError::NotAPlan(id))?;
            debug!(comment_id = id, "recovered plan from comment");
            return Ok(Some(PriorPlan { plan, body }));
        }

        let Some(pr) = pr_number else {
            warn!("reaction trigger without a pull request, cannot locate plan comment");
            return Ok(None);
        };
        let mut comments = host.get_recent_comments(repository, pr).await?;
        comments.sort_by_key(|c| std::cmp::Reverse(c.created_at));
        let found = comments
            .into_iter()
            .filter(|c| is_plan_comment(&c.body))
            .find_map(|c| {
                parse_plan_comment(&c.body).map(|plan| {
                    debug!(comment_id = c.id, "recovered newest plan comment");
                    PriorPlan { plan, body: c.body }
                })
            });
        if found.is_none() {
            warn!(pr_number = pr, "no plan comment found on pull request");
        }
        Ok(found)
    }

    async fn feature_text(
        &self,
        inputs: &TriggerInputs,
        repository: &str,
        pr_number: Option<u64>,
        prior: Option<&PriorPlan>,
    ) -> Result<String> {
        if let Some(text) = inputs
            .feature_override
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            return Ok(text.to_string());
        }

        if let Some(body) = inputs.comment_body() {
            let text = match parse_slash_command(body) {
                Some((_, rest)) => rest,
                None => body,
            };
            if !text.is_empty() {
                return Ok(text.to_string());
            }
        }

        if let Some(prior) = prior {
            let summary = prior.plan.summary.trim();
            return Ok(if summary.is_empty() {
                prior.body.trim().to_string()
            } else {
                summary.to_string()
            });
        }

        if let (Some(pr), Some(host)) = (pr_number, self.host) {
            let pr_text = host.get_pull_request_body(repository, pr).await?;
            let body = pr_text.body.trim();
            let body_part = if body.is_empty() {
                "PR Body: (empty)".to_string()
            } else {
                format!("PR Body:\n{body}")
            };
            return Ok(format!("PR Title: {}\n\n{body_part}", pr_text.title));
        }

        Ok(PLACEHOLDER_FEATURE.to_string())
    }
}

struct PriorPlan {
    plan: Plan,
    body: String,
}
