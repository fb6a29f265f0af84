//! Core types for the orchestrator.
//!
//! Everything here is plain data: it is serialized into the run output
//! directory and read back by later invocations of the same run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a run.
/// Uses `UUIDv7` for time-ordered lexicographic sorting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// --- Run descriptor ---

/// Pipeline mode selected for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Plan,
    Implement,
    Fix,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Implement => "implement",
            Self::Fix => "fix",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plan" => Ok(Self::Plan),
            "implement" => Ok(Self::Implement),
            "fix" => Ok(Self::Fix),
            other => Err(format!("unknown mode '{other}' (expected plan, implement or fix)")),
        }
    }
}

/// Where the invocation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    WorkflowDispatch,
    IssueComment,
    PullRequest,
    #[default]
    Unknown,
}

impl TriggerSource {
    pub fn from_event_name(event_name: &str) -> Self {
        match event_name {
            "workflow_dispatch" => Self::WorkflowDispatch,
            "issue_comment" => Self::IssueComment,
            "pull_request" | "pull_request_target" => Self::PullRequest,
            _ => Self::Unknown,
        }
    }
}

/// Raw trigger info kept for audit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub event_name: String,
    pub actor: Option<String>,
    pub source: TriggerSource,
}

/// Resource bounds applied to every downstream stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    pub max_plan_tokens: u32,
    pub max_implement_tokens: u32,
    pub max_fix_tokens: u32,
    pub max_scope_tokens: u32,
    pub max_files: usize,
    pub max_file_bytes: u64,
    pub max_iterations: u32,
    pub max_diff_lines: usize,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            max_plan_tokens: 2000,
            max_implement_tokens: 4000,
            max_fix_tokens: 2000,
            max_scope_tokens: 1000,
            max_files: 20,
            max_file_bytes: 80_000,
            max_iterations: 2,
            max_diff_lines: 300,
        }
    }
}

/// Normalized task descriptor, built once per invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDescriptor {
    #[serde(default)]
    pub run_id: Id,
    pub mode: RunMode,
    pub repository: String,
    pub commit_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    pub feature_text: String,
    /// Plan recovered from an earlier plan comment. Skips planning when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_plan: Option<Plan>,
    pub trigger: TriggerInfo,
    pub constraints: Constraints,
    pub created_at: DateTime<Utc>,
}

// --- Plan ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChange {
    pub path: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedFile {
    pub path: String,
    #[serde(default)]
    pub purpose: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedTest {
    pub command: String,
    #[serde(default)]
    pub reason: String,
}

/// Structured change proposal produced by the planner.
///
/// A plan is never edited in place; a new plan replaces it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub files_to_modify: Vec<PlannedChange>,
    #[serde(default)]
    pub files_to_create: Vec<PlannedFile>,
    #[serde(default)]
    pub tests: Vec<PlannedTest>,
    #[serde(default)]
    pub risks: Vec<String>,
}

// --- Scope ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopedFile {
    pub path: String,
    #[serde(default)]
    pub max_bytes: u64,
}

/// Bounded set of files admitted into the implement/fix context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub included_files: Vec<ScopedFile>,
    #[serde(default)]
    pub excluded_patterns: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

impl Scope {
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.included_files.iter().map(|f| f.path.as_str())
    }
}

/// A file read from the working tree. Never cached across fix iterations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

// --- Tests ---

/// Outcome of one test command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub command: String,
    pub success: bool,
    pub output: String,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Aggregate verdict: every command must pass.
pub fn all_passed(results: &[TestResult]) -> bool {
    results.iter().all(|r| r.success)
}
