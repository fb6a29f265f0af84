//! Change sets produced by the implementer and fixer stages.
//!
//! A model response becomes a [`ChangeSet`] in one of two shapes: full-file
//! replacements or a unified diff. Either shape is applied to the working tree
//! through [`ChangeSet::apply`].

use crate::config::ChangeFormat;
use crate::diff;
use crate::json::{self, ExtractError};
use crate::types::FileContent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Component, Path};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("failed to parse model response: {0}")]
    Parse(#[from] ExtractError),
    #[error("diff appears truncated (dangling line {line:?})")]
    Truncated { line: String },
    #[error("diff changes {lines} lines, limit is {max}")]
    TooLarge { lines: usize, max: usize },
    #[error("git apply rejected the patch: {0}")]
    ApplyFailed(String),
    #[error("refusing to write outside the repository: {0}")]
    UnsafePath(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PatchError>;

const NO_SUMMARY: &str = "No summary provided";

/// A change-set proposed by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeSet {
    /// Complete new contents for each listed file.
    Files {
        files: Vec<FileContent>,
        summary: String,
    },
    /// A sanitized unified diff.
    Diff { diff: String, summary: String },
}

impl ChangeSet {
    /// Parse a model response in the requested shape.
    pub fn parse(
        format: ChangeFormat,
        response: &str,
        strict_diff: bool,
        max_diff_lines: usize,
    ) -> Result<Self> {
        match format {
            ChangeFormat::Files => Self::parse_files(response),
            ChangeFormat::Diff => Self::parse_diff(response, strict_diff, max_diff_lines),
        }
    }

    /// Parse `{files:[{path, content}], summary}`.
    pub fn parse_files(response: &str) -> Result<Self> {
        let value: Value = json::parse_object(response)?;

        let files = value
            .get("files")
            .ok_or_else(|| shape("missing 'files'"))?
            .as_array()
            .ok_or_else(|| shape("'files' is not a list"))?;

        let mut parsed = Vec::with_capacity(files.len());
        for (idx, entry) in files.iter().enumerate() {
            let path = entry
                .get("path")
                .and_then(Value::as_str)
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| shape(&format!("files[{idx}] has no path")))?;
            // Empty content is a legitimate request; a missing one is not.
            let content = entry
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| shape(&format!("files[{idx}] ({path}) has no string content")))?;
            parsed.push(FileContent {
                path: path.trim().to_string(),
                content: content.to_string(),
            });
        }

        let summary = value
            .get("summary")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(NO_SUMMARY)
            .to_string();

        Ok(Self::Files {
            files: parsed,
            summary,
        })
    }

    /// Extract, repair and validate a unified diff.
    pub fn parse_diff(response: &str, strict: bool, max_diff_lines: usize) -> Result<Self> {
        let diff = diff::prepare(response, strict, max_diff_lines)?;
        let stats = diff::stats(&diff);
        let summary = if stats.files.is_empty() {
            NO_SUMMARY.to_string()
        } else {
            format!("Patch touching {}", stats.files.join(", "))
        };
        Ok(Self::Diff { diff, summary })
    }

    pub fn summary(&self) -> &str {
        match self {
            Self::Files { summary, .. } | Self::Diff { summary, .. } => summary,
        }
    }

    /// File name under which the payload is persisted, e.g. `changes.json`.
    pub fn artifact_name(&self, stem: &str) -> String {
        match self {
            Self::Files { .. } => format!("{stem}.json"),
            Self::Diff { .. } => format!("{stem}.patch"),
        }
    }

    /// Payload written to the artifact store.
    pub fn payload(&self) -> String {
        match self {
            Self::Files { .. } => serde_json::to_string_pretty(self).unwrap_or_default(),
            Self::Diff { diff, .. } => diff.clone(),
        }
    }

    /// Apply to the working tree rooted at `repo_root`.
    ///
    /// Full-file replacements are idempotent. Diffs go through `git apply`
    /// via a temporary file that is removed whether or not the patch applies.
    pub fn apply(&self, repo_root: &Path) -> Result<ChangeReport> {
        match self {
            Self::Files { files, .. } => apply_files(files, repo_root),
            Self::Diff { diff, .. } => apply_diff(diff, repo_root),
        }
    }
}

fn shape(message: &str) -> PatchError {
    PatchError::Parse(ExtractError::Shape(message.to_string()))
}

/// Reject absolute paths and parent traversal.
fn check_relative(path: &str) -> Result<()> {
    let p = Path::new(path);
    let safe = p
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if safe {
        Ok(())
    } else {
        Err(PatchError::UnsafePath(path.to_string()))
    }
}

fn apply_files(files: &[FileContent], repo_root: &Path) -> Result<ChangeReport> {
    for file in files {
        check_relative(&file.path)?;
    }

    let mut report = ChangeReport::default();
    for file in files {
        let target = repo_root.join(&file.path);
        let previous = std::fs::read_to_string(&target).unwrap_or_default();
        let (added, removed) = line_delta(&previous, &file.content);

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, &file.content)?;
        debug!(path = %file.path, bytes = file.content.len(), "wrote file");

        report.files.push(file.path.clone());
        report.added += added;
        report.removed += removed;
    }

    info!(files = report.files.len(), "applied file replacements");
    Ok(report)
}

fn apply_diff(diff: &str, repo_root: &Path) -> Result<ChangeReport> {
    let mut patch_file = tempfile::Builder::new()
        .prefix(".orch-")
        .suffix(".patch")
        .tempfile_in(repo_root)?;
    patch_file.write_all(diff.as_bytes())?;
    patch_file.flush()?;

    let output = Command::new("git")
        .args(["apply", "--whitespace=nowarn"])
        .arg(patch_file.path())
        .current_dir(repo_root)
        .output()?;
    // Dropping the handle removes the temp file on every path out of here.
    drop(patch_file);

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(PatchError::ApplyFailed(stderr));
    }

    let stats = diff::stats(diff);
    info!(files = stats.files.len(), added = stats.added, removed = stats.removed, "applied patch");
    Ok(ChangeReport {
        files: stats.files,
        added: stats.added,
        removed: stats.removed,
    })
}

/// Lines present in `after` but not `before` and vice versa, counted as multisets.
fn line_delta(before: &str, after: &str) -> (usize, usize) {
    let mut counts: HashMap<&str, isize> = HashMap::new();
    for line in before.lines() {
        *counts.entry(line).or_default() += 1;
    }
    for line in after.lines() {
        *counts.entry(line).or_default() -= 1;
    }
    counts.values().fold((0, 0), |(added, removed), &n| {
        if n < 0 {
            (added + n.unsigned_abs(), removed)
        } else {
            (added, removed + n.unsigned_abs())
        }
    })
}

/// What an applied change-set touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeReport {
    pub files: Vec<String>,
    pub added: usize,
    pub removed: usize,
}

impl ChangeReport {
    /// Deterministic human-facing summary.
    pub fn summarize(&self) -> String {
        let paths = if self.files.is_empty() {
            "(none)".to_string()
        } else {
            self.files.join(", ")
        };
        format!(
            "Files changed: {}\n  {}\nLines: +{} -{}",
            self.files.len(),
            paths,
            self.added,
            self.removed
        )
    }
}
