//! Committing and pushing applied changes back to the pull-request branch.

use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("failed to execute git: {0}")]
    Execution(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GitError>;

const BOT_NAME: &str = "github-actions[bot]";
const BOT_EMAIL: &str = "github-actions[bot]@users.noreply.github.com";

/// What `commit_and_push` ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    NothingToCommit,
    Pushed,
}

fn git(repo_root: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GitError::CommandFailed(format!(
            "git {}: {}",
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Commit message for applied changes.
pub fn commit_message(summary: &str) -> String {
    let summary = summary.trim();
    if summary.is_empty() {
        "AI Implementation".to_string()
    } else {
        format!("AI Implementation: {summary}")
    }
}

/// Whether the index differs from HEAD.
pub fn has_staged_changes(repo_root: &Path) -> Result<bool> {
    let status = Command::new("git")
        .args(["diff", "--cached", "--quiet"])
        .current_dir(repo_root)
        .status()?;
    // `--quiet` exits 1 when there are differences.
    match status.code() {
        Some(0) => Ok(false),
        Some(1) => Ok(true),
        _ => Err(GitError::CommandFailed(format!(
            "git diff --cached --quiet: {status}"
        ))),
    }
}

/// `:(exclude)` pathspec for a directory inside the repository.
fn exclude_pathspec(repo_root: &Path, dir: &Path) -> Option<String> {
    let relative = match dir.strip_prefix(repo_root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => {
            let root = repo_root.canonicalize().ok()?;
            let dir = dir.canonicalize().ok()?;
            dir.strip_prefix(&root).ok()?.to_path_buf()
        }
    };
    let relative = relative.to_str()?.trim_start_matches("./").trim_end_matches('/');
    if relative.is_empty() || relative == "." {
        return None;
    }
    Some(format!(":(exclude){relative}"))
}

/// Stage everything except the run artifacts, commit as the bot identity and push.
pub fn commit_and_push(
    repo_root: &Path,
    message: &str,
    artifact_dir: &Path,
) -> Result<CommitOutcome> {
    git(repo_root, &["config", "user.name", BOT_NAME])?;
    git(repo_root, &["config", "user.email", BOT_EMAIL])?;

    let exclude = exclude_pathspec(repo_root, artifact_dir);
    let mut add = vec!["add", "-A", "--", "."];
    if let Some(spec) = exclude.as_deref() {
        debug!(pathspec = spec, "excluding artifact directory from commit");
        add.push(spec);
    }
    git(repo_root, &add)?;

    if !has_staged_changes(repo_root)? {
        info!("no changes to commit");
        return Ok(CommitOutcome::NothingToCommit);
    }

    git(repo_root, &["commit", "-q", "-m", message])?;
    debug!(message, "committed changes");
    git(repo_root, &["push"])?;
    info!("changes committed and pushed");
    Ok(CommitOutcome::Pushed)
}
