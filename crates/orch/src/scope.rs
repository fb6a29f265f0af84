//! Scope resolution: which files the implementer and fixer get to see.

use crate::provider::{ProviderError, ProviderGateway};
use orch_core::json::{parse_object, ExtractError};
use orch_core::prompts;
use orch_core::{Constraints, FileContent, Plan, Scope, ScopedFile};
use std::path::{Component, Path};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ScopeError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("could not parse scope response: {source}")]
    Parse {
        #[source]
        source: ExtractError,
        raw: String,
    },
}

pub type Result<T> = std::result::Result<T, ScopeError>;

/// Always applied, whatever the model proposes.
pub const EXCLUDED_PATTERNS: [&str; 8] = [
    "node_modules/**",
    "dist/**",
    "build/**",
    ".next/**",
    "*.lock",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
];

/// Directories expanded in the structure listing when present.
pub const SOURCE_ROOTS: [&str; 9] = [
    "src",
    "tests",
    "lib",
    "crates",
    "frontend",
    "frontend/components",
    "frontend/lib",
    "frontend/store",
    "frontend/app",
];

const LISTING_DEPTH: usize = 2;

/// Never descended into while listing.
const SKIP_DIRS: [&str; 6] = ["node_modules", "dist", "build", ".next", "target", ".git"];

/// Scope plus the raw response it was parsed from.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub scope: Scope,
    pub raw: String,
}

/// Shallow textual listing of the repository for prompts.
pub fn repo_structure(repo_root: &Path) -> String {
    let Ok(entries) = std::fs::read_dir(repo_root) else {
        return "Unable to read repository structure.".to_string();
    };

    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        match entry.file_type() {
            Ok(t) if t.is_dir() && !name.starts_with('.') => dirs.push(name),
            Ok(t) if t.is_file() => files.push(name),
            _ => {}
        }
    }
    files.sort();
    dirs.sort();

    let mut lines = vec![
        "Repository structure:".to_string(),
        String::new(),
        "Root files:".to_string(),
    ];
    lines.extend(files.iter().map(|f| format!("  {f}")));
    lines.push(String::new());
    lines.push("Directories:".to_string());
    lines.extend(dirs.iter().map(|d| format!("  {d}/")));

    for root in SOURCE_ROOTS {
        let dir = repo_root.join(root);
        if !dir.is_dir() {
            continue;
        }
        lines.push(String::new());
        lines.push(format!("Contents of {root}/:"));
        lines.extend(walk_listing(repo_root, &dir).into_iter().map(|l| format!("  {l}")));
    }

    lines.join("\n")
}

fn walk_listing(repo_root: &Path, dir: &Path) -> Vec<String> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(LISTING_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.file_name().to_str().is_some_and(|n| SKIP_DIRS.contains(&n)))
        })
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let rel = e.path().strip_prefix(repo_root).ok()?;
            let rel = rel.to_string_lossy().replace('\\', "/");
            Some(if e.file_type().is_dir() {
                format!("{rel}/")
            } else {
                rel
            })
        })
        .collect()
}

fn is_plain_relative(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Apply the file budget to model-proposed candidates.
///
/// Order: drop missing or non-regular files, drop files over `max_file_bytes`,
/// then keep the first `max_files` in the order given.
pub fn filter_candidates(
    repo_root: &Path,
    candidates: Vec<ScopedFile>,
    max_files: usize,
    max_file_bytes: u64,
) -> Vec<ScopedFile> {
    let mut kept: Vec<ScopedFile> = candidates
        .into_iter()
        .filter(|f| {
            if !is_plain_relative(&f.path) {
                warn!(path = %f.path, "skipping scope entry outside the repository");
                return false;
            }
            match std::fs::metadata(repo_root.join(&f.path)) {
                Ok(meta) if !meta.is_file() => {
                    debug!(path = %f.path, "skipping scope entry: not a regular file");
                    false
                }
                Ok(meta) if meta.len() > max_file_bytes => {
                    warn!(path = %f.path, bytes = meta.len(), max_file_bytes, "skipping scope entry: exceeds max file size");
                    false
                }
                Ok(_) => true,
                Err(_) => {
                    warn!(path = %f.path, "skipping scope entry: file not found");
                    false
                }
            }
        })
        .map(|mut f| {
            if f.max_bytes == 0 || f.max_bytes > max_file_bytes {
                f.max_bytes = max_file_bytes;
            }
            f
        })
        .collect();

    if kept.len() > max_files {
        warn!(count = kept.len(), max_files, "scope over budget, truncating");
        kept.truncate(max_files);
    }
    kept
}

/// Replace the model's exclusions with the built-in list.
pub fn enforce(repo_root: &Path, mut scope: Scope, constraints: &Constraints) -> Scope {
    let candidates = std::mem::take(&mut scope.included_files);
    scope.included_files = filter_candidates(
        repo_root,
        candidates,
        constraints.max_files,
        constraints.max_file_bytes,
    );
    scope.excluded_patterns = EXCLUDED_PATTERNS.iter().map(ToString::to_string).collect();
    scope
}

/// Ask the model for a scope and bound it.
pub async fn resolve(
    gateway: &ProviderGateway,
    plan: &Plan,
    structure: &str,
    repo_root: &Path,
    constraints: &Constraints,
) -> Result<Resolution> {
    let prompt = prompts::scope_resolver(plan, structure);
    let raw = gateway
        .call(&prompt.system, &prompt.user, constraints.max_scope_tokens)
        .await?;

    let proposed: Scope = match parse_object(&raw) {
        Ok(scope) => scope,
        Err(source) => return Err(ScopeError::Parse { source, raw }),
    };
    let proposed_count = proposed.included_files.len();
    let scope = enforce(repo_root, proposed, constraints);
    info!(
        stage = "scope",
        proposed = proposed_count,
        files = scope.included_files.len(),
        "scope resolved"
    );
    Ok(Resolution { scope, raw })
}

/// Read every scoped file fresh from disk; unreadable files are skipped.
pub fn read_file_contents(repo_root: &Path, scope: &Scope) -> Vec<FileContent> {
    scope
        .paths()
        .filter_map(|path| match std::fs::read_to_string(repo_root.join(path)) {
            Ok(content) => Some(FileContent {
                path: path.to_string(),
                content,
            }),
            Err(e) => {
                warn!(path, error = %e, "could not read scoped file");
                None
            }
        })
        .collect()
}
