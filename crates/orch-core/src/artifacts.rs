//! Per-run artifact directory.
//!
//! Every stage writes its inputs and outputs here as it goes. Writes are
//! append-only: a name that already exists gets a numbered generation
//! (`plan.json`, `plan.2.json`, ...) so a failed run keeps its full trail.
//! A later `fix` invocation reads the newest generation back.

use crate::report::{EventLog, ReportRow};
use crate::types::RunMode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("invalid artifact {name}: {source}")]
    Invalid {
        name: String,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

/// A file written to the artifact directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Requested name, e.g. `plan.json`.
    pub name: String,
    /// Actual location, which carries a generation suffix on collision.
    pub path: PathBuf,
    /// SHA256 of the written bytes.
    pub checksum: String,
}

/// Compute SHA256 checksum of a byte slice.
pub fn compute_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Append-only store rooted at the run output directory.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    mode: RunMode,
    log: EventLog,
}

impl ArtifactStore {
    /// Open (creating if needed) the artifact directory.
    pub fn open(root: &Path, mode: RunMode) -> Result<Self> {
        fs::create_dir_all(root)?;
        let log = EventLog::new(&root.join(EVENTS_FILE))?;
        Ok(Self {
            root: root.to_path_buf(),
            mode,
            log,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write text under `name` without overwriting an earlier artifact.
    pub fn write(&mut self, name: &str, content: &str) -> Result<Artifact> {
        let path = self.free_path(name);
        fs::write(&path, content)?;
        let checksum = compute_checksum(content.as_bytes());
        debug!(name, path = %path.display(), bytes = content.len(), "wrote artifact");

        self.log.record(
            ReportRow::now("ARTIFACT")
                .with_mode(self.mode.as_str())
                .with_output_path(path.display().to_string())
                .with_checksum(checksum.clone())
                .with_message(name),
        )?;

        Ok(Artifact {
            name: name.to_string(),
            path,
            checksum,
        })
    }

    /// Serialize `value` as pretty JSON under `name`.
    pub fn write_json<T: Serialize>(&mut self, name: &str, value: &T) -> Result<Artifact> {
        let content = serde_json::to_string_pretty(value).map_err(|source| {
            ArtifactError::Invalid {
                name: name.to_string(),
                source,
            }
        })?;
        self.write(name, &content)
    }

    /// Path of the newest generation of `name`, if any.
    pub fn latest(&self, name: &str) -> Option<PathBuf> {
        let (stem, ext) = split_name(name);
        let base = self.root.join(name);
        if !base.exists() {
            return None;
        }
        let mut newest = base;
        for generation in 2.. {
            let candidate = self.root.join(generation_name(stem, ext, generation));
            if !candidate.exists() {
                break;
            }
            newest = candidate;
        }
        Some(newest)
    }

    /// Read the newest generation of `name` as text.
    pub fn read_latest(&self, name: &str) -> Result<String> {
        let path = self
            .latest(name)
            .ok_or_else(|| ArtifactError::NotFound(name.to_string()))?;
        Ok(fs::read_to_string(path)?)
    }

    /// Deserialize the newest generation of a JSON artifact.
    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let content = self.read_latest(name)?;
        serde_json::from_str(&content).map_err(|source| ArtifactError::Invalid {
            name: name.to_string(),
            source,
        })
    }

    /// Record a pipeline event in the run log.
    pub fn record(&mut self, row: ReportRow) -> Result<()> {
        self.log.record(row.with_mode(self.mode.as_str()))?;
        Ok(())
    }

    fn free_path(&self, name: &str) -> PathBuf {
        let first = self.root.join(name);
        if !first.exists() {
            return first;
        }
        let (stem, ext) = split_name(name);
        let mut generation = 2;
        loop {
            let candidate = self.root.join(generation_name(stem, ext, generation));
            if !candidate.exists() {
                return candidate;
            }
            generation += 1;
        }
    }
}

/// Run event log file name inside the artifact directory.
pub const EVENTS_FILE: &str = "events.tsv";

fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

fn generation_name(stem: &str, ext: Option<&str>, generation: u32) -> String {
    match ext {
        Some(ext) => format!("{stem}.{generation}.{ext}"),
        None => format!("{stem}.{generation}"),
    }
}
