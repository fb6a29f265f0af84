pub mod artifacts;
pub mod comment;
pub mod config;
pub mod diff;
pub mod json;
pub mod patch;
pub mod plan_markdown;
pub mod prompts;
pub mod report;
pub mod types;

pub use artifacts::{ArtifactError, ArtifactStore};
pub use config::{ChangeFormat, Config, ProviderKind};
pub use patch::{ChangeReport, ChangeSet, PatchError};
pub use report::ReportRow;
pub use types::*;
