//! Configuration parsing for the orchestrator.
//!
//! Uses the key=value format of `.orch/config`.
//! Precedence: CLI flags > `--config` file > `.orch/config` > environment overlay > defaults.
//!
//! The resulting [`Config`] is built once at startup and passed by reference to
//! every component; nothing below `main` reads the process environment.

use crate::types::Constraints;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

/// A text-generation backend known to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Claude,
    Openai,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Openai => "openai",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => Ok(Self::Claude),
            "openai" => Ok(Self::Openai),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// Which implementer response shape to request from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeFormat {
    /// JSON `{files:[{path, content}], summary}`.
    #[default]
    Files,
    /// Unified diff text.
    Diff,
}

/// Orchestrator configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    // Providers
    pub provider_order: Vec<ProviderKind>,
    pub fallback: bool,
    pub anthropic_model: String,
    pub openai_model: String,
    pub provider_timeout_sec: u32,

    // Token ceilings
    pub max_plan_tokens: u32,
    pub max_implement_tokens: u32,
    pub max_fix_tokens: u32,
    pub max_scope_tokens: u32,

    // Budgets
    pub max_files: usize,
    pub max_file_bytes: u64,
    pub max_iterations: u32,
    pub max_diff_lines: usize,

    // Change application
    pub change_format: ChangeFormat,
    pub strict_diff: bool,

    // Tests
    pub test_cmds: Vec<String>,
    pub test_allowlist: Vec<String>,
    pub test_timeout_sec: u32,

    // Output
    pub out_dir: PathBuf,
    pub commit_changes: bool,
    pub comment_preview_chars: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider_order: vec![ProviderKind::Claude, ProviderKind::Openai],
            fallback: true,
            anthropic_model: "claude-sonnet-4-20250514".to_string(),
            openai_model: "gpt-4o".to_string(),
            provider_timeout_sec: 120,
            max_plan_tokens: 2000,
            max_implement_tokens: 4000,
            max_fix_tokens: 2000,
            max_scope_tokens: 1000,
            max_files: 20,
            max_file_bytes: 80_000,
            max_iterations: 2,
            max_diff_lines: 300,
            change_format: ChangeFormat::Files,
            strict_diff: true,
            test_cmds: Vec::new(),
            test_allowlist: [
                "npm test",
                "npm run test",
                "npm run test:ci",
                "jest",
                "vitest",
                "cargo test",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            test_timeout_sec: 600,
            out_dir: PathBuf::from("out"),
            commit_changes: true,
            comment_preview_chars: 500,
        }
    }
}

/// Environment values that may override defaults.
///
/// Collected at the CLI boundary so config stays free of process globals.
#[derive(Debug, Clone, Default)]
pub struct EnvOverlay {
    /// Preferred provider (`AI_PROVIDER`). Moves it to the front of the order.
    pub preferred_provider: Option<String>,
    /// `AI_FALLBACK`.
    pub fallback: Option<String>,
    /// `ANTHROPIC_MODEL`.
    pub anthropic_model: Option<String>,
    /// `OPENAI_MODEL`.
    pub openai_model: Option<String>,
}

impl Config {
    /// Load config from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content, &path.display().to_string())
    }

    /// Apply environment-derived values. Called before any file is loaded.
    pub fn apply_env(&mut self, env: &EnvOverlay) -> Result<(), ConfigError> {
        if let Some(ref provider) = env.preferred_provider {
            if !provider.trim().is_empty() {
                self.prefer_provider(ProviderKind::parse(provider)?);
            }
        }
        if let Some(ref fallback) = env.fallback {
            // Only an explicit "false" disables fallback.
            self.fallback = !fallback.trim().eq_ignore_ascii_case("false");
        }
        if let Some(ref model) = env.anthropic_model {
            if !model.is_empty() {
                self.anthropic_model.clone_from(model);
            }
        }
        if let Some(ref model) = env.openai_model {
            if !model.is_empty() {
                self.openai_model.clone_from(model);
            }
        }
        Ok(())
    }

    /// Move `kind` to the front of the provider order, keeping the rest in place.
    pub fn prefer_provider(&mut self, kind: ProviderKind) {
        self.provider_order.retain(|k| *k != kind);
        self.provider_order.insert(0, kind);
    }

    /// Parse config content (key=value format).
    fn parse_content(&mut self, content: &str, source: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };

            let key = key.trim();
            let value = Self::unquote(value.trim());

            self.apply_value(key, &value, source)?;
        }
        Ok(())
    }

    /// Remove surrounding quotes from a value.
    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    /// Apply a single config value.
    fn apply_value(&mut self, key: &str, value: &str, source: &str) -> Result<(), ConfigError> {
        match key {
            "provider_order" => {
                self.provider_order = Self::parse_list(value)
                    .iter()
                    .map(|p| ProviderKind::parse(p))
                    .collect::<Result<_, _>>()?;
            }
            "fallback" => self.fallback = Self::parse_bool(key, value)?,
            "anthropic_model" => self.anthropic_model = value.to_string(),
            "openai_model" => self.openai_model = value.to_string(),
            "provider_timeout_sec" => self.provider_timeout_sec = Self::parse_int(key, value)?,
            "max_plan_tokens" => self.max_plan_tokens = Self::parse_int(key, value)?,
            "max_implement_tokens" => self.max_implement_tokens = Self::parse_int(key, value)?,
            "max_fix_tokens" => self.max_fix_tokens = Self::parse_int(key, value)?,
            "max_scope_tokens" => self.max_scope_tokens = Self::parse_int(key, value)?,
            "max_files" => self.max_files = Self::parse_int(key, value)?,
            "max_file_bytes" => self.max_file_bytes = Self::parse_int(key, value)?,
            "max_iterations" => self.max_iterations = Self::parse_int(key, value)?,
            "max_diff_lines" => self.max_diff_lines = Self::parse_int(key, value)?,
            "change_format" => {
                self.change_format = match value {
                    "files" => ChangeFormat::Files,
                    "diff" => ChangeFormat::Diff,
                    _ => {
                        return Err(ConfigError::InvalidLine(format!(
                            "change_format must be 'files' or 'diff', got '{value}'"
                        )))
                    }
                }
            }
            "strict_diff" => self.strict_diff = Self::parse_bool(key, value)?,
            "test_cmds" => self.test_cmds = Self::parse_list(value),
            "test_allowlist" => self.test_allowlist = Self::parse_list(value),
            "test_timeout_sec" => self.test_timeout_sec = Self::parse_int(key, value)?,
            "out_dir" => self.out_dir = PathBuf::from(value),
            "commit_changes" => self.commit_changes = Self::parse_bool(key, value)?,
            "comment_preview_chars" => self.comment_preview_chars = Self::parse_int(key, value)?,
            _ => {
                warn!(key, source, "unknown config key");
            }
        }
        Ok(())
    }

    /// Pipe-separated list, empty entries dropped.
    fn parse_list(value: &str) -> Vec<String> {
        value
            .split('|')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Parse a boolean value.
    fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(true),
            "false" | "0" | "no" | "n" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Resolve relative paths against the repository root.
    pub fn resolve_paths(&mut self, repo_root: &Path) {
        if self.out_dir.is_relative() {
            self.out_dir = repo_root.join(&self.out_dir);
        }
    }

    /// Resource bounds recorded in the run descriptor.
    pub fn constraints(&self) -> Constraints {
        Constraints {
            max_plan_tokens: self.max_plan_tokens,
            max_implement_tokens: self.max_implement_tokens,
            max_fix_tokens: self.max_fix_tokens,
            max_scope_tokens: self.max_scope_tokens,
            max_files: self.max_files,
            max_file_bytes: self.max_file_bytes,
            max_iterations: self.max_iterations,
            max_diff_lines: self.max_diff_lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(
            config.provider_order,
            vec![ProviderKind::Claude, ProviderKind::Openai]
        );
        assert!(config.fallback);
        assert_eq!(config.max_files, 20);
        assert_eq!(config.max_file_bytes, 80_000);
        assert_eq!(config.max_iterations, 2);
        assert_eq!(config.max_diff_lines, 300);
        assert_eq!(config.change_format, ChangeFormat::Files);
        assert!(config.test_cmds.is_empty());
    }

    #[test]
    fn parse_simple_config() {
        let mut config = Config::default();
        let content = r#"
# budgets
max_files=5
max_iterations = 3
fallback=off
change_format=diff
openai_model="gpt-4o-mini"
"#;
        config.parse_content(content, "test").unwrap();
        assert_eq!(config.max_files, 5);
        assert_eq!(config.max_iterations, 3);
        assert!(!config.fallback);
        assert_eq!(config.change_format, ChangeFormat::Diff);
        assert_eq!(config.openai_model, "gpt-4o-mini");
    }

    #[test]
    fn parse_test_cmds_and_provider_order() {
        let mut config = Config::default();
        let content = "test_cmds=\"npm test | npm run test:ci\"\nprovider_order=openai|claude";
        config.parse_content(content, "test").unwrap();
        assert_eq!(config.test_cmds, vec!["npm test", "npm run test:ci"]);
        assert_eq!(
            config.provider_order,
            vec![ProviderKind::Openai, ProviderKind::Claude]
        );
    }

    #[test]
    fn invalid_int_reports_key() {
        let mut config = Config::default();
        let err = config.parse_content("max_files=lots", "test").unwrap_err();
        match err {
            ConfigError::InvalidInt { key, value } => {
                assert_eq!(key, "max_files");
                assert_eq!(value, "lots");
            }
            e => panic!("unexpected error: {e:?}"),
        }
    }

    #[test]
    fn line_without_equals_is_rejected() {
        let mut config = Config::default();
        assert!(config.parse_content("max_files 5", "test").is_err());
    }

    #[test]
    fn unknown_key_is_not_fatal() {
        let mut config = Config::default();
        config.parse_content("colour=blue", "test").unwrap();
    }

    #[test]
    fn unquote_removes_quotes() {
        assert_eq!(Config::unquote("\"hello\""), "hello");
        assert_eq!(Config::unquote("'world'"), "world");
        assert_eq!(Config::unquote("noquotes"), "noquotes");
    }

    #[test]
    fn parse_bool_accepts_variants() {
        assert!(Config::parse_bool("test", "true").unwrap());
        assert!(Config::parse_bool("test", "yes").unwrap());
        assert!(!Config::parse_bool("test", "0").unwrap());
        assert!(!Config::parse_bool("test", "off").unwrap());
        assert!(Config::parse_bool("test", "maybe").is_err());
    }

    #[test]
    fn env_overlay_reverses_provider_order() {
        let mut config = Config::default();
        config
            .apply_env(&EnvOverlay {
                preferred_provider: Some("openai".into()),
                ..EnvOverlay::default()
            })
            .unwrap();
        assert_eq!(
            config.provider_order,
            vec![ProviderKind::Openai, ProviderKind::Claude]
        );
    }

    #[test]
    fn env_overlay_only_false_disables_fallback() {
        let mut config = Config::default();
        config
            .apply_env(&EnvOverlay {
                fallback: Some("no".into()),
                ..EnvOverlay::default()
            })
            .unwrap();
        assert!(config.fallback);

        config
            .apply_env(&EnvOverlay {
                fallback: Some("FALSE".into()),
                ..EnvOverlay::default()
            })
            .unwrap();
        assert!(!config.fallback);
    }

    #[test]
    fn env_overlay_rejects_unknown_provider() {
        let mut config = Config::default();
        let result = config.apply_env(&EnvOverlay {
            preferred_provider: Some("mystery".into()),
            ..EnvOverlay::default()
        });
        assert!(matches!(result, Err(ConfigError::UnknownProvider(_))));
    }

    #[test]
    fn constraints_follow_config() {
        let mut config = Config::default();
        config.max_files = 7;
        config.max_fix_tokens = 1234;
        let constraints = config.constraints();
        assert_eq!(constraints.max_files, 7);
        assert_eq!(constraints.max_fix_tokens, 1234);
    }

    #[test]
    fn resolve_paths_joins_relative_out_dir() {
        let mut config = Config::default();
        config.resolve_paths(Path::new("/repo"));
        assert_eq!(config.out_dir, PathBuf::from("/repo/out"));
    }
}
