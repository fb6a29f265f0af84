//! Test execution behind a command allowlist.
//!
//! Commands run through `sh -c` from the repository root with an optional
//! timeout. A command that does not prefix-match the allowlist is never
//! spawned; it is reported as a failed result instead. Test failures are data,
//! not errors: every outcome becomes a [`TestResult`].

use async_trait::async_trait;
use chrono::Utc;
use orch_core::config::Config;
use orch_core::TestResult;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("test command timed out after {0} seconds")]
    Timeout(u32),
}

pub type Result<T> = std::result::Result<T, VerifierError>;

/// Lines kept per command output.
pub const MAX_OUTPUT_LINES: usize = 100;

/// Runs the full test-command set and returns one result per command.
#[async_trait]
pub trait TestSuite: Send + Sync {
    /// Commands in execution order, shown to the planner.
    fn commands(&self) -> &[String];

    async fn run_all(&self) -> Vec<TestResult>;
}

/// Characters `sh -c` would treat as command separators or substitutions.
const SHELL_CONTROL: [&str; 7] = [";", "&", "|", "`", "$(", "\n", "\r"];

fn has_shell_control(command: &str) -> bool {
    SHELL_CONTROL.iter().any(|c| command.contains(*c))
}

/// Keep the first and last halves of long output.
pub fn truncate_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.split('\n').collect();
    if lines.len() <= max_lines {
        return output.to_string();
    }
    let half = max_lines / 2;
    let marker = format!("\n... [{} lines truncated] ...\n", lines.len() - max_lines);
    let mut kept: Vec<&str> = lines[..half].to_vec();
    kept.push(&marker);
    kept.extend_from_slice(&lines[lines.len() - half..]);
    kept.join("\n")
}

/// Test commands inferred from project manifests at the repository root.
pub fn discover_test_commands(repo_root: &Path) -> Vec<String> {
    let mut commands = Vec::new();

    let package_json = repo_root.join("package.json");
    if let Ok(raw) = std::fs::read_to_string(&package_json) {
        match serde_json::from_str::<Value>(&raw) {
            Ok(pkg) if pkg.pointer("/scripts/test").and_then(Value::as_str).is_some() => {
                commands.push("npm test".to_string());
            }
            Ok(_) => debug!("package.json has no test script"),
            Err(e) => warn!(error = %e, "could not parse package.json"),
        }
    }

    if repo_root.join("Cargo.toml").is_file() {
        commands.push("cargo test".to_string());
    }

    info!(commands = ?commands, "discovered test commands");
    commands
}

/// Allow-listed shell test runner.
#[derive(Debug, Clone)]
pub struct TestRunner {
    commands: Vec<String>,
    allowlist: Vec<String>,
    timeout_sec: u32,
    working_dir: PathBuf,
}

struct CommandOutput {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

impl TestRunner {
    pub fn new(commands: Vec<String>, allowlist: Vec<String>, working_dir: &Path) -> Self {
        Self {
            commands,
            allowlist,
            timeout_sec: 0,
            working_dir: working_dir.to_path_buf(),
        }
    }

    /// Configured commands, or discovered ones when none are configured.
    pub fn from_config(config: &Config, repo_root: &Path) -> Self {
        let commands = if config.test_cmds.is_empty() {
            discover_test_commands(repo_root)
        } else {
            config.test_cmds.clone()
        };
        Self::new(commands, config.test_allowlist.clone(), repo_root)
            .with_timeout_sec(config.test_timeout_sec)
    }

    pub fn with_timeout_sec(mut self, timeout_sec: u32) -> Self {
        self.timeout_sec = timeout_sec;
        self
    }

    /// Prefix match against the allowlist; chained or substituted commands never pass.
    pub fn is_allowed(&self, command: &str) -> bool {
        !has_shell_control(command)
            && self.allowlist.iter().any(|prefix| command.starts_with(prefix.as_str()))
    }

    fn refusal(&self, command: &str) -> String {
        if has_shell_control(command) {
            return format!("Command contains shell control characters: {command}");
        }
        format!(
            "Command not in allowlist: {command}. Allowed commands: {}",
            self.allowlist.join(", ")
        )
    }

    /// Run one command; never returns an error.
    pub async fn run_one(&self, command: &str) -> TestResult {
        if !self.is_allowed(command) {
            warn!(cmd = %command, "refusing command outside the allowlist");
            return TestResult {
                command: command.to_string(),
                success: false,
                output: self.refusal(command),
                duration_ms: 0,
            };
        }

        let start = Utc::now();
        let outcome = self.execute_command(command).await;
        let duration_ms = u64::try_from((Utc::now() - start).num_milliseconds()).unwrap_or(0);

        let (success, output) = match outcome {
            Ok(out) if out.exit_code == 0 => (true, out.stdout),
            Ok(out) => {
                let text = if !out.stdout.trim().is_empty() {
                    out.stdout
                } else if !out.stderr.trim().is_empty() {
                    out.stderr
                } else {
                    format!("Test failed (exit {})", out.exit_code)
                };
                (false, text)
            }
            Err(e) => (false, e.to_string()),
        };

        if success {
            debug!(cmd = %command, duration_ms, "test command passed");
        } else {
            warn!(cmd = %command, duration_ms, "test command failed");
        }

        TestResult {
            command: command.to_string(),
            success,
            output: truncate_output(&output, MAX_OUTPUT_LINES),
            duration_ms,
        }
    }

    async fn execute_command(&self, cmd: &str) -> Result<CommandOutput> {
        debug!(cmd = %cmd, "executing test command");

        let mut process = Command::new("sh");
        process
            .arg("-c")
            .arg(cmd)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = process.spawn()?;

        let mut stdout_handle = child.stdout.take();
        let mut stderr_handle = child.stderr.take();

        // Drain both pipes while waiting so a chatty test cannot block on a full pipe.
        let run = async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let read_stdout = async {
                if let Some(ref mut handle) = stdout_handle {
                    let _ = handle.read_to_end(&mut stdout).await;
                }
            };
            let read_stderr = async {
                if let Some(ref mut handle) = stderr_handle {
                    let _ = handle.read_to_end(&mut stderr).await;
                }
            };
            tokio::join!(read_stdout, read_stderr);
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status.code().unwrap_or(-1), stdout, stderr))
        };

        let (exit_code, stdout, stderr) = if self.timeout_sec > 0 {
            let timeout_duration = Duration::from_secs(u64::from(self.timeout_sec));
            let outcome = tokio::time::timeout(timeout_duration, run).await;
            if let Ok(result) = outcome {
                result?
            } else {
                if let Err(e) = child.kill().await {
                    warn!(cmd = %cmd, error = %e, "failed to kill timed-out process");
                }
                let _ = child.wait().await;
                warn!(cmd = %cmd, timeout_sec = self.timeout_sec, "test command timed out");
                return Err(VerifierError::Timeout(self.timeout_sec));
            }
        } else {
            run.await?
        };

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

#[async_trait]
impl TestSuite for TestRunner {
    fn commands(&self) -> &[String] {
        &self.commands
    }

    async fn run_all(&self) -> Vec<TestResult> {
        info!(cmd_count = self.commands.len(), "running tests");
        let mut results = Vec::with_capacity(self.commands.len());
        for command in &self.commands {
            results.push(self.run_one(command).await);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn runner(dir: &Path, commands: &[&str], allowlist: &[&str]) -> TestRunner {
        TestRunner::new(
            commands.iter().map(ToString::to_string).collect(),
            allowlist.iter().map(ToString::to_string).collect(),
            dir,
        )
        .with_timeout_sec(10)
    }

    #[test]
    fn truncate_keeps_head_and_tail() {
        let output = (1..=150).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let truncated = truncate_output(&output, 100);
        assert!(truncated.starts_with("1\n2\n"));
        assert!(truncated.contains("\n... [50 lines truncated] ...\n"));
        assert!(truncated.ends_with("149\n150"));
        assert!(!truncated.contains("\n75\n"));
    }

    #[test]
    fn short_output_is_untouched() {
        assert_eq!(truncate_output("a\nb", 100), "a\nb");
    }

    #[tokio::test]
    async fn refused_command_is_never_executed() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let cmd = format!("touch {}", marker.display());
        let r = runner(dir.path(), &[], &["npm test", "jest"]);

        let result = r.run_one(&cmd).await;
        assert!(!result.success);
        assert_eq!(
            result.output,
            format!("Command not in allowlist: {cmd}. Allowed commands: npm test, jest")
        );
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn passing_and_failing_commands() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("report.txt"), "broken\n").unwrap();
        let r = runner(
            dir.path(),
            &["echo ok", "grep -c missing report.txt", "ls no-such-dir", "false"],
            &["echo", "grep", "ls", "false"],
        );
        let results = r.run_all().await;
        assert_eq!(results.len(), 4);
        assert!(results[0].success);
        assert_eq!(results[0].output.trim(), "ok");
        // stdout wins over stderr on failure.
        assert!(!results[1].success);
        assert_eq!(results[1].output.trim(), "0");
        assert!(!results[2].success);
        assert!(results[2].output.contains("no-such-dir"));
        assert!(!results[3].success);
        assert_eq!(results[3].output, "Test failed (exit 1)");
    }

    #[tokio::test]
    async fn chained_commands_are_refused() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let r = runner(dir.path(), &[], &["npm test"]);

        for cmd in [
            format!("npm test; touch {}", marker.display()),
            format!("npm test && touch {}", marker.display()),
            format!("npm test | tee {}", marker.display()),
            format!("npm test $(touch {})", marker.display()),
            format!("npm test `touch {}`", marker.display()),
            format!("npm test\ntouch {}", marker.display()),
        ] {
            assert!(!r.is_allowed(&cmd), "{cmd}");
            let result = r.run_one(&cmd).await;
            assert!(!result.success);
            assert!(result.output.starts_with("Command contains shell control characters"));
        }
        assert!(!marker.exists());
        assert!(r.is_allowed("npm test -- --runInBand"));
    }

    #[tokio::test]
    async fn timeout_becomes_failed_result() {
        let dir = TempDir::new().unwrap();
        let r = runner(dir.path(), &[], &["sleep"]).with_timeout_sec(1);
        let result = r.run_one("sleep 5").await;
        assert!(!result.success);
        assert!(result.output.contains("timed out after 1 seconds"));
    }

    #[test]
    fn discovery_reads_manifests() {
        let dir = TempDir::new().unwrap();
        assert!(discover_test_commands(dir.path()).is_empty());

        std::fs::write(dir.path().join("package.json"), r#"{"scripts":{"test":"jest"}}"#).unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"x\"\n").unwrap();
        assert_eq!(
            discover_test_commands(dir.path()),
            vec!["npm test".to_string(), "cargo test".to_string()]
        );
    }

    #[test]
    fn configured_commands_win_over_discovery() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        let mut config = Config::default();
        config.test_cmds = vec!["npm run test:ci".into()];
        let r = TestRunner::from_config(&config, dir.path());
        assert_eq!(r.commands(), ["npm run test:ci".to_string()]);
        assert!(r.is_allowed("npm run test:ci"));
        assert!(!r.is_allowed("rm -rf /"));
    }
}
