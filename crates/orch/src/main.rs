//! orch - AI change orchestrator for CI
//!
//! Main entry point. Collects credentials and the trigger environment, builds
//! the configuration once, and runs one mode.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::{Parser, ValueEnum};
use eyre::{bail, WrapErr};
use orch::descriptor::{resolve_mode, resolve_pr_number};
use orch::providers::{gateway_from_config, ProviderKeys};
use orch::{
    exit_codes, DescriptorBuilder, GithubClient, OrchestratorError, Pipeline, PullRequestHost,
    TestRunner, TriggerInputs,
};
use orch_core::config::{ChangeFormat, EnvOverlay};
use orch_core::{ArtifactStore, Config, ProviderKind};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Files,
    Diff,
}

impl From<FormatArg> for ChangeFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Files => Self::Files,
            FormatArg::Diff => Self::Diff,
        }
    }
}

#[derive(Parser)]
#[command(name = "orch", about = "AI change orchestrator for CI", version)]
struct Cli {
    /// Mode override: plan, implement or fix
    #[arg(long, env = "INPUT_MODE")]
    mode: Option<String>,

    /// Feature text override
    #[arg(long, env = "INPUT_FEATURE")]
    feature: Option<String>,

    /// Pull request number override
    #[arg(long, env = "INPUT_PR_NUMBER")]
    pr_number: Option<String>,

    /// Comment id of a previously posted plan to reuse
    #[arg(long, env = "INPUT_COMMENT_ID")]
    plan_comment_id: Option<String>,

    #[arg(long, env = "GITHUB_EVENT_NAME", default_value = "unknown")]
    event_name: String,

    /// Path to the webhook event payload
    #[arg(long, env = "GITHUB_EVENT_PATH")]
    event_path: Option<PathBuf>,

    /// Repository as owner/name
    #[arg(long, env = "GITHUB_REPOSITORY")]
    repository: Option<String>,

    /// Commit the run is based on
    #[arg(long, env = "GITHUB_SHA")]
    sha: Option<String>,

    /// Repository checkout to operate on
    #[arg(long, default_value = ".")]
    repo_root: PathBuf,

    /// Config file (overrides .orch/config)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Artifact output directory
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Preferred provider: claude or openai
    #[arg(long)]
    provider: Option<String>,

    /// Disable provider fallback
    #[arg(long)]
    no_fallback: bool,

    /// Implementer response shape
    #[arg(long, value_enum)]
    change_format: Option<FormatArg>,

    /// Maximum fix iterations
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Test command (repeatable); replaces configured commands
    #[arg(long = "test-cmd")]
    test_cmds: Vec<String>,

    /// Do not commit or push applied changes
    #[arg(long)]
    no_commit: bool,

    #[arg(long, env = "AI_PROVIDER", hide = true)]
    env_provider: Option<String>,

    #[arg(long, env = "AI_FALLBACK", hide = true)]
    env_fallback: Option<String>,

    #[arg(long, env = "ANTHROPIC_MODEL", hide = true)]
    anthropic_model: Option<String>,

    #[arg(long, env = "OPENAI_MODEL", hide = true)]
    openai_model: Option<String>,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true, hide = true)]
    anthropic_api_key: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, hide = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true, hide = true)]
    github_token: Option<String>,
}

impl Cli {
    fn trigger_inputs(&self) -> TriggerInputs {
        TriggerInputs {
            mode_override: self.mode.clone(),
            feature_override: self.feature.clone(),
            pr_number_override: parse_id("pr number", self.pr_number.as_deref()),
            plan_comment_id: parse_id("comment id", self.plan_comment_id.as_deref()),
            event_name: self.event_name.clone(),
            event: read_event(self.event_path.as_deref()),
            repository: self.repository.clone(),
            commit_id: self.sha.clone(),
        }
    }
}

/// Lenient numeric input: blank or non-positive values mean "not set".
fn parse_id(what: &str, raw: Option<&str>) -> Option<u64> {
    let raw = raw.map(str::trim).filter(|r| !r.is_empty())?;
    match raw.parse::<u64>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            warn!(value = raw, "ignoring invalid {what}");
            None
        }
    }
}

fn read_event(path: Option<&Path>) -> Value {
    let Some(path) = path else {
        return Value::Null;
    };
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "event payload is not valid JSON");
            Value::Null
        }),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read event payload");
            Value::Null
        }
    }
}

/// Defaults, environment overlay, repository config, `--config`, then flags.
fn load_config(cli: &Cli) -> eyre::Result<Config> {
    let mut config = Config::default();
    config.apply_env(&EnvOverlay {
        preferred_provider: cli.env_provider.clone(),
        fallback: cli.env_fallback.clone(),
        anthropic_model: cli.anthropic_model.clone(),
        openai_model: cli.openai_model.clone(),
    })?;

    let repo_config = cli.repo_root.join(".orch").join("config");
    if repo_config.is_file() {
        config
            .load_file(&repo_config)
            .wrap_err_with(|| format!("failed to load {}", repo_config.display()))?;
    }
    if let Some(path) = &cli.config {
        config
            .load_file(path)
            .wrap_err_with(|| format!("failed to load {}", path.display()))?;
    }

    if let Some(provider) = &cli.provider {
        config.prefer_provider(ProviderKind::parse(provider)?);
    }
    if cli.no_fallback {
        config.fallback = false;
    }
    if let Some(format) = cli.change_format {
        config.change_format = format.into();
    }
    if let Some(n) = cli.max_iterations {
        config.max_iterations = n;
    }
    if !cli.test_cmds.is_empty() {
        config.test_cmds.clone_from(&cli.test_cmds);
    }
    if cli.no_commit {
        config.commit_changes = false;
    }
    if let Some(out) = &cli.out_dir {
        config.out_dir.clone_from(out);
    }
    config.resolve_paths(&cli.repo_root);
    Ok(config)
}

async fn execute(
    cli: &Cli,
    config: &Config,
    inputs: &TriggerInputs,
    store: &mut ArtifactStore,
) -> eyre::Result<i32> {
    let keys = ProviderKeys {
        anthropic: cli.anthropic_api_key.clone(),
        openai: cli.openai_api_key.clone(),
    };
    let gateway = gateway_from_config(config, &keys).wrap_err("failed to build HTTP client")?;
    if gateway.is_empty() {
        bail!("no model provider credentials: set ANTHROPIC_API_KEY or OPENAI_API_KEY");
    }

    let host = match cli.github_token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => Some(
            GithubClient::new(token, Duration::from_secs(u64::from(config.provider_timeout_sec)))
                .wrap_err("failed to build GitHub client")?,
        ),
        None => None,
    };
    if host.is_none() && resolve_pr_number(inputs).is_some() {
        bail!("GITHUB_TOKEN is required when running against a pull request");
    }
    let host_ref = host.as_ref().map(|h| h as &dyn PullRequestHost);

    let mut builder = DescriptorBuilder::new(config);
    if let Some(h) = host_ref {
        builder = builder.with_host(h);
    }
    let descriptor = builder.build(inputs).await.map_err(OrchestratorError::from)?;

    let suite = TestRunner::from_config(config, &cli.repo_root);
    let mut pipeline = Pipeline::new(config, &gateway, &suite, &cli.repo_root);
    if let Some(h) = host_ref {
        pipeline = pipeline.with_host(h);
    }

    let outcome = pipeline.run(&descriptor, store).await?;
    info!(mode = %descriptor.mode, exit_code = outcome.exit_code(), "run complete");
    Ok(outcome.exit_code())
}

fn main() {
    let cli = Cli::parse();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{e:?}");
            std::process::exit(exit_codes::FATAL);
        }
    };

    let inputs = cli.trigger_inputs();
    let mode = resolve_mode(&inputs).unwrap_or_default();
    let mut store = match ArtifactStore::open(&config.out_dir, mode) {
        Ok(store) => store,
        Err(e) => {
            error!(out_dir = %config.out_dir.display(), "cannot open artifact directory: {e}");
            std::process::exit(exit_codes::FATAL);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to create tokio runtime: {e}");
            std::process::exit(exit_codes::FATAL);
        }
    };

    let code = match runtime.block_on(execute(&cli, &config, &inputs, &mut store)) {
        Ok(code) => code,
        Err(report) => {
            error!("orchestrator error: {report:?}");
            if let Err(e) = store.write("error.txt", &format!("{report:?}")) {
                error!("failed to write error artifact: {e}");
            }
            report
                .downcast_ref::<OrchestratorError>()
                .map_or(exit_codes::FATAL, OrchestratorError::exit_code)
        }
    };
    std::process::exit(code);
}
