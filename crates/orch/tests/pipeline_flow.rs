//! End-to-end runs from trigger inputs to artifacts and PR comments, with
//! scripted model backends and an in-memory pull-request host.

use async_trait::async_trait;
use chrono::Utc;
use orch::github::{HostError, PrComment, PullRequestText};
use orch::provider::ProviderError;
use orch::{
    DescriptorBuilder, Pipeline, Provider, ProviderGateway, PullRequestHost, RunOutcome,
    TestSuite, TriggerInputs,
};
use orch_core::plan_markdown::render_plan;
use orch_core::{ArtifactStore, Config, Plan, PlannedChange, RunMode, TestResult};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Clone)]
struct QueuedProvider {
    responses: Arc<Mutex<VecDeque<String>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl QueuedProvider {
    fn new(responses: &[&str]) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.iter().map(ToString::to_string).collect())),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for QueuedProvider {
    fn name(&self) -> &str {
        "queued"
    }

    async fn complete(
        &self,
        _system: &str,
        user: &str,
        _max_tokens: u32,
    ) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(user.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::Api("no scripted response left".into()))
    }
}

#[derive(Default)]
struct MemoryHost {
    pull_request: PullRequestText,
    comments: HashMap<u64, String>,
    posted: Mutex<Vec<(u64, String)>>,
}

impl MemoryHost {
    fn posted(&self) -> Vec<(u64, String)> {
        self.posted.lock().unwrap().clone()
    }
}

#[async_trait]
impl PullRequestHost for MemoryHost {
    async fn comment_on_pull_request(
        &self,
        _repo: &str,
        pr_number: u64,
        body: &str,
    ) -> Result<(), HostError> {
        self.posted.lock().unwrap().push((pr_number, body.to_string()));
        Ok(())
    }

    async fn get_pull_request_body(
        &self,
        _repo: &str,
        _pr_number: u64,
    ) -> Result<PullRequestText, HostError> {
        Ok(self.pull_request.clone())
    }

    async fn get_comment_by_id(&self, _repo: &str, comment_id: u64) -> Result<String, HostError> {
        self.comments
            .get(&comment_id)
            .cloned()
            .ok_or_else(|| HostError::Api {
                status: 404,
                body: "Not Found".into(),
            })
    }

    async fn get_recent_comments(
        &self,
        _repo: &str,
        _pr_number: u64,
    ) -> Result<Vec<PrComment>, HostError> {
        Ok(self
            .comments
            .iter()
            .map(|(id, body)| PrComment {
                id: *id,
                body: body.clone(),
                user: "github-actions[bot]".into(),
                created_at: Utc::now(),
            })
            .collect())
    }
}

struct PassingSuite {
    commands: Vec<String>,
}

#[async_trait]
impl TestSuite for PassingSuite {
    fn commands(&self) -> &[String] {
        &self.commands
    }

    async fn run_all(&self) -> Vec<TestResult> {
        self.commands
            .iter()
            .map(|command| TestResult {
                command: command.clone(),
                success: true,
                output: "1 passed".into(),
                duration_ms: 3,
            })
            .collect()
    }
}

fn fixture_repo(dir: &Path) {
    fs::create_dir_all(dir.join("src")).unwrap();
    fs::write(
        dir.join("src/math.ts"),
        "export const add = (a: number, b: number) => a + b;\n",
    )
    .unwrap();
    fs::write(dir.join("package.json"), r#"{"scripts":{"test":"jest"}}"#).unwrap();
}

fn config() -> Config {
    Config {
        commit_changes: false,
        ..Config::default()
    }
}

const PLAN_RESPONSE: &str = r#"Here is the plan:
```json
{
  "summary": "Add a modulo operation",
  "steps": ["Add mod to src/math.ts"],
  "files_to_modify": [{"path": "src/math.ts", "reason": "new operation"}],
  "files_to_create": [],
  "tests": [{"command": "npm test", "reason": "unit tests"}],
  "risks": []
}
```"#;

#[tokio::test]
async fn plan_mode_posts_one_plan_comment() {
    let repo = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    fixture_repo(repo.path());

    let config = config();
    let host = MemoryHost {
        pull_request: PullRequestText {
            title: "Modulo".into(),
            body: "Please add modulo".into(),
        },
        ..MemoryHost::default()
    };
    let inputs = TriggerInputs {
        feature_override: Some("add a modulo operation".into()),
        event_name: "pull_request".into(),
        event: json!({
            "pull_request": {"number": 7},
            "sender": {"login": "octocat"}
        }),
        repository: Some("acme/calc".into()),
        commit_id: Some("abc123".into()),
        ..TriggerInputs::default()
    };

    let descriptor = DescriptorBuilder::new(&config)
        .with_host(&host)
        .build(&inputs)
        .await
        .unwrap();
    assert_eq!(descriptor.mode, RunMode::Plan);
    assert_eq!(descriptor.pr_number, Some(7));
    assert_eq!(descriptor.feature_text, "add a modulo operation");

    let provider = QueuedProvider::new(&[PLAN_RESPONSE]);
    let gateway = ProviderGateway::new(vec![Box::new(provider.clone())], true);
    let suite = PassingSuite {
        commands: vec!["npm test".into()],
    };
    let mut store = ArtifactStore::open(out.path(), descriptor.mode).unwrap();

    let outcome = Pipeline::new(&config, &gateway, &suite, repo.path())
        .with_host(&host)
        .run(&descriptor, &mut store)
        .await
        .unwrap();

    match &outcome {
        RunOutcome::Planned(plan) => assert_eq!(plan.summary, "Add a modulo operation"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(outcome.exit_code(), 0);

    let plan: Plan = store.read_json("plan.json").unwrap();
    assert_eq!(plan.files_to_modify[0].path, "src/math.ts");

    let posted = host.posted();
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].0, 7);
    assert!(posted[0].1.contains("Files to modify"));

    let prompts = provider.prompts();
    assert!(prompts[0].contains("add a modulo operation"));
    assert!(prompts[0].contains("npm test"));
    assert!(out.path().join("events.tsv").is_file());
}

#[tokio::test]
async fn implement_reuses_plan_comment_and_applies_files() {
    let repo = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    fixture_repo(repo.path());

    let plan = Plan {
        summary: "Add a modulo operation".into(),
        steps: vec!["Add mod".into()],
        files_to_modify: vec![PlannedChange {
            path: "src/math.ts".into(),
            reason: "new operation".into(),
        }],
        ..Plan::default()
    };
    let host = MemoryHost {
        comments: HashMap::from([(42, render_plan(&plan))]),
        ..MemoryHost::default()
    };

    let config = config();
    let inputs = TriggerInputs {
        plan_comment_id: Some(42),
        event_name: "issue_comment".into(),
        event: json!({
            "issue": {"number": 7, "pull_request": {}},
            "comment": {"body": "/ai implement"},
            "sender": {"login": "octocat"}
        }),
        repository: Some("acme/calc".into()),
        commit_id: Some("abc123".into()),
        ..TriggerInputs::default()
    };
    let descriptor = DescriptorBuilder::new(&config)
        .with_host(&host)
        .build(&inputs)
        .await
        .unwrap();
    assert_eq!(descriptor.mode, RunMode::Implement);
    assert_eq!(descriptor.prior_plan.as_ref(), Some(&plan));

    let scope_response = r#"{"included_files":[{"path":"src/math.ts","max_bytes":4000},{"path":"src/missing.ts","max_bytes":100}],"excluded_patterns":[],"notes":"math only"}"#;
    let files_response = json!({
        "files": [{
            "path": "src/math.ts",
            "content": "export const add = (a: number, b: number) => a + b;\nexport const mod = (a: number, b: number) => a % b;\n"
        }],
        "summary": "Add mod"
    })
    .to_string();
    let provider = QueuedProvider::new(&[scope_response, files_response.as_str()]);
    let gateway = ProviderGateway::new(vec![Box::new(provider.clone())], true);
    let suite = PassingSuite {
        commands: vec!["npm test".into()],
    };
    let mut store = ArtifactStore::open(out.path(), descriptor.mode).unwrap();

    let outcome = Pipeline::new(&config, &gateway, &suite, repo.path())
        .with_host(&host)
        .run(&descriptor, &mut store)
        .await
        .unwrap();

    match outcome {
        RunOutcome::Implemented {
            tests_passed,
            pushed,
        } => {
            assert!(tests_passed);
            assert!(!pushed);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    // Planning was skipped: scope and implementation only.
    assert_eq!(provider.prompts().len(), 2);

    let updated = fs::read_to_string(repo.path().join("src/math.ts")).unwrap();
    assert!(updated.contains("export const mod"));

    let scope: orch_core::Scope = store.read_json("scope.json").unwrap();
    assert_eq!(scope.paths().collect::<Vec<_>>(), vec!["src/math.ts"]);

    let posted = host.posted();
    assert_eq!(posted.len(), 1);
    assert!(posted[0].1.contains("AI Implementation (✓ Success)"));
    assert!(posted[0].1.contains("src/math.ts"));
}
