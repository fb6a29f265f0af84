//! Prompt assembly for each model-facing stage.

use crate::config::ChangeFormat;
use crate::types::{FileContent, Plan, Scope};

/// A system/user prompt pair for one provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

const PLAN_SCHEMA: &str = r#"{
  "summary": "string",
  "steps": ["string"],
  "files_to_modify": [{"path":"string","reason":"string"}],
  "files_to_create": [{"path":"string","purpose":"string"}],
  "tests": [{"command":"COPY EXACTLY from 'Test commands' above","reason":"string"}],
  "risks": ["string"]
}"#;

const SCOPE_SCHEMA: &str = r#"{
  "included_files": [{"path":"string","max_bytes":80000}],
  "excluded_patterns": ["string"],
  "notes": "string"
}"#;

fn files_section(files: &[FileContent]) -> String {
    files
        .iter()
        .map(|f| format!("--- File: {} ---\n{}", f.path, f.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn pretty<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn test_commands_section(test_cmds: &[String]) -> String {
    if test_cmds.is_empty() {
        return "Test commands: (none configured)".to_string();
    }
    let list = test_cmds
        .iter()
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Test commands:\n{list}")
}

/// Planner: feature request to structured plan.
pub fn planner(feature_text: &str, repo_structure: &str, test_cmds: &[String]) -> Prompt {
    let system = [
        "You are an expert software architect and senior engineer.",
        "You must produce a plan for implementing a feature request.",
        "",
        "Rules:",
        "1. ONLY use file paths that appear in the repository structure. Do not invent paths.",
        "2. ONLY use test commands listed under 'Test commands'. Copy them exactly.",
        "3. New files go in the same directories as similar existing files.",
        "4. Do not propose repo-wide refactors. Keep changes minimal and scoped.",
        "5. Output MUST be valid JSON matching the schema. Do not wrap it in markdown fences.",
    ]
    .join("\n");

    let user = [
        "Feature request:".to_string(),
        feature_text.trim().to_string(),
        String::new(),
        "=== REPOSITORY STRUCTURE (USE THESE EXACT PATHS) ===".to_string(),
        repo_structure.to_string(),
        "=== END REPOSITORY STRUCTURE ===".to_string(),
        String::new(),
        test_commands_section(test_cmds),
        String::new(),
        "Return a plan as JSON with this schema:".to_string(),
        PLAN_SCHEMA.to_string(),
    ]
    .join("\n");

    Prompt { system, user }
}

/// Scope resolver: plan to the minimal set of files needed.
pub fn scope_resolver(plan: &Plan, repo_structure: &str) -> Prompt {
    let system = [
        "You are an expert at identifying which files are needed for a feature implementation.",
        "Given a plan, determine exactly which files to include in the implementation context.",
        "Rules:",
        "- Include only files that will be modified or are essential dependencies.",
        "- Exclude dependency folders, build output and lock files.",
        "- Keep the list minimal to avoid context bloat.",
        "- Output MUST be valid JSON matching the schema. Do not wrap it in markdown fences.",
    ]
    .join("\n");

    let user = [
        "Plan:".to_string(),
        pretty(plan),
        String::new(),
        "Repository structure:".to_string(),
        repo_structure.to_string(),
        String::new(),
        "Return a scope resolution as JSON with this schema:".to_string(),
        SCOPE_SCHEMA.to_string(),
    ]
    .join("\n");

    Prompt { system, user }
}

fn output_contract(format: ChangeFormat) -> &'static str {
    match format {
        ChangeFormat::Files => {
            r#"OUTPUT FORMAT: return a JSON object with this exact structure:
{
  "files": [{"path": "path/relative/to/repo", "content": "COMPLETE file content"}],
  "summary": "Brief description of changes made"
}
- Output ONLY valid JSON, no markdown fences, no extra text.
- Include the ENTIRE file content for every file you change, not just the changed parts.
- Escape special characters in JSON strings (newlines as \n, quotes as \")."#
        }
        ChangeFormat::Diff => {
            r"OUTPUT FORMAT: return a single unified diff in `git diff` format.
- Start with `diff --git a/<path> b/<path>` for every file.
- Use `--- /dev/null` and `new file mode 100644` for new files.
- Include at least three lines of context per hunk and correct hunk headers.
- Output ONLY the diff. No explanation before or after it."
        }
    }
}

/// Implementer: plan + scope + current contents to a change-set.
pub fn implementer(
    plan: &Plan,
    scope: &Scope,
    files: &[FileContent],
    format: ChangeFormat,
) -> Prompt {
    let system = [
        "You are an expert software engineer implementing features.",
        "You will receive a plan, a file scope, and current file contents.",
        "",
        "Rules:",
        "- Make ONLY the changes described in the plan.",
        "- Do not refactor unrelated code.",
        "- Ensure code is syntactically correct and follows the existing style.",
        "- Use paths relative to the repository root.",
        "",
        output_contract(format),
    ]
    .join("\n");

    let user = [
        "Plan:".to_string(),
        pretty(plan),
        String::new(),
        "Files in scope:".to_string(),
        pretty(scope),
        String::new(),
        "Current file contents:".to_string(),
        files_section(files),
        String::new(),
        "Implement the plan now.".to_string(),
    ]
    .join("\n");

    Prompt { system, user }
}

/// Fixer: failing test output + current contents to a repair change-set.
pub fn fixer(test_output: &str, files: &[FileContent], format: ChangeFormat) -> Prompt {
    let system = [
        "You are an expert software engineer debugging test failures.",
        "You will receive test output showing failures and the current file contents.",
        "Fix ONLY what is broken with the smallest possible change; do not add features.",
        "Only include files you are modifying.",
        "",
        output_contract(format),
    ]
    .join("\n");

    let user = [
        "Test failures:".to_string(),
        test_output.to_string(),
        String::new(),
        "Current file contents:".to_string(),
        files_section(files),
        String::new(),
        "Fix these test failures with minimal changes.".to_string(),
    ]
    .join("\n");

    Prompt { system, user }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planner_includes_feature_structure_and_tests() {
        let prompt = planner("  add a modulo operation \n", "src/\n  math.ts", &["npm test".into()]);
        assert!(prompt.user.starts_with("Feature request:\nadd a modulo operation\n"));
        assert!(prompt.user.contains("src/\n  math.ts"));
        assert!(prompt.user.contains("Test commands:\n- npm test"));
        assert!(prompt.user.contains("\"files_to_modify\""));
    }

    #[test]
    fn implementer_contract_follows_format() {
        let plan = Plan::default();
        let scope = Scope::default();
        let files = vec![FileContent {
            path: "a.ts".into(),
            content: "let a = 1;".into(),
        }];
        let json = implementer(&plan, &scope, &files, ChangeFormat::Files);
        assert!(json.system.contains("\"files\""));
        assert!(json.user.contains("--- File: a.ts ---\nlet a = 1;"));

        let diff = implementer(&plan, &scope, &files, ChangeFormat::Diff);
        assert!(diff.system.contains("unified diff"));
    }

    #[test]
    fn fixer_carries_failure_output() {
        let prompt = fixer("✗ FAIL: jest", &[], ChangeFormat::Files);
        assert!(prompt.user.starts_with("Test failures:\n✗ FAIL: jest"));
    }
}
