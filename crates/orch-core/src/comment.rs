//! Pull-request comment bodies for every pipeline outcome.

use crate::patch::ChangeReport;
use crate::types::TestResult;

const ARTIFACTS_FOOTER: &str =
    "_Artifacts: see the `ai-orchestrator-artifacts` upload of this workflow run._";

/// Render test results as PASS/FAIL headers with fenced output.
pub fn format_test_results(results: &[TestResult]) -> String {
    if results.is_empty() {
        return "_No test commands configured._".to_string();
    }
    results
        .iter()
        .map(|r| {
            let status = if r.success { "✓ PASS" } else { "✗ FAIL" };
            format!("{status}: {}\n```\n{}\n```", r.command, r.output.trim_end())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// First `limit` characters of a raw response, safe to place inside a fence.
pub fn raw_preview(raw: &str, limit: usize) -> String {
    raw.chars().take(limit).collect::<String>().replace('`', "'")
}

/// Implementation finished: changes applied and tests run.
pub fn implementation_result(
    plan_summary: &str,
    changes: &ChangeReport,
    tests: &[TestResult],
    pushed: bool,
) -> String {
    let passed = crate::types::all_passed(tests);
    let status = if passed { "✓ Success" } else { "✗ Tests Failed" };
    let mut lines = vec![
        format!("## 🤖 AI Implementation ({status})"),
        String::new(),
        "### Summary".to_string(),
        plan_summary.to_string(),
    ];
    if pushed {
        lines.push(String::new());
        lines.push("**✓ Changes have been committed and pushed to this branch.**".to_string());
    }
    if !passed {
        lines.push(String::new());
        lines.push("Comment `/ai fix` to let the agent attempt a repair.".to_string());
    }
    lines.extend([
        String::new(),
        "### Changes".to_string(),
        "```".to_string(),
        changes.summarize(),
        "```".to_string(),
        String::new(),
        "### Test Results".to_string(),
        format_test_results(tests),
        String::new(),
        ARTIFACTS_FOOTER.to_string(),
    ]);
    lines.join("\n")
}

/// The model response could not be parsed into a change-set.
pub fn parse_failure(title: &str, error: &str, raw: &str, preview_chars: usize) -> String {
    [
        format!("## 🤖 {title} (Failed)"),
        String::new(),
        format!("Could not parse the AI response: {error}"),
        String::new(),
        format!("<details><summary>Raw AI response (first {preview_chars} chars)</summary>"),
        String::new(),
        "```".to_string(),
        raw_preview(raw, preview_chars),
        "```".to_string(),
        "</details>".to_string(),
        String::new(),
        "_Check artifacts for full details._".to_string(),
    ]
    .join("\n")
}

/// The change-set was rejected while being applied.
pub fn apply_failure(title: &str, error: &str) -> String {
    [
        format!("## 🤖 {title} (Failed)"),
        String::new(),
        "Could not apply the changes:".to_string(),
        "```".to_string(),
        error.replace('`', "'"),
        "```".to_string(),
        String::new(),
        "_Check artifacts for full details._".to_string(),
    ]
    .join("\n")
}

/// Tests pass after the fix loop (or were already passing).
pub fn fix_success(iterations: u32, pushed: bool) -> String {
    let detail = if iterations == 0 {
        "Tests were already passing; no fix was needed.".to_string()
    } else {
        format!("Tests now passing after {iterations} fix iteration(s).")
    };
    let mut lines = vec!["## 🤖 AI Fix Mode (✓ Success)".to_string(), String::new(), detail];
    if pushed {
        lines.push(String::new());
        lines.push("**✓ Fixes have been committed and pushed to this branch.**".to_string());
    }
    lines.push(String::new());
    lines.push(ARTIFACTS_FOOTER.to_string());
    lines.join("\n")
}

/// The fix loop used every iteration and tests still fail.
pub fn fix_exhausted(iterations: u32, remaining_failures: &str) -> String {
    [
        "## 🤖 AI Fix Mode (✗ Failed)".to_string(),
        String::new(),
        format!("Could not fix all test failures after {iterations} iteration(s)."),
        String::new(),
        "### Still failing".to_string(),
        remaining_failures.to_string(),
        String::new(),
        "Manual intervention required.".to_string(),
        String::new(),
        ARTIFACTS_FOOTER.to_string(),
    ]
    .join("\n")
}

/// The fix loop stopped early because a fix could not be parsed or applied.
pub fn fix_aborted(iteration: u32, error: &str) -> String {
    [
        "## 🤖 AI Fix Mode (✗ Failed)".to_string(),
        String::new(),
        format!("Fix iteration {iteration} could not be applied; the loop was stopped."),
        "```".to_string(),
        error.replace('`', "'"),
        "```".to_string(),
        String::new(),
        "Manual intervention required.".to_string(),
        String::new(),
        ARTIFACTS_FOOTER.to_string(),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(command: &str, success: bool, output: &str) -> TestResult {
        TestResult {
            command: command.into(),
            success,
            output: output.into(),
            duration_ms: 0,
        }
    }

    #[test]
    fn format_test_results_renders_status_and_output() {
        let text = format_test_results(&[
            result("npm test", true, "ok\n"),
            result("npm run test:ci", false, "1 failing"),
        ]);
        assert_eq!(
            text,
            "✓ PASS: npm test\n```\nok\n```\n\n✗ FAIL: npm run test:ci\n```\n1 failing\n```"
        );
    }

    #[test]
    fn raw_preview_truncates_and_neutralises_backticks() {
        let raw = format!("```json\n{}", "x".repeat(600));
        let preview = raw_preview(&raw, 500);
        assert_eq!(preview.chars().count(), 500);
        assert!(preview.starts_with("'''json"));
        assert!(!preview.contains('`'));
    }

    #[test]
    fn implementation_result_marks_failures() {
        let changes = ChangeReport {
            files: vec!["a.ts".into()],
            added: 1,
            removed: 0,
        };
        let body = implementation_result("Add mod", &changes, &[result("jest", false, "boom")], false);
        assert!(body.starts_with("## 🤖 AI Implementation (✗ Tests Failed)"));
        assert!(body.contains("Files changed: 1"));
        assert!(body.contains("/ai fix"));
        assert!(!body.contains("pushed"));
    }

    #[test]
    fn fix_exhausted_requires_manual_intervention() {
        let body = fix_exhausted(2, "✗ FAIL: jest");
        assert!(body.contains("after 2 iteration(s)"));
        assert!(body.contains("Manual intervention required."));
    }

    #[test]
    fn fix_success_with_zero_iterations() {
        assert!(fix_success(0, false).contains("already passing"));
        assert!(fix_success(1, true).contains("after 1 fix iteration(s)"));
    }
}
