//! Plan comments: rendering and recovery.
//!
//! The rendered comment carries the plan JSON verbatim inside a hidden HTML
//! comment. Recovery prefers that block and only falls back to reading the
//! Markdown headings for comments posted without it.

use crate::types::{Plan, PlannedChange, PlannedFile, PlannedTest};
use tracing::debug;

/// Heading that identifies a plan comment.
pub const PLAN_HEADING: &str = "## 🤖 AI Plan";

const EMBED_OPEN: &str = "<!-- orch-plan";
const EMBED_CLOSE: &str = "-->";
const NONE_ITEM: &str = "- (none)";

const STEPS: &str = "### Steps";
const FILES_TO_MODIFY: &str = "### Files to modify";
const FILES_TO_CREATE: &str = "### Files to create";
const TESTS: &str = "### Tests";
const RISKS: &str = "### Risks / Notes";
const FOOTER: &str = "_Artifacts:";

fn bullet_list<T>(items: &[T], render: impl Fn(&T) -> String) -> String {
    if items.is_empty() {
        return NONE_ITEM.to_string();
    }
    items
        .iter()
        .map(|item| format!("- {}", render(item)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a plan as a pull-request comment.
pub fn render_plan(plan: &Plan) -> String {
    let steps = bullet_list(&plan.steps, Clone::clone);
    let modify = bullet_list(&plan.files_to_modify, |f| format!("`{}`: {}", f.path, f.reason));
    let create = bullet_list(&plan.files_to_create, |f| format!("`{}`: {}", f.path, f.purpose));
    let tests = bullet_list(&plan.tests, |t| format!("`{}`: {}", t.command, t.reason));
    let risks = bullet_list(&plan.risks, Clone::clone);

    // `-->` inside a string would close the HTML comment early.
    let embedded = serde_json::to_string(plan)
        .unwrap_or_default()
        .replace("-->", "--\\u003e");

    [
        format!("{PLAN_HEADING} (Plan Mode)"),
        String::new(),
        "_Planning complete. Comment `/ai implement` to apply these changes._".to_string(),
        String::new(),
        plan.summary.clone(),
        String::new(),
        STEPS.to_string(),
        steps,
        String::new(),
        FILES_TO_MODIFY.to_string(),
        modify,
        String::new(),
        FILES_TO_CREATE.to_string(),
        create,
        String::new(),
        TESTS.to_string(),
        tests,
        String::new(),
        RISKS.to_string(),
        risks,
        String::new(),
        format!("{FOOTER} see the `ai-orchestrator-artifacts` upload of this workflow run._"),
        String::new(),
        format!("{EMBED_OPEN}\n{embedded}\n{EMBED_CLOSE}"),
    ]
    .join("\n")
}

/// Whether a comment body is a rendered plan.
pub fn is_plan_comment(body: &str) -> bool {
    body.contains(PLAN_HEADING)
}

/// Recover a plan from a comment body.
pub fn parse_plan_comment(body: &str) -> Option<Plan> {
    if let Some(plan) = parse_embedded(body) {
        return Some(plan);
    }
    if !is_plan_comment(body) {
        return None;
    }
    debug!("plan comment has no embedded JSON, reading headings");
    Some(parse_headings(body))
}

fn parse_embedded(body: &str) -> Option<Plan> {
    let start = body.find(EMBED_OPEN)? + EMBED_OPEN.len();
    let len = body[start..].find(EMBED_CLOSE)?;
    serde_json::from_str(body[start..start + len].trim()).ok()
}

/// Text between `start` and the next `end` marker (or the end of the body).
fn section<'a>(body: &'a str, start: &str, end: &str) -> &'a str {
    let Some(idx) = body.find(start) else {
        return "";
    };
    let rest = &body[idx + start.len()..];
    match rest.find(end) {
        Some(stop) => rest[..stop].trim(),
        None => rest.trim(),
    }
}

fn list_items<'a>(body: &'a str, start: &str, end: &str) -> Vec<&'a str> {
    section(body, start, end)
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("- ") && *l != NONE_ITEM)
        .map(|l| l[2..].trim())
        .collect()
}

/// Split "`path`: text" (or "path: text") into its parts.
fn split_item(item: &str) -> Option<(String, String)> {
    if let Some(rest) = item.strip_prefix('`') {
        let (key, tail) = rest.split_once('`')?;
        let value = tail.trim_start().strip_prefix(':').unwrap_or(tail);
        return Some((key.trim().to_string(), value.trim().to_string()));
    }
    let (key, value) = item.split_once(':')?;
    Some((key.replace('`', "").trim().to_string(), value.trim().to_string()))
}

fn parse_headings(body: &str) -> Plan {
    let summary = section(body, PLAN_HEADING, STEPS)
        .lines()
        .skip(1) // remainder of the heading line
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('_'))
        .collect::<Vec<_>>()
        .join("\n");

    let steps = list_items(body, STEPS, FILES_TO_MODIFY)
        .into_iter()
        .map(ToString::to_string)
        .collect();
    let files_to_modify = list_items(body, FILES_TO_MODIFY, FILES_TO_CREATE)
        .into_iter()
        .filter_map(split_item)
        .map(|(path, reason)| PlannedChange { path, reason })
        .collect();
    let files_to_create = list_items(body, FILES_TO_CREATE, TESTS)
        .into_iter()
        .filter_map(split_item)
        .map(|(path, purpose)| PlannedFile { path, purpose })
        .collect();
    let tests = list_items(body, TESTS, RISKS)
        .into_iter()
        .filter_map(split_item)
        .map(|(command, reason)| PlannedTest { command, reason })
        .collect();
    let risks = list_items(body, RISKS, FOOTER)
        .into_iter()
        .map(ToString::to_string)
        .collect();

    Plan {
        summary,
        steps,
        files_to_modify,
        files_to_create,
        tests,
        risks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> Plan {
        Plan {
            summary: "Add a modulo operation.".into(),
            steps: vec!["Add mod()".into(), "Test it".into()],
            files_to_modify: vec![PlannedChange {
                path: "frontend/lib/math.ts".into(),
                reason: "new operation: modulo".into(),
            }],
            files_to_create: vec![],
            tests: vec![PlannedTest {
                command: "npm test".into(),
                reason: "unit tests".into(),
            }],
            risks: vec!["Division by zero --> NaN".into()],
        }
    }

    #[test]
    fn render_contains_all_sections() {
        let body = render_plan(&sample_plan());
        assert!(body.starts_with("## 🤖 AI Plan (Plan Mode)"));
        assert!(body.contains("### Files to modify\n- `frontend/lib/math.ts`: new operation: modulo"));
        assert!(body.contains("### Files to create\n- (none)"));
        assert!(body.contains("### Tests\n- `npm test`: unit tests"));
    }

    #[test]
    fn embedded_json_round_trips_verbatim() {
        let plan = sample_plan();
        let body = render_plan(&plan);
        assert_eq!(parse_plan_comment(&body), Some(plan));
    }

    #[test]
    fn headings_fallback_recovers_structure() {
        let plan = sample_plan();
        let rendered = render_plan(&plan);
        let legacy = &rendered[..rendered.find(EMBED_OPEN).unwrap()];

        let parsed = parse_plan_comment(legacy).unwrap();
        assert_eq!(parsed.summary, plan.summary);
        assert_eq!(parsed.steps, plan.steps);
        assert_eq!(parsed.files_to_modify, plan.files_to_modify);
        assert!(parsed.files_to_create.is_empty());
        assert_eq!(parsed.tests, plan.tests);
        assert_eq!(parsed.risks, plan.risks);
    }

    #[test]
    fn unrelated_comment_is_not_a_plan() {
        assert_eq!(parse_plan_comment("LGTM, ship it"), None);
        assert!(!is_plan_comment("/ai implement"));
    }

    #[test]
    fn split_item_handles_unquoted_paths() {
        assert_eq!(
            split_item("src/a.ts: reason: with colon"),
            Some(("src/a.ts".into(), "reason: with colon".into()))
        );
        assert_eq!(split_item("no separator"), None);
    }
}
