//! Unified diff extraction and repair.
//!
//! Model output rarely arrives as a clean patch. This module pulls the diff out
//! of surrounding prose or fences, repairs the malformations models commonly
//! produce, and rejects diffs that were cut off mid-hunk.

use crate::patch::PatchError;
use tracing::debug;

/// How the diff was located in the raw response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffSource {
    Fenced,
    GitHeader,
    FileHeader,
    Raw,
}

/// How many leading lines may precede a bare `--- ` header.
const FILE_HEADER_WINDOW: usize = 10;

/// Normalize every line ending to `\n`.
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Locate the diff inside a raw model response.
pub fn extract(response: &str) -> (String, DiffSource) {
    let text = normalize_newlines(response);

    if let Some(body) = fenced_block(&text) {
        return (body, DiffSource::Fenced);
    }
    if let Some(start) = text.find("diff --git") {
        return (text[start..].to_string(), DiffSource::GitHeader);
    }
    if let Some(start) = leading_file_header(&text) {
        return (text[start..].to_string(), DiffSource::FileHeader);
    }
    (text.trim().to_string(), DiffSource::Raw)
}

/// Interior of the first fenced block that looks like a diff, else of the first fence.
fn fenced_block(text: &str) -> Option<String> {
    let mut first = None;
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        // The fence tag (`diff`, `patch`, or nothing) runs to the end of the line.
        let Some(nl) = after.find('\n') else {
            break;
        };
        let body = &after[nl + 1..];
        let (interior, remainder) = match body.find("\n```") {
            Some(close) => (&body[..close], &body[close + 4..]),
            None if body.starts_with("```") => ("", &body[3..]),
            None => break,
        };
        if looks_like_diff(interior) {
            return Some(format!("{interior}\n"));
        }
        if first.is_none() {
            first = Some(format!("{interior}\n"));
        }
        rest = remainder;
    }
    first
}

fn looks_like_diff(text: &str) -> bool {
    text.contains("diff --git")
        || text.contains("\n@@")
        || text.starts_with("@@")
        || text.starts_with("--- ")
}

/// Byte offset of a `--- ` line within the first few lines.
fn leading_file_header(text: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.split('\n').take(FILE_HEADER_WINDOW) {
        if line.starts_with("--- ") {
            return Some(offset);
        }
        offset += line.len() + 1;
    }
    None
}

/// Repair common malformations. Idempotent.
///
/// - trailing whitespace is removed after the marker of context/add/remove lines
///   (hunk headers and other lines are left untouched)
/// - `index` lines of newly created files get the all-zero placeholder hashes
/// - the result ends with exactly one newline
pub fn sanitize(diff: &str) -> String {
    let diff = normalize_newlines(diff);
    let mut out = String::with_capacity(diff.len());
    let mut new_file = false;

    for line in diff.split('\n') {
        if line.starts_with("diff --git") {
            new_file = false;
        } else if line.starts_with("new file mode") {
            new_file = true;
        }

        let repaired = if line.starts_with("index ") {
            rewrite_index_line(line, new_file)
        } else if let Some(marker) = line.chars().next().filter(|c| matches!(*c, ' ' | '+' | '-')) {
            let body = line[1..].trim_end();
            format!("{marker}{body}")
        } else {
            line.to_string()
        };
        out.push_str(&repaired);
        out.push('\n');
    }

    let trimmed_len = out.trim_end_matches('\n').len();
    out.truncate(trimmed_len);
    out.push('\n');
    out
}

/// `index <old>..<new>[ <mode>]` for a created file becomes `index 0000000..0000000[ <mode>]`.
fn rewrite_index_line(line: &str, new_file: bool) -> String {
    let rest = &line["index ".len()..];
    let (hashes, mode) = match rest.split_once(' ') {
        Some((hashes, mode)) => (hashes, Some(mode)),
        None => (rest, None),
    };
    let old_is_zero = hashes
        .split_once("..")
        .is_some_and(|(old, _)| !old.is_empty() && old.chars().all(|c| c == '0'));

    if !(new_file || old_is_zero) {
        return line.to_string();
    }
    match mode {
        Some(mode) => format!("index 0000000..0000000 {mode}"),
        None => "index 0000000..0000000".to_string(),
    }
}

/// Discard natural-language text that follows the diff.
///
/// Scanning starts at the first hunk; the first line that is neither diff
/// syntax nor blank and reads like prose ends the diff.
pub fn strip_trailing_prose(diff: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut seen_hunk = false;

    for line in diff.split('\n') {
        if line.starts_with("@@") {
            seen_hunk = true;
        }
        if seen_hunk && !is_diff_syntax(line) && looks_like_prose(line) {
            debug!(line, "dropping trailing prose after diff");
            break;
        }
        kept.push(line);
    }

    // A lone space is a blank context line and counts toward the hunk.
    while kept.last().is_some_and(|l| l.is_empty()) {
        kept.pop();
    }
    let mut out = kept.join("\n");
    out.push('\n');
    out
}

fn is_diff_syntax(line: &str) -> bool {
    const HEADERS: [&str; 14] = [
        "@@",
        "diff --git",
        "index ",
        "--- ",
        "+++ ",
        "new file mode",
        "deleted file mode",
        "old mode",
        "new mode",
        "similarity index",
        "rename from",
        "rename to",
        "Binary files",
        "\\ No newline",
    ];
    line.is_empty()
        || line.starts_with([' ', '+', '-'])
        || HEADERS.iter().any(|h| line.starts_with(h))
}

fn looks_like_prose(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('#')
        || trimmed.to_ascii_lowercase().starts_with("note:")
        || trimmed.chars().next().is_some_and(char::is_uppercase)
}

/// Fail when the diff ends in a marker followed only by whitespace.
///
/// This is a heuristic: a genuine final line holding nothing but whitespace
/// is reported as truncated too.
pub fn detect_truncation(diff: &str) -> Result<(), PatchError> {
    let lines: Vec<&str> = diff.trim_end_matches('\n').split('\n').collect();
    for line in lines.iter().rev().take(2) {
        if is_dangling_marker(line) {
            return Err(PatchError::Truncated {
                line: (*line).to_string(),
            });
        }
    }
    Ok(())
}

fn is_dangling_marker(line: &str) -> bool {
    let mut chars = line.chars();
    matches!(chars.next(), Some(' ' | '+' | '-'))
        && line.len() > 1
        && chars.all(char::is_whitespace)
}

/// Line-level statistics of a unified diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub files: Vec<String>,
    pub added: usize,
    pub removed: usize,
}

impl DiffStats {
    pub fn changed_lines(&self) -> usize {
        self.added + self.removed
    }
}

/// Count files and +/- lines. File headers are not counted as changes.
pub fn stats(diff: &str) -> DiffStats {
    let mut stats = DiffStats::default();
    let mut in_hunk = false;
    let mut minus_path: Option<&str> = None;
    let lines: Vec<&str> = diff.split('\n').collect();

    for (idx, line) in lines.iter().enumerate() {
        let next_is_plus_header = lines.get(idx + 1).is_some_and(|n| n.starts_with("+++ "));

        if let Some(rest) = line.strip_prefix("diff --git ") {
            in_hunk = false;
            if let Some((_, b)) = rest.split_once(" b/") {
                stats.files.push(b.to_string());
            }
        } else if line.starts_with("@@") {
            in_hunk = true;
        } else if line.starts_with("--- ") && (!in_hunk || next_is_plus_header) {
            in_hunk = false;
            minus_path = Some(&line[4..]);
        } else if let Some(plus) = line.strip_prefix("+++ ").filter(|_| !in_hunk) {
            // Bare diffs without a `diff --git` line name files here.
            let has_git_header = lines[..idx]
                    .iter()
                    .rev()
                    .take_while(|l| !l.starts_with("@@"))
                    .any(|l| l.starts_with("diff --git"));
            if !has_git_header {
                let path = if plus.trim() == "/dev/null" {
                    minus_path.unwrap_or(plus)
                } else {
                    plus
                };
                stats.files.push(strip_side_prefix(path.trim()).to_string());
            }
        } else if in_hunk && line.starts_with('+') {
            stats.added += 1;
        } else if in_hunk && line.starts_with('-') {
            stats.removed += 1;
        }
    }
    stats
}

fn strip_side_prefix(path: &str) -> &str {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}

/// Full preparation of a raw model response into an applicable diff.
pub fn prepare(response: &str, strict: bool, max_diff_lines: usize) -> Result<String, PatchError> {
    let (extracted, source) = extract(response);
    debug!(?source, bytes = extracted.len(), "extracted diff");

    let candidate = if strict {
        strip_trailing_prose(&extracted)
    } else {
        extracted
    };
    detect_truncation(&candidate)?;

    let diff = sanitize(&candidate);
    let changed = stats(&diff).changed_lines();
    if max_diff_lines > 0 && changed > max_diff_lines {
        return Err(PatchError::TooLarge {
            lines: changed,
            max: max_diff_lines,
        });
    }
    Ok(diff)
}
