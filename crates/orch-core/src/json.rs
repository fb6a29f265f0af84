//! Locating JSON payloads inside free-form model output.

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no JSON object found in response")]
    NoObject,
    #[error("invalid JSON: {0}")]
    Invalid(#[from] serde_json::Error),
    #[error("invalid response shape: {0}")]
    Shape(String),
}

/// Return the interior of the first markdown fence (optionally tagged `json`),
/// or the input unchanged when there is no complete fence.
pub fn strip_fences(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after_ticks = &text[open + 3..];
    let body_start = match after_ticks.find('\n') {
        Some(nl) if is_fence_tag(&after_ticks[..nl]) => nl + 1,
        _ => after_ticks.len() - after_ticks.trim_start_matches("json").len(),
    };
    let body = &after_ticks[body_start..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => text,
    }
}

fn is_fence_tag(tag: &str) -> bool {
    let tag = tag.trim();
    tag.is_empty() || tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Slice from the first `{` to the last `}` of the trimmed text.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let text = text.trim();
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Fence-strip, bracket-match and deserialize.
///
/// A fence may sit inside a JSON string value, so when the fenced interior
/// does not hold the object the whole response is tried as well.
pub fn parse_object<T: DeserializeOwned>(text: &str) -> Result<T, ExtractError> {
    let fenced = strip_fences(text);
    let first = parse_candidate(fenced);
    if first.is_err() && fenced.len() != text.len() {
        if let Ok(value) = parse_candidate(text) {
            return Ok(value);
        }
    }
    first
}

fn parse_candidate<T: DeserializeOwned>(text: &str) -> Result<T, ExtractError> {
    let object = extract_json_object(text).ok_or(ExtractError::NoObject)?;
    Ok(serde_json::from_str(object)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Sample {
        a: u32,
    }

    #[test]
    fn strip_fences_takes_tagged_interior() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nThanks";
        assert_eq!(strip_fences(text), "{\"a\": 1}");
    }

    #[test]
    fn strip_fences_takes_untagged_interior() {
        let text = "```\n{\"a\": 2}\n```";
        assert_eq!(strip_fences(text), "{\"a\": 2}");
    }

    #[test]
    fn strip_fences_leaves_unfenced_text() {
        assert_eq!(strip_fences("{\"a\": 3}"), "{\"a\": 3}");
    }

    #[test]
    fn strip_fences_ignores_unterminated_fence() {
        let text = "```json\n{\"a\": 4}";
        assert_eq!(strip_fences(text), text);
    }

    #[test]
    fn extract_json_object_tolerates_surrounding_prose() {
        let text = "  Sure! {\"a\": {\"b\": 1}} hope that helps ";
        assert_eq!(extract_json_object(text), Some("{\"a\": {\"b\": 1}}"));
    }

    #[test]
    fn extract_json_object_requires_braces() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn parse_object_reports_missing_object() {
        let result: Result<Sample, _> = parse_object("nothing");
        assert!(matches!(result, Err(ExtractError::NoObject)));
    }

    #[test]
    fn parse_object_tolerates_fence_inside_string_value() {
        let text = r#"{"note": "run ```sh\nls\n``` first", "a": 5}"#;
        let sample: Sample = parse_object(text).unwrap();
        assert_eq!(sample.a, 5);
    }

    #[test]
    fn parse_object_reads_fenced_json() {
        let sample: Sample = parse_object("```json\n{\"a\": 9}\n```").unwrap();
        assert_eq!(sample.a, 9);
    }
}
