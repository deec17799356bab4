//! Response normalization: coerces raw model text into JSON and collapses the
//! free-form coverage vocabulary into the closed `Coverage` enum.

use serde_json::Value;

use crate::analysis::pipeline::PipelineError;
use crate::llm_client::{excerpt, ERROR_EXCERPT_CHARS};
use crate::models::analysis::Coverage;

/// Exact-match vocabulary, checked before the substring fallbacks.
const COVERAGE_SYNONYMS: &[(&str, Coverage)] = &[
    ("full", Coverage::Full),
    ("strong", Coverage::Full),
    ("excellent", Coverage::Full),
    ("partial", Coverage::Partial),
    ("good", Coverage::Partial),
    ("medium", Coverage::Partial),
    ("moderate", Coverage::Partial),
    ("weak", Coverage::Partial),
    ("limited", Coverage::Partial),
    ("minimal", Coverage::None),
    ("poor", Coverage::None),
    ("missing", Coverage::None),
    ("none", Coverage::None),
];

/// Strips a ```` ``` ```` / ```` ```json ```` fence around model output.
pub fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = strip_language_tag(rest).trim();
    rest.strip_suffix("```").map(str::trim_end).unwrap_or(rest)
}

/// Drops an info string such as `json` or `JSON5` directly after the opening fence.
fn strip_language_tag(rest: &str) -> &str {
    let tag_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .unwrap_or(rest.len());
    let (tag, after) = rest.split_at(tag_len);
    if tag.is_empty() {
        rest
    } else if after.starts_with(char::is_whitespace) || tag.eq_ignore_ascii_case("json") {
        after
    } else {
        rest
    }
}

/// Strips fences and parses the remainder as JSON.
pub fn parse_json(raw: &str) -> Result<Value, PipelineError> {
    serde_json::from_str(strip_code_fence(raw)).map_err(|e| PipelineError::InvalidJson {
        message: e.to_string(),
        excerpt: excerpt(raw, ERROR_EXCERPT_CHARS),
    })
}

/// Best-effort classification of a coverage token. Never fails: anything
/// unrecognized, including non-string JSON, is `Coverage::None`.
pub fn canonicalize_coverage(value: &Value) -> Coverage {
    value
        .as_str()
        .map(canonicalize_coverage_token)
        .unwrap_or(Coverage::None)
}

pub fn canonicalize_coverage_token(token: &str) -> Coverage {
    let token = token.trim().to_lowercase();
    if let Some((_, coverage)) = COVERAGE_SYNONYMS.iter().find(|(word, _)| *word == token) {
        return *coverage;
    }
    if token.contains("full") {
        Coverage::Full
    } else if token.contains("partial") {
        Coverage::Partial
    } else {
        Coverage::None
    }
}

/// Rewrites every `resume_mapping[].coverage` of a raw mapping matrix in place.
/// Non-object payloads and entries are left untouched for schema validation to reject.
pub fn canonicalize_mapping_coverage(matrix: &mut Value) {
    let Some(mappings) = matrix
        .get_mut("resume_mapping")
        .and_then(Value::as_array_mut)
    else {
        return;
    };
    for entry in mappings.iter_mut().filter_map(Value::as_object_mut) {
        let coverage = canonicalize_coverage(entry.get("coverage").unwrap_or(&Value::Null));
        entry.insert(
            "coverage".to_string(),
            Value::String(coverage.as_str().to_string()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_code_fence_with_json_tag() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_code_fence(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_code_fence_without_tag() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_code_fence(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_code_fence_other_tag_and_missing_close() {
        assert_eq!(strip_code_fence("```JSON5\n[1, 2]"), "[1, 2]");
        assert_eq!(strip_code_fence("```json{\"a\":1}```"), "{\"a\":1}");
    }

    #[test]
    fn test_strip_code_fence_no_fences() {
        let input = "  {\"key\": \"value\"}\n";
        assert_eq!(strip_code_fence(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_parse_json_fenced() {
        let value = parse_json("```json\n{\"a\":1}\n```").unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_parse_json_invalid_carries_prefix_of_input() {
        let raw = "```json {bad```";
        match parse_json(raw) {
            Err(PipelineError::InvalidJson { excerpt, .. }) => assert_eq!(excerpt, raw),
            other => panic!("expected InvalidJson, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_json_excerpt_is_bounded() {
        let raw = format!("{{{}", "y".repeat(3000));
        match parse_json(&raw) {
            Err(PipelineError::InvalidJson { excerpt, .. }) => {
                assert_eq!(excerpt.chars().count(), ERROR_EXCERPT_CHARS);
                assert!(raw.starts_with(&excerpt));
            }
            other => panic!("expected InvalidJson, got {other:?}"),
        }
    }

    #[test]
    fn test_canonicalize_synonyms() {
        for token in ["strong", "Excellent", "FULL"] {
            assert_eq!(canonicalize_coverage_token(token), Coverage::Full, "{token}");
        }
        for token in ["good", "Medium", "moderate", "Weak", "limited", "partial"] {
            assert_eq!(canonicalize_coverage_token(token), Coverage::Partial, "{token}");
        }
        for token in ["minimal", "POOR", "missing", "none"] {
            assert_eq!(canonicalize_coverage_token(token), Coverage::None, "{token}");
        }
    }

    #[test]
    fn test_canonicalize_substring_fallbacks() {
        assert_eq!(canonicalize_coverage_token("Fully covered"), Coverage::Full);
        assert_eq!(canonicalize_coverage_token(" partially "), Coverage::Partial);
        assert_eq!(canonicalize_coverage_token("unclear"), Coverage::None);
        assert_eq!(canonicalize_coverage_token(""), Coverage::None);
    }

    #[test]
    fn test_canonicalize_non_string_is_none() {
        assert_eq!(canonicalize_coverage(&Value::Null), Coverage::None);
        assert_eq!(canonicalize_coverage(&json!(1)), Coverage::None);
        assert_eq!(canonicalize_coverage(&json!("Strong")), Coverage::Full);
    }

    #[test]
    fn test_canonicalize_mapping_coverage_rewrites_entries() {
        let mut matrix = json!({
            "jd_points": [],
            "resume_mapping": [
                {"jd_point_id": "1", "coverage": "Weak"},
                {"jd_point_id": "2"},
                "not an object"
            ]
        });
        canonicalize_mapping_coverage(&mut matrix);
        assert_eq!(matrix["resume_mapping"][0]["coverage"], "partial");
        assert_eq!(matrix["resume_mapping"][1]["coverage"], "none");
        assert_eq!(matrix["resume_mapping"][2], "not an object");
    }
}
