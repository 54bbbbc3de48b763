//! Pull the first JSON object out of free-form model text.
//!
//! Model output arrives wrapped in markdown fences, surrounded by prose, or cut
//! off at a response limit. [`extract_json`] finds the first depth-balanced
//! object that parses; [`extract_json_with_repair`] additionally runs each
//! candidate through [`repair_json`] before giving up on it.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// Characters kept from each end of the input in error previews.
pub const PREVIEW_CHARS: usize = 500;

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").unwrap());

// A trailing `,"key": <partial>` or `,"key` left behind by truncation.
static DANGLING_PAIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#",\s*"[^"]*"\s*:\s*[^,}\]]*$"#).unwrap());
static DANGLING_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#",\s*"[^"]*"?\s*$"#).unwrap());
static DANGLING_FIRST_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"]*"\s*:\s*$"#).unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("response was empty")]
    Empty,
    #[error("no valid JSON object found in response ({len} chars)")]
    NotFound {
        len: usize,
        head: String,
        tail: String,
    },
}

impl ExtractError {
    fn not_found(text: &str) -> Self {
        let len = text.chars().count();
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        let tail: String = if len > PREVIEW_CHARS {
            text.chars().skip(len - PREVIEW_CHARS).collect()
        } else {
            String::new()
        };
        ExtractError::NotFound { len, head, tail }
    }

    /// Head/tail of the offending input, for debug logging.
    pub fn preview(&self) -> Option<(&str, &str)> {
        match self {
            ExtractError::Empty => None,
            ExtractError::NotFound { head, tail, .. } => Some((head, tail)),
        }
    }
}

/// Remove markdown code fences, keeping their contents.
pub fn strip_fences(text: &str) -> String {
    FENCE_RE.replace_all(text, "$1").trim().to_string()
}

/// Return the first JSON object in `text` that parses without repair.
pub fn extract_json(text: &str) -> Result<Value, ExtractError> {
    let cleaned = strip_fences(text);
    if cleaned.is_empty() {
        return Err(ExtractError::Empty);
    }
    for candidate in balanced_objects(&cleaned) {
        if let Some(value) = parse_object(candidate) {
            return Ok(value);
        }
    }
    parse_object(&cleaned).ok_or_else(|| ExtractError::not_found(&cleaned))
}

/// Like [`extract_json`], but retries every candidate after [`repair_json`].
///
/// Truncated output never closes its outermost brace, so the text from the
/// first `{` onward is tried as a final candidate.
pub fn extract_json_with_repair(text: &str) -> Result<Value, ExtractError> {
    let cleaned = strip_fences(text);
    if cleaned.is_empty() {
        return Err(ExtractError::Empty);
    }
    let try_candidate =
        |candidate: &str| parse_object(candidate).or_else(|| parse_object(&repair_json(candidate)));

    for candidate in balanced_objects(&cleaned) {
        if let Some(value) = try_candidate(candidate) {
            return Ok(value);
        }
    }
    if let Some(start) = cleaned.find('{')
        && let Some(value) = try_candidate(&cleaned[start..])
    {
        return Ok(value);
    }
    parse_object(&cleaned).ok_or_else(|| ExtractError::not_found(&cleaned))
}

fn parse_object(candidate: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Slices of `text` spanning each top-level `{ ... }` in order of appearance.
///
/// Braces inside string literals do not count toward depth. Quotes are only
/// tracked once an object has opened so apostrophes in prose are harmless.
fn balanced_objects(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = idx;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    spans.push(&text[start..=idx]);
                }
            }
            _ => {}
        }
    }
    spans
}

/// Best-effort fix-up of malformed or truncated JSON.
///
/// Steps, in order: escape quotes that sit inside a string value, close an
/// unterminated string, drop a dangling trailing key/value, close unbalanced
/// brackets innermost first, then strip trailing commas before closers.
/// Valid JSON passes through unchanged.
pub fn repair_json(candidate: &str) -> String {
    let mut fixed = escape_interior_quotes(candidate.trim());
    close_open_string(&mut fixed);
    fixed = drop_dangling_pair(&fixed);
    close_brackets(&mut fixed);
    strip_trailing_commas(&fixed)
}

/// A quote inside a string closes it only when followed by a structural
/// character (or end of input); anything else is taken as literal text.
fn escape_interior_quotes(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (idx, &ch) in chars.iter().enumerate() {
        if !in_string {
            if ch == '"' {
                in_string = true;
            }
            out.push(ch);
            continue;
        }
        if escaped {
            escaped = false;
            out.push(ch);
            continue;
        }
        match ch {
            '\\' => {
                escaped = true;
                out.push(ch);
            }
            '"' => {
                let next = chars[idx + 1..].iter().find(|c| !c.is_whitespace());
                if matches!(next, None | Some(',' | ':' | '}' | ']')) {
                    in_string = false;
                    out.push(ch);
                } else {
                    out.push_str("\\\"");
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

fn close_open_string(text: &mut String) {
    let mut in_string = false;
    let mut escaped = false;
    for ch in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
        } else if ch == '"' {
            in_string = true;
        }
    }
    if in_string {
        if escaped {
            text.pop();
        }
        text.push('"');
    }
}

fn drop_dangling_pair(text: &str) -> String {
    let text = DANGLING_PAIR_RE.replace(text, "");
    let text = DANGLING_KEY_RE.replace(&text, "");
    DANGLING_FIRST_KEY_RE.replace(&text, "").into_owned()
}

fn close_brackets(text: &mut String) {
    let mut open: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for ch in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => open.push('}'),
            '[' => open.push(']'),
            '}' | ']' => {
                if open.last() == Some(&ch) {
                    open.pop();
                }
            }
            _ => {}
        }
    }
    while let Some(closer) = open.pop() {
        text.push(closer);
    }
}

fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (idx, &ch) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            out.push(ch);
            continue;
        }
        if ch == '"' {
            in_string = true;
        } else if ch == ',' {
            let next = chars[idx + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}' | ']')) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_markdown_fences() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nAnything else?";
        assert_eq!(extract_json(text).expect("extract"), json!({"a": 1}));
    }

    #[test]
    fn ignores_prose_around_object() {
        let text = "Sure! The plan is {\"widgetType\": \"chart\"} and that's it.";
        assert_eq!(
            extract_json(text).expect("extract"),
            json!({"widgetType": "chart"})
        );
    }

    #[test]
    fn first_valid_object_wins() {
        let text = r#"{"n": 1} then again {"n": 2}"#;
        assert_eq!(extract_json(text).expect("extract"), json!({"n": 1}));
    }

    #[test]
    fn skips_unparsable_candidate_and_continues() {
        let text = r#"{not json} {"ok": true}"#;
        assert_eq!(extract_json(text).expect("extract"), json!({"ok": true}));
    }

    #[test]
    fn braces_inside_strings_do_not_split_objects() {
        let text = r#"{"label": "curly } brace", "n": 2}"#;
        assert_eq!(
            extract_json(text).expect("extract"),
            json!({"label": "curly } brace", "n": 2})
        );
    }

    #[test]
    fn clean_json_round_trips_unchanged() {
        let widget = json!({
            "type": "container",
            "config": {"variant": "tabs"},
            "children": [{"type": "chart", "data": {"points": [{"label": "Jan", "value": 1}]}}]
        });
        let text = serde_json::to_string(&widget).expect("serialize");
        assert_eq!(extract_json(&text).expect("extract"), widget);
        assert_eq!(extract_json_with_repair(&text).expect("extract"), widget);
    }

    #[test]
    fn repair_strips_trailing_comma() {
        assert_eq!(
            extract_json_with_repair(r#"{"a":1,}"#).expect("repair"),
            json!({"a": 1})
        );
        assert!(extract_json(r#"{"a":1,}"#).is_err());
    }

    #[test]
    fn repair_closes_unbalanced_brackets() {
        assert_eq!(
            extract_json_with_repair(r#"{"a":[1,2"#).expect("repair"),
            json!({"a": [1, 2]})
        );
    }

    #[test]
    fn repair_closes_nested_brackets_innermost_first() {
        assert_eq!(
            extract_json_with_repair(r#"{"a":[{"b":1"#).expect("repair"),
            json!({"a": [{"b": 1}]})
        );
    }

    #[test]
    fn repair_recovers_truncated_string() {
        let value = extract_json_with_repair(r#"{"a":"hel"#).expect("repair");
        let text = value["a"].as_str().expect("string value");
        assert!("hel".starts_with(text));
    }

    #[test]
    fn repair_drops_dangling_key() {
        assert_eq!(
            extract_json_with_repair(r#"{"a":1,"b":"#).expect("repair"),
            json!({"a": 1})
        );
        assert_eq!(
            extract_json_with_repair(r#"{"a":{"b":1,"c":tr"#).expect("repair"),
            json!({"a": {"b": 1}})
        );
    }

    #[test]
    fn repair_escapes_interior_quotes() {
        assert_eq!(
            extract_json_with_repair(r#"{"quote": "he said "hi" twice"}"#).expect("repair"),
            json!({"quote": "he said \"hi\" twice"})
        );
    }

    #[test]
    fn repair_leaves_valid_json_untouched() {
        let text = r#"{"a": [1, {"b": "x, ]"}], "c": null}"#;
        assert_eq!(repair_json(text), text);
    }

    #[test]
    fn reports_preview_when_nothing_parses() {
        let text = format!("{}{}", "x".repeat(600), "y".repeat(600));
        let err = extract_json_with_repair(&text).unwrap_err();
        let (head, tail) = err.preview().expect("preview");
        assert_eq!(head.len(), PREVIEW_CHARS);
        assert!(head.chars().all(|c| c == 'x'));
        assert!(tail.chars().all(|c| c == 'y'));
        assert!(err.to_string().contains("1200 chars"));
    }

    #[test]
    fn empty_input_is_reported() {
        assert_eq!(extract_json("  ```json\n```  "), Err(ExtractError::Empty));
    }

    #[test]
    fn bare_array_is_not_an_object() {
        assert!(extract_json("[1, 2, 3]").is_err());
    }
}
