//! JSON parsing helpers for AI backend responses
//!
//! Models asked for JSON still wrap it in markdown fences, answer with a
//! one-element list, or add chatter around the object. These helpers reduce
//! a raw response to a single JSON object.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::normalize::truncate_text;

fn fence_re() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*(.*?)\s*```$").expect("valid regex"))
}

/// Remove a surrounding markdown code fence, if any
pub fn strip_code_fences(response: &str) -> &str {
    let trimmed = response.trim();
    match fence_re().captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => trimmed,
    }
}

/// Parse a model response into a JSON value
///
/// Tries the whole (fence-stripped) text first, then the outermost `{...}`
/// or `[...]` span inside it.
pub fn extract_json_value(response: &str) -> Result<Value> {
    let body = strip_code_fences(response);
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return Ok(value);
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(s), Some(e)) = (body.find(open), body.rfind(close)) {
            if s < e {
                if let Ok(value) = serde_json::from_str::<Value>(&body[s..=e]) {
                    return Ok(value);
                }
            }
        }
    }

    Err(Error::InvalidData(format!(
        "No JSON found in AI response | Raw: {}",
        truncate_text(body, 200)
    )))
}

/// Reduce a parsed value to one object: lists yield their first element
pub fn first_object(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Array(items) => match items.into_iter().next() {
            Some(Value::Object(map)) => Ok(map),
            Some(other) => Err(Error::InvalidData(format!(
                "Expected JSON object in list, got {}",
                kind_of(&other)
            ))),
            None => Err(Error::InvalidData("Empty JSON list from AI".into())),
        },
        other => Err(Error::InvalidData(format!(
            "Expected JSON object, got {}",
            kind_of(&other)
        ))),
    }
}

/// Parse a model response straight to a single JSON object
pub fn parse_json_object(response: &str) -> Result<Map<String, Value>> {
    first_object(extract_json_value(response)?)
}

/// Read an optional string field; `null`, `""`, `"None"` and `"null"` are absent
pub fn optional_string(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s.eq_ignore_ascii_case("null") || s == "None" {
                None
            } else {
                Some(s.to_string())
            }
        }
        Value::Null => None,
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_with_chatter() {
        let value =
            extract_json_value("Here you go: {\"fs\": \"Balance Sheet\"} hope this helps").unwrap();
        assert_eq!(value["fs"], "Balance Sheet");
    }

    #[test]
    fn test_extract_no_json() {
        let err = extract_json_value("I cannot classify that").unwrap_err();
        assert!(err.to_string().contains("No JSON found"));
    }

    #[test]
    fn test_first_object_from_list() {
        let map = parse_json_object("[{\"fs\": \"Profit & Loss\"}, {\"fs\": \"x\"}]").unwrap();
        assert_eq!(map["fs"], "Profit & Loss");
    }

    #[test]
    fn test_first_object_rejects_empty_list_and_scalars() {
        assert!(parse_json_object("[]").is_err());
        assert!(parse_json_object("[1, 2]").is_err());
        assert!(parse_json_object("\"text\"").is_err());
    }

    #[test]
    fn test_optional_string_null_like() {
        let map = parse_json_object(
            r#"{"a": null, "b": "", "c": "None", "d": "null", "e": " Current Assets "}"#,
        )
        .unwrap();
        assert_eq!(optional_string(&map, "a"), None);
        assert_eq!(optional_string(&map, "b"), None);
        assert_eq!(optional_string(&map, "c"), None);
        assert_eq!(optional_string(&map, "d"), None);
        assert_eq!(optional_string(&map, "e").as_deref(), Some("Current Assets"));
        assert_eq!(optional_string(&map, "missing"), None);
    }
}
