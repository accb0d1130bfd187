//! JSON Extraction
//!
//! Pulls the JSON payload out of raw model output and normalizes the accepted
//! shapes into one canonical collection:
//!
//! ```text
//! [ {...}, {...} ]                      bare array (length must match)
//! { "questions": [...] }                named items field ("items" also accepted)
//! { "quiz": { "questions": [...] } }    wrapped object
//!         │
//!         ▼
//! { "questions": [...], "title"? }      canonical
//! ```

use serde_json::{Map, Value};
use tracing::debug;

/// Primary items field of the canonical shape
pub const ITEMS_FIELD: &str = "questions";

const ITEMS_ALIASES: &[&str] = &["questions", "items"];
const WRAPPER_FIELD: &str = "quiz";

/// Extraction failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("no JSON array or object found in generator output")]
    NoJson,

    #[error("expected exactly {expected} questions but the array contains {actual}")]
    CountMismatch { actual: usize, expected: usize },

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("field '{field}' must be an array, found {found}")]
    NotAnArray { field: String, found: &'static str },
}

/// Canonical, not yet validated collection of items
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateCollection {
    pub title: Option<String>,
    pub items: Vec<Value>,
}

impl CandidateCollection {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Canonical JSON form
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(title) = &self.title {
            map.insert("title".to_string(), Value::String(title.clone()));
        }
        map.insert(ITEMS_FIELD.to_string(), Value::Array(self.items.clone()));
        Value::Object(map)
    }
}

/// Extract a candidate collection from raw text.
///
/// `expected` is the number of items the producing request asked for. A bare
/// array of any other length is rejected immediately so the caller can
/// re-request explicitly; wrapped shapes are accepted at any length and left
/// to the count check.
pub fn extract(text: &str, expected: usize) -> Result<CandidateCollection, ExtractionError> {
    let value = parse_json(text).ok_or(ExtractionError::NoJson)?;
    normalize(value, expected)
}

/// Normalize an already-parsed value
pub fn normalize(value: Value, expected: usize) -> Result<CandidateCollection, ExtractionError> {
    match value {
        Value::Array(items) => {
            if items.len() != expected {
                return Err(ExtractionError::CountMismatch {
                    actual: items.len(),
                    expected,
                });
            }
            Ok(CandidateCollection { title: None, items })
        }
        Value::Object(map) => normalize_object(map),
        other => Err(ExtractionError::NotAnArray {
            field: "<root>".to_string(),
            found: type_name(&other),
        }),
    }
}

fn normalize_object(mut map: Map<String, Value>) -> Result<CandidateCollection, ExtractionError> {
    let title = map
        .get("title")
        .and_then(|t| t.as_str())
        .map(|t| t.to_string());

    for field in ITEMS_ALIASES {
        if let Some(items) = map.remove(*field) {
            return match items {
                Value::Array(items) => Ok(CandidateCollection { title, items }),
                other => Err(ExtractionError::NotAnArray {
                    field: field.to_string(),
                    found: type_name(&other),
                }),
            };
        }
    }

    match map.remove(WRAPPER_FIELD) {
        Some(Value::Object(inner)) => {
            let mut collection = normalize_object(inner)?;
            if collection.title.is_none() {
                collection.title = title;
            }
            Ok(collection)
        }
        Some(Value::Array(items)) => Ok(CandidateCollection { title, items }),
        _ => Err(ExtractionError::MissingField(ITEMS_FIELD.to_string())),
    }
}

/// Parse the whole text, falling back to the first balanced `[...]` / `{...}`
/// substring that is valid JSON.
fn parse_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value @ (Value::Array(_) | Value::Object(_))) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let bytes = trimmed.as_bytes();
    let mut start = 0;
    while let Some(offset) = bytes[start..].iter().position(|b| *b == b'[' || *b == b'{') {
        let open = start + offset;
        if let Some(close) = balanced_end(bytes, open) {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[open..=close]) {
                debug!("Extracted JSON substring at {}..={}", open, close);
                return Some(value);
            }
        }
        start = open + 1;
    }

    None
}

/// Index of the bracket closing the one at `open`, ignoring brackets in strings
fn balanced_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[open..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }

    None
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items(n: usize) -> Vec<Value> {
        (0..n).map(|i| json!({ "question": format!("Q{}", i) })).collect()
    }

    #[test]
    fn test_bare_array_exact_count() {
        let text = serde_json::to_string(&items(3)).unwrap();
        let collection = extract(&text, 3).unwrap();
        assert_eq!(collection.len(), 3);
        assert!(collection.title.is_none());
    }

    #[test]
    fn test_bare_array_count_mismatch_fails_fast() {
        let text = serde_json::to_string(&items(19)).unwrap();
        let err = extract(&text, 20).unwrap_err();
        assert_eq!(
            err,
            ExtractionError::CountMismatch {
                actual: 19,
                expected: 20
            }
        );
        let message = err.to_string();
        assert!(message.contains("19"));
        assert!(message.contains("20"));
    }

    #[test]
    fn test_named_field_any_length() {
        let text = json!({ "title": "Rust", "questions": items(7) }).to_string();
        let collection = extract(&text, 5).unwrap();
        assert_eq!(collection.len(), 7);
        assert_eq!(collection.title.as_deref(), Some("Rust"));

        let text = json!({ "items": items(2) }).to_string();
        assert_eq!(extract(&text, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_wrapped_object() {
        let text = json!({ "quiz": { "title": "T", "questions": items(4) } }).to_string();
        let collection = extract(&text, 4).unwrap();
        assert_eq!(collection.len(), 4);
        assert_eq!(collection.title.as_deref(), Some("T"));
    }

    #[test]
    fn test_missing_items_field() {
        let err = extract(r#"{"title": "nothing here"}"#, 3).unwrap_err();
        assert_eq!(err, ExtractionError::MissingField("questions".to_string()));
    }

    #[test]
    fn test_items_field_not_array() {
        let err = extract(r#"{"questions": "soon"}"#, 3).unwrap_err();
        assert!(matches!(err, ExtractionError::NotAnArray { found: "string", .. }));
    }

    #[test]
    fn test_json_embedded_in_prose() {
        let text = format!(
            "Sure! Here is your quiz:\n```json\n{}\n```\nGood luck {{and}} enjoy.",
            json!({ "questions": items(2) })
        );
        assert_eq!(extract(&text, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_brackets_inside_strings_are_ignored() {
        let text = r#"Output: {"questions": [{"question": "Which is valid: ] or }?"}]} trailing"#;
        let collection = extract(text, 1).unwrap();
        assert_eq!(collection.items[0]["question"], "Which is valid: ] or }?");
    }

    #[test]
    fn test_skips_unparseable_candidates() {
        let text = r#"Note [draft] then {"questions": []}"#;
        assert!(extract(text, 0).unwrap().is_empty());
    }

    #[test]
    fn test_no_json() {
        assert_eq!(extract("I cannot help with that.", 5), Err(ExtractionError::NoJson));
        assert_eq!(extract("", 5), Err(ExtractionError::NoJson));
    }

    #[test]
    fn test_canonical_round_trip_is_stable() {
        let shapes = [
            serde_json::to_string(&items(3)).unwrap(),
            json!({ "title": "T", "items": items(3) }).to_string(),
            json!({ "quiz": { "questions": items(3) } }).to_string(),
        ];

        for text in shapes {
            let first = extract(&text, 3).unwrap();
            let second = extract(&first.to_value().to_string(), 3).unwrap();
            assert_eq!(first, second);
            assert_eq!(first.to_value(), second.to_value());
        }
    }
}
