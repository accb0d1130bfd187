//! Quiz Schema Validation
//!
//! Structural checks on a candidate collection: exact question count, five
//! distinct labelled options per question, and an answer that names one of
//! them. Validation never mutates its input.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::quiz::{AnswerOption, Label, Question, Quiz, OPTION_COUNT};

const BODY_FIELDS: &[&str] = &["question", "body", "text"];
const OPTION_FIELDS: &[&str] = &["options", "choices"];
const ANSWER_FIELDS: &[&str] = &["answer", "correct_answer", "correct"];

/// "A) text", "b. text", "(C) text", "D: text"
static LABEL_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\(?([A-Ea-e])[).:]\s+(.+)$").expect("valid label prefix regex"));

/// Why a collection was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("expected exactly {expected} questions, got {actual}")]
    CountMismatch { actual: usize, expected: usize },

    #[error("question {}: {}", .index + 1, .reason)]
    ItemShape { index: usize, reason: String },
}

impl ValidationError {
    pub fn is_count_mismatch(&self) -> bool {
        matches!(self, Self::CountMismatch { .. })
    }

    fn shape(index: usize, reason: impl Into<String>) -> Self {
        Self::ItemShape {
            index,
            reason: reason.into(),
        }
    }
}

/// Validate `items` against the exact `target` count and per-question shape
pub fn validate(
    topic: &str,
    items: &[Value],
    target: usize,
    attempts: u32,
) -> Result<Quiz, ValidationError> {
    if items.len() != target {
        return Err(ValidationError::CountMismatch {
            actual: items.len(),
            expected: target,
        });
    }

    let questions = items
        .iter()
        .enumerate()
        .map(|(index, item)| validate_item(index, item))
        .collect::<Result<Vec<_>, _>>()?;

    Quiz::new(topic, questions, target, attempts).map_err(|actual| {
        ValidationError::CountMismatch {
            actual,
            expected: target,
        }
    })
}

/// Validate a single question value
pub fn validate_item(index: usize, item: &Value) -> Result<Question, ValidationError> {
    let obj = item
        .as_object()
        .ok_or_else(|| ValidationError::shape(index, "expected an object"))?;

    let body = first_str(obj, BODY_FIELDS)
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .ok_or_else(|| ValidationError::shape(index, "missing question text"))?
        .to_string();

    let raw_options = first_value(obj, OPTION_FIELDS)
        .ok_or_else(|| ValidationError::shape(index, "missing options"))?;
    let options = parse_options(raw_options).map_err(|reason| ValidationError::shape(index, reason))?;
    check_options(&options).map_err(|reason| ValidationError::shape(index, reason))?;

    let answer_raw = first_str(obj, ANSWER_FIELDS)
        .ok_or_else(|| ValidationError::shape(index, "missing designated answer"))?;
    let answer = resolve_answer(answer_raw, &options).ok_or_else(|| {
        ValidationError::shape(
            index,
            format!("answer '{}' does not match any option label", answer_raw.trim()),
        )
    })?;

    let explanation = obj
        .get("explanation")
        .and_then(|e| e.as_str())
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());

    Ok(Question {
        body,
        options,
        answer,
        explanation,
    })
}

fn first_value<'a>(obj: &'a Map<String, Value>, fields: &[&str]) -> Option<&'a Value> {
    fields.iter().find_map(|f| obj.get(*f))
}

fn first_str<'a>(obj: &'a Map<String, Value>, fields: &[&str]) -> Option<&'a str> {
    first_value(obj, fields).and_then(|v| v.as_str())
}

/// Accepts a positional string array, an array of `{label, text}` objects, or
/// a label → text map. Options come back sorted by label.
fn parse_options(raw: &Value) -> Result<Vec<AnswerOption>, String> {
    let mut options = match raw {
        Value::Array(entries) => {
            if entries.len() != OPTION_COUNT {
                return Err(format!(
                    "expected exactly {} options, got {}",
                    OPTION_COUNT,
                    entries.len()
                ));
            }
            entries
                .iter()
                .enumerate()
                .map(|(pos, entry)| parse_array_option(pos, entry))
                .collect::<Result<Vec<_>, _>>()?
        }
        Value::Object(map) => {
            if map.len() != OPTION_COUNT {
                return Err(format!(
                    "expected exactly {} options, got {}",
                    OPTION_COUNT,
                    map.len()
                ));
            }
            map.iter()
                .map(|(label, text)| -> Result<AnswerOption, String> {
                    let label = label.parse::<Label>()?;
                    let text = text
                        .as_str()
                        .ok_or_else(|| format!("option {} must be a string", label))?;
                    Ok(AnswerOption {
                        label,
                        text: text.trim().to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?
        }
        _ => return Err("options must be an array or an object".to_string()),
    };

    options.sort_by_key(|o| o.label);
    Ok(options)
}

fn parse_array_option(pos: usize, entry: &Value) -> Result<AnswerOption, String> {
    let positional = Label::from_index(pos).ok_or_else(|| "too many options".to_string())?;

    match entry {
        Value::String(text) => {
            // Strip a redundant "A) " prefix only when it agrees with the position
            let text = match LABEL_PREFIX.captures(text) {
                Some(caps) if caps[1].parse::<Label>().ok() == Some(positional) => {
                    caps[2].trim().to_string()
                }
                _ => text.trim().to_string(),
            };
            Ok(AnswerOption {
                label: positional,
                text,
            })
        }
        Value::Object(obj) => {
            let label = match obj.get("label").and_then(|l| l.as_str()) {
                Some(l) => l.parse::<Label>()?,
                None => positional,
            };
            let text = obj
                .get("text")
                .and_then(|t| t.as_str())
                .ok_or_else(|| format!("option {} is missing text", label))?;
            Ok(AnswerOption {
                label,
                text: text.trim().to_string(),
            })
        }
        _ => Err(format!("option {} must be a string or object", positional)),
    }
}

fn check_options(options: &[AnswerOption]) -> Result<(), String> {
    let labels: HashSet<Label> = options.iter().map(|o| o.label).collect();
    if labels.len() != OPTION_COUNT {
        return Err("option labels must be A, B, C, D and E, each used once".to_string());
    }

    let mut seen = HashSet::new();
    for option in options {
        if option.text.is_empty() {
            return Err(format!("option {} is empty", option.label));
        }
        if !seen.insert(option.text.to_lowercase()) {
            return Err(format!("option {} duplicates another option", option.label));
        }
    }

    Ok(())
}

/// The answer may be given as a label or as the exact text of an option
fn resolve_answer(raw: &str, options: &[AnswerOption]) -> Option<Label> {
    if let Ok(label) = raw.parse::<Label>() {
        return Some(label);
    }

    let wanted = raw.trim().to_lowercase();
    options
        .iter()
        .find(|o| o.text.to_lowercase() == wanted)
        .map(|o| o.label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn good_item(n: usize) -> Value {
        json!({
            "question": format!("Question {}?", n),
            "options": ["alpha", "beta", "gamma", "delta", "epsilon"],
            "answer": "C",
            "explanation": "Because."
        })
    }

    #[test]
    fn test_valid_collection() {
        let items: Vec<_> = (0..3).map(good_item).collect();
        let quiz = validate("greek", &items, 3, 1).unwrap();
        assert_eq!(quiz.len(), 3);
        assert_eq!(quiz.questions[0].answer, Label::C);
        assert_eq!(quiz.questions[0].correct_option().unwrap().text, "gamma");
        assert_eq!(quiz.metadata.attempts, 1);
    }

    #[test]
    fn test_count_mismatch_is_distinguished() {
        let items: Vec<_> = (0..2).map(good_item).collect();
        let err = validate("greek", &items, 3, 1).unwrap_err();
        assert!(err.is_count_mismatch());
        assert_eq!(err.to_string(), "expected exactly 3 questions, got 2");
    }

    #[test]
    fn test_wrong_option_count() {
        let mut item = good_item(0);
        item["options"] = json!(["a", "b", "c", "d"]);
        let err = validate("t", &[item], 1, 1).unwrap_err();
        assert!(!err.is_count_mismatch());
        assert!(err.to_string().contains("expected exactly 5 options, got 4"));
    }

    #[test]
    fn test_duplicate_option_text() {
        let mut item = good_item(0);
        item["options"] = json!(["a", "b", "c", "d", "A"]);
        let err = validate_item(4, &item).unwrap_err();
        assert_eq!(
            err,
            ValidationError::ItemShape {
                index: 4,
                reason: "option E duplicates another option".to_string()
            }
        );
        assert!(err.to_string().starts_with("question 5:"));
    }

    #[test]
    fn test_answer_outside_label_set() {
        let mut item = good_item(0);
        item["answer"] = json!("F");
        let err = validate_item(0, &item).unwrap_err();
        assert!(err.to_string().contains("does not match any option label"));
    }

    #[test]
    fn test_answer_given_as_option_text() {
        let mut item = good_item(0);
        item["correct_answer"] = json!("Delta");
        item.as_object_mut().unwrap().remove("answer");
        assert_eq!(validate_item(0, &item).unwrap().answer, Label::D);
    }

    #[test]
    fn test_prefixed_string_options_are_stripped() {
        let item = json!({
            "question": "Pick one",
            "options": ["A) one", "B) two", "C) three", "D) four", "E) five"],
            "answer": "B"
        });
        let question = validate_item(0, &item).unwrap();
        assert_eq!(question.options[1].text, "two");
        assert_eq!(question.options[4].label, Label::E);
    }

    #[test]
    fn test_object_options_sorted_by_label() {
        let item = json!({
            "question": "Pick one",
            "options": { "E": "five", "A": "one", "C": "three", "B": "two", "D": "four" },
            "answer": "a"
        });
        let question = validate_item(0, &item).unwrap();
        let labels: Vec<_> = question.options.iter().map(|o| o.label).collect();
        assert_eq!(labels, Label::ALL.to_vec());
        assert_eq!(question.options[0].text, "one");
    }

    #[test]
    fn test_labelled_object_options_require_full_set() {
        let item = json!({
            "question": "Pick one",
            "options": [
                { "label": "A", "text": "one" },
                { "label": "A", "text": "two" },
                { "label": "C", "text": "three" },
                { "label": "D", "text": "four" },
                { "label": "E", "text": "five" }
            ],
            "answer": "A"
        });
        let err = validate_item(0, &item).unwrap_err();
        assert!(err.to_string().contains("each used once"));
    }

    #[test]
    fn test_missing_question_text() {
        let mut item = good_item(0);
        item["question"] = json!("   ");
        assert!(validate_item(0, &item)
            .unwrap_err()
            .to_string()
            .contains("missing question text"));
        assert!(validate_item(0, &json!("just a string")).is_err());
    }

    #[test]
    fn test_validation_is_deterministic() {
        let items: Vec<_> = (0..2).map(good_item).collect();
        let first = validate("t", &items, 2, 1).unwrap();
        let second = validate("t", &items, 2, 1).unwrap();
        assert_eq!(first.questions, second.questions);
    }
}
