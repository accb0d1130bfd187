//! Quiz Domain Types
//!
//! Requests, validated questions and the exact-count quiz collection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Number of answer options every question carries
pub const OPTION_COUNT: usize = 5;

/// Upper bound on topic length (characters)
pub const MAX_TOPIC_CHARS: usize = 500;

/// Option label (A-E)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    A,
    B,
    C,
    D,
    E,
}

impl Label {
    pub const ALL: [Label; OPTION_COUNT] = [Label::A, Label::B, Label::C, Label::D, Label::E];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::A => "A",
            Label::B => "B",
            Label::C => "C",
            Label::D => "D",
            Label::E => "E",
        }
    }

    /// Label for a zero-based option position
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = String;

    /// Accepts `A`, `a`, `A)`, `A.` and `(A)`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned = s
            .trim()
            .trim_start_matches('(')
            .trim_end_matches([')', '.', ':']);
        match cleaned.to_ascii_uppercase().as_str() {
            "A" => Ok(Label::A),
            "B" => Ok(Label::B),
            "C" => Ok(Label::C),
            "D" => Ok(Label::D),
            "E" => Ok(Label::E),
            _ => Err(format!("'{}' is not one of A-E", s.trim())),
        }
    }
}

/// A labelled answer choice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub label: Label,
    pub text: String,
}

/// A structurally valid multiple-choice question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Question text
    #[serde(rename = "question")]
    pub body: String,
    /// Exactly five options, labelled A-E in order
    pub options: Vec<AnswerOption>,
    /// Label of the correct option
    pub answer: Label,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl Question {
    pub fn correct_option(&self) -> Option<&AnswerOption> {
        self.options.iter().find(|o| o.label == self.answer)
    }
}

/// Parameters of one generation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub topic: String,
    pub target_count: usize,
    pub max_attempts: u32,
}

impl GenerationRequest {
    /// Build a request, rejecting inputs no amount of retrying can satisfy
    pub fn new(
        topic: impl Into<String>,
        target_count: usize,
        max_attempts: u32,
    ) -> Result<Self, InvalidRequest> {
        let topic = topic.into().trim().to_string();

        if topic.is_empty() {
            return Err(InvalidRequest::EmptyTopic);
        }
        let chars = topic.chars().count();
        if chars > MAX_TOPIC_CHARS {
            return Err(InvalidRequest::TopicTooLong {
                chars,
                max: MAX_TOPIC_CHARS,
            });
        }
        if target_count == 0 {
            return Err(InvalidRequest::ZeroCount);
        }
        if max_attempts == 0 {
            return Err(InvalidRequest::ZeroAttempts);
        }

        Ok(Self {
            topic,
            target_count,
            max_attempts,
        })
    }
}

/// Rejected generation request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidRequest {
    #[error("topic must not be empty")]
    EmptyTopic,

    #[error("topic is {chars} characters, limit is {max}")]
    TopicTooLong { chars: usize, max: usize },

    #[error("question count must be greater than zero")]
    ZeroCount,

    #[error("question count {requested} exceeds the limit of {max}")]
    TooManyQuestions { requested: usize, max: usize },

    #[error("max attempts must be greater than zero")]
    ZeroAttempts,

    #[error("max attempts {requested} exceeds the limit of {max}")]
    TooManyAttempts { requested: u32, max: u32 },
}

/// Run metadata attached to a validated quiz
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizMetadata {
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub source: String,
}

/// Validated collection holding exactly the requested number of questions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub id: String,
    pub topic: String,
    pub questions: Vec<Question>,
    pub metadata: QuizMetadata,
}

impl Quiz {
    /// Construct a quiz; fails unless `questions.len() == target`
    pub fn new(
        topic: &str,
        questions: Vec<Question>,
        target: usize,
        attempts: u32,
    ) -> Result<Self, usize> {
        if questions.len() != target {
            return Err(questions.len());
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            questions,
            metadata: QuizMetadata {
                created_at: Utc::now(),
                attempts,
                source: "llm_generation".to_string(),
            },
        })
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}
