//! Record and outcome types for askbatch.
//!
//! An `Outcome` is what one invocation produced; an `AnswerRecord` is what
//! gets persisted. Records are append-only and never edited in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure classification for a single question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Credential rejected; never retried
    Auth,
    /// Endpoint asked us to slow down
    RateLimit,
    /// Network, timeout or server-side error
    Transient,
    /// Call succeeded but the payload could not be parsed
    Malformed,
    /// Anything unclassified; retried like a transient failure
    Unknown,
    /// All attempts used without success
    Exhausted,
    /// Waiting again would exceed the cumulative wait ceiling
    WaitCeiling,
}

impl FailureKind {
    /// Stable label stored in the record's `error` field.
    pub fn label(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::RateLimit => "rate limit",
            Self::Transient => "transient",
            Self::Malformed => "malformed",
            Self::Unknown => "unknown",
            Self::Exhausted => "retry exhausted",
            Self::WaitCeiling => "wait ceiling exceeded",
        }
    }

    /// Whether the invoker should try again after this failure.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimit | Self::Transient | Self::Unknown)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Typed result of invoking the service for one question.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Parsed answer
    Success { answer: String },
    /// Service answered but the payload failed structural parsing
    MalformedPayload { raw: String },
    /// No usable answer
    Failure { kind: FailureKind, message: String },
}

impl Outcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// One persisted entry in the result collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    /// Question text; the dedup key
    pub question: String,

    /// Answer text (empty on failure)
    #[serde(default)]
    pub answer: String,

    /// Creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Failure label, present only on error records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// True when `answer` holds unparsed service output
    #[serde(default, alias = "rawResponse", skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<bool>,

    /// Last observed failure message, present only on error records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// Service calls made for this question
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    /// Model that produced the answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl AnswerRecord {
    /// Plain answered record.
    pub fn answered(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            timestamp: Some(Utc::now()),
            error: None,
            detail: None,
            raw_response: None,
            attempts: None,
            model: None,
        }
    }

    /// Build the record for an invocation outcome.
    pub fn from_outcome(question: impl Into<String>, outcome: Outcome) -> Self {
        let mut record = Self::answered(question, String::new());
        match outcome {
            Outcome::Success { answer } => record.answer = answer,
            Outcome::MalformedPayload { raw } => {
                record.answer = raw;
                record.raw_response = Some(true);
            }
            Outcome::Failure { kind, message } => {
                record.error = Some(kind.label().to_string());
                if !message.is_empty() {
                    record.detail = Some(message);
                }
            }
        }
        record
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_raw(&self) -> bool {
        self.raw_response.unwrap_or(false)
    }
}

/// Counters for one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Questions in the source
    pub total_questions: usize,

    /// Questions sent to the service this run
    pub processed: usize,

    /// Processed with a parsed answer
    pub succeeded: usize,

    /// Processed but recorded as failures
    pub failed: usize,

    /// Processed with an unparsed payload kept as the answer
    pub raw_responses: usize,

    /// Skipped because the checkpoint was already past them
    pub skipped_by_checkpoint: usize,

    /// Skipped because the store already had their text
    pub skipped_by_content: usize,

    /// Records in the store when the run ended
    pub store_total: usize,

    /// Run stopped early by cancellation
    pub cancelled: bool,

    /// Wall time in seconds
    pub runtime_secs: f64,
}

impl RunStats {
    pub fn skipped(&self) -> usize {
        self.skipped_by_checkpoint + self.skipped_by_content
    }

    /// Tally one processed record.
    pub fn record(&mut self, record: &AnswerRecord) {
        self.processed += 1;
        if record.is_error() {
            self.failed += 1;
        } else if record.is_raw() {
            self.raw_responses += 1;
        } else {
            self.succeeded += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_record_serializes_label() {
        let record = AnswerRecord::from_outcome(
            "2+2=?",
            Outcome::failure(FailureKind::Exhausted, "network down"),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["question"], "2+2=?");
        assert_eq!(json["answer"], "");
        assert_eq!(json["error"], "retry exhausted");
        assert_eq!(json["detail"], "network down");
        assert!(json.get("raw_response").is_none());
    }

    #[test]
    fn test_malformed_record_keeps_raw() {
        let record = AnswerRecord::from_outcome(
            "q",
            Outcome::MalformedPayload {
                raw: "{not json".to_string(),
            },
        );
        assert!(record.is_raw());
        assert!(!record.is_error());
        assert_eq!(record.answer, "{not json");
    }

    #[test]
    fn test_minimal_record_deserializes() {
        let record: AnswerRecord =
            serde_json::from_str(r#"{"question": "2+2=?", "answer": "4", "extra": 1}"#).unwrap();
        assert_eq!(record.answer, "4");
        assert!(record.timestamp.is_none());
        assert!(!record.is_error());
    }

    #[test]
    fn test_stats_tally() {
        let mut stats = RunStats::default();
        stats.record(&AnswerRecord::answered("a", "1"));
        stats.record(&AnswerRecord::from_outcome("b", Outcome::failure(FailureKind::Auth, "")));
        stats.record(&AnswerRecord::from_outcome(
            "c",
            Outcome::MalformedPayload { raw: "x".into() },
        ));
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.raw_responses, 1);
    }
}
