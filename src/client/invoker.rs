//! Bounded-retry wrapper around one completion call.
//!
//! The invoker never returns an error: every failure ends up as an
//! `Outcome::Failure` or `Outcome::MalformedPayload`.
//!
//! Policy per failure kind:
//! - auth: give up immediately
//! - malformed payload: keep the raw text, no retry
//! - rate limit: fixed cooldown, then retry
//! - transient / unknown: short delay (optionally linear), then retry
//!
//! Before every wait the cumulative wait for this question is checked
//! against the ceiling; a wait that would cross it ends the question.

use super::CompletionService;
use crate::models::{AnswerFormat, FailureKind, Outcome, RetryConfig, ServiceError};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of one question plus how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub outcome: Outcome,
    /// Service calls made
    pub attempts: u32,
    /// Total time spent in backoff
    pub waited: Duration,
    /// Model reported by the endpoint on success
    pub model: Option<String>,
}

impl Invocation {
    fn finished(outcome: Outcome, attempts: u32, waited: Duration) -> Self {
        Self {
            outcome,
            attempts,
            waited,
            model: None,
        }
    }
}

/// Retry policy around a `CompletionService`.
pub struct RetryingInvoker<S> {
    service: S,
    retry: RetryConfig,
    answer_format: AnswerFormat,
}

impl<S: CompletionService> RetryingInvoker<S> {
    pub fn new(service: S, retry: RetryConfig, answer_format: AnswerFormat) -> Self {
        Self {
            service,
            retry,
            answer_format,
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Ask `question`, retrying per policy. Always returns an outcome.
    pub async fn invoke(&self, question: &str) -> Invocation {
        let max_attempts = self.retry.max_retries.max(1);
        let ceiling = self.retry.max_total_wait();
        let mut waited = Duration::ZERO;
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=max_attempts {
            let err = match self.service.complete(question).await {
                Ok(completion) => {
                    debug!(attempt, "Service answered");
                    return Invocation {
                        outcome: parse_answer(self.answer_format, completion.content),
                        attempts: attempt,
                        waited,
                        model: completion.model,
                    };
                }
                Err(err) => err,
            };

            let kind = err.kind();

            if let ServiceError::Malformed { raw } = err {
                warn!(attempt, "Unparseable response, keeping raw payload");
                return Invocation::finished(Outcome::MalformedPayload { raw }, attempt, waited);
            }

            if !kind.is_retryable() {
                warn!(attempt, kind = %kind, error = %err, "Non-retryable failure");
                return Invocation::finished(Outcome::failure(kind, err.to_string()), attempt, waited);
            }

            last_error = err.to_string();
            if attempt == max_attempts {
                break;
            }

            let delay = self.retry.delay_for(kind, attempt);
            if waited.saturating_add(delay) > ceiling {
                warn!(
                    attempt,
                    waited_secs = waited.as_secs_f64(),
                    ceiling_secs = ceiling.as_secs_f64(),
                    "Next wait would exceed the ceiling, giving up"
                );
                let message = format!(
                    "gave up after {:.1}s of cumulative waiting: {last_error}",
                    waited.as_secs_f64()
                );
                return Invocation::finished(
                    Outcome::failure(FailureKind::WaitCeiling, message),
                    attempt,
                    waited,
                );
            }

            warn!(
                attempt,
                max_attempts,
                kind = %kind,
                wait_secs = delay.as_secs_f64(),
                error = %last_error,
                "Retrying"
            );
            tokio::time::sleep(delay).await;
            waited = waited.saturating_add(delay);
        }

        let message = format!("failed after {max_attempts} attempts: {last_error}");
        Invocation::finished(
            Outcome::failure(FailureKind::Exhausted, message),
            max_attempts,
            waited,
        )
    }
}

/// Turn completion content into an outcome according to `format`.
pub fn parse_answer(format: AnswerFormat, content: String) -> Outcome {
    match format {
        AnswerFormat::Plain => Outcome::Success { answer: content },
        AnswerFormat::Json => match json_answer(&content) {
            Some(answer) => Outcome::Success { answer },
            None => Outcome::MalformedPayload { raw: content },
        },
    }
}

/// `answer` field of a JSON object payload.
fn json_answer(content: &str) -> Option<String> {
    let body = strip_code_fence(content);
    let value: Value = serde_json::from_str(body)
        .or_else(|_| serde_json::from_str(&repair_escapes(body)))
        .ok()?;

    match value.get("answer")? {
        Value::String(answer) => Some(answer.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Drop a surrounding ```json fence if the model added one.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Escape backslashes that do not start a valid JSON escape (e.g. LaTeX `\sqrt`).
fn repair_escapes(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&next) if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') => {
                out.push('\\');
                out.push(next);
                chars.next();
            }
            _ => out.push_str("\\\\"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Completion;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Service that replays a script and then repeats its fallback.
    struct Scripted {
        script: Mutex<VecDeque<Result<Completion, ServiceError>>>,
        fallback: fn() -> Result<Completion, ServiceError>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(
            script: Vec<Result<Completion, ServiceError>>,
            fallback: fn() -> Result<Completion, ServiceError>,
        ) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: AtomicU32::new(0),
            }
        }

        fn always(fallback: fn() -> Result<Completion, ServiceError>) -> Self {
            Self::new(Vec::new(), fallback)
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CompletionService for Scripted {
        async fn complete(&self, _question: &str) -> Result<Completion, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(self.fallback)
        }
    }

    fn network() -> Result<Completion, ServiceError> {
        Err(ServiceError::Network("connection reset".to_string()))
    }

    fn rate_limited() -> Result<Completion, ServiceError> {
        Err(ServiceError::RateLimited("429".to_string()))
    }

    fn auth() -> Result<Completion, ServiceError> {
        Err(ServiceError::Auth("invalid key".to_string()))
    }

    fn ok() -> Result<Completion, ServiceError> {
        Ok(Completion::new("4"))
    }

    fn retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            ..RetryConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_attempt() {
        let invoker = RetryingInvoker::new(Scripted::always(ok), retry(3), AnswerFormat::Plain);
        let result = invoker.invoke("2+2=?").await;
        assert_eq!(result.outcome, Outcome::Success { answer: "4".to_string() });
        assert_eq!(result.attempts, 1);
        assert_eq!(result.waited, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_short_circuits() {
        let invoker = RetryingInvoker::new(Scripted::always(auth), retry(5), AnswerFormat::Plain);
        let start = tokio::time::Instant::now();
        let result = invoker.invoke("q").await;

        assert!(matches!(result.outcome, Outcome::Failure { kind: FailureKind::Auth, .. }));
        assert_eq!(result.attempts, 1);
        assert_eq!(invoker.service().calls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhausts_attempts() {
        let invoker = RetryingInvoker::new(Scripted::always(network), retry(3), AnswerFormat::Plain);
        let start = tokio::time::Instant::now();
        let result = invoker.invoke("q").await;

        match &result.outcome {
            Outcome::Failure { kind, message } => {
                assert_eq!(*kind, FailureKind::Exhausted);
                assert!(message.contains("connection reset"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(invoker.service().calls(), 3);
        // Two waits between three attempts, none after the last.
        assert_eq!(result.waited, Duration::from_secs(4));
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient() {
        let service = Scripted::new(vec![network(), network()], ok);
        let invoker = RetryingInvoker::new(service, retry(3), AnswerFormat::Plain);
        let result = invoker.invoke("q").await;
        assert!(result.outcome.is_success());
        assert_eq!(result.attempts, 3);
        assert_eq!(result.waited, Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_uses_cooldown() {
        let service = Scripted::new(vec![rate_limited()], ok);
        let invoker = RetryingInvoker::new(service, retry(3), AnswerFormat::Plain);
        let result = invoker.invoke("q").await;
        assert!(result.outcome.is_success());
        assert_eq!(result.waited, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ceiling_stops_retries() {
        // 10 attempts of 10s cooldown would need 90s; the ceiling is 60s.
        let invoker = RetryingInvoker::new(Scripted::always(rate_limited), retry(10), AnswerFormat::Plain);
        let start = tokio::time::Instant::now();
        let result = invoker.invoke("q").await;

        match &result.outcome {
            Outcome::Failure { kind, message } => {
                assert_eq!(*kind, FailureKind::WaitCeiling);
                assert!(message.contains("60.0s"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(result.waited, Duration::from_secs(60));
        assert_eq!(invoker.service().calls(), 7);
        assert!(start.elapsed() <= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_backoff() {
        let config = RetryConfig {
            max_retries: 4,
            linear_backoff: true,
            ..RetryConfig::default()
        };
        let invoker = RetryingInvoker::new(Scripted::always(network), config, AnswerFormat::Plain);
        let result = invoker.invoke("q").await;
        // 2s + 4s + 6s
        assert_eq!(result.waited, Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_is_retried() {
        let service = Scripted::new(vec![Err(ServiceError::Unknown("odd".into()))], ok);
        let invoker = RetryingInvoker::new(service, retry(3), AnswerFormat::Plain);
        let result = invoker.invoke("q").await;
        assert!(result.outcome.is_success());
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_service_payload_not_retried() {
        fn malformed() -> Result<Completion, ServiceError> {
            Err(ServiceError::Malformed { raw: "<html>".to_string() })
        }
        let invoker = RetryingInvoker::new(Scripted::always(malformed), retry(3), AnswerFormat::Plain);
        let result = invoker.invoke("q").await;
        assert_eq!(result.outcome, Outcome::MalformedPayload { raw: "<html>".to_string() });
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_json_answer_format() {
        fn json() -> Result<Completion, ServiceError> {
            Ok(Completion::new(r#"{"question": "2+2=?", "answer": "4"}"#))
        }
        fn garbage() -> Result<Completion, ServiceError> {
            Ok(Completion::new("The answer is 4"))
        }

        let invoker = RetryingInvoker::new(Scripted::always(json), retry(3), AnswerFormat::Json);
        assert_eq!(invoker.invoke("q").await.outcome, Outcome::Success { answer: "4".into() });

        let invoker = RetryingInvoker::new(Scripted::always(garbage), retry(3), AnswerFormat::Json);
        let result = invoker.invoke("q").await;
        assert_eq!(result.outcome, Outcome::MalformedPayload { raw: "The answer is 4".into() });
        assert_eq!(invoker.service().calls(), 1);
    }

    #[test]
    fn test_json_answer_repairs_latex() {
        let content = r#"{"answer": "\sqrt{2}"}"#;
        assert_eq!(json_answer(content).as_deref(), Some(r"\sqrt{2}"));
    }

    #[test]
    fn test_json_answer_fenced() {
        let content = "```json\n{\"answer\": 42}\n```";
        assert_eq!(json_answer(content).as_deref(), Some("42"));
    }

    #[test]
    fn test_json_answer_missing_field() {
        assert_eq!(json_answer(r#"{"question": "q"}"#), None);
        assert_eq!(json_answer(r#"["answer"]"#), None);
    }
}
