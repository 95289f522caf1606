//! Resumable question-answering run.
//!
//! Per question index `i`, strictly in order:
//! 1. `i` below the checkpoint → skip, touch nothing
//! 2. question text already stored → skip, checkpoint `i + 1`
//! 3. otherwise invoke, append the record, remember the text, checkpoint `i + 1`
//!
//! The record is always durable before the checkpoint moves past it, so a
//! crash can at worst repeat one question, never lose one.

use crate::checkpoint::CheckpointStore;
use crate::client::{CompletionService, Invocation, RetryingInvoker};
use crate::models::{AnswerRecord, Config, Result, RunStats};
use crate::store::ResultStore;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Cooperative stop request, observed between questions.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Cancel, returning true if cancellation had already been requested.
    pub fn interrupt(&self) -> bool {
        self.0.swap(true, Ordering::SeqCst)
    }
}

/// Read-only view of the resumable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub total_questions: usize,
    pub stored_records: usize,
    /// Saved next index, if a run was interrupted
    pub checkpoint: Option<usize>,
    /// Questions whose text has no stored record yet
    pub remaining: usize,
}

impl StatusReport {
    pub fn collect(questions: &[String], store: &ResultStore, checkpoint: &CheckpointStore) -> Self {
        Self {
            total_questions: questions.len(),
            stored_records: store.len(),
            checkpoint: checkpoint.exists().then(|| checkpoint.load()),
            remaining: questions.iter().filter(|q| !store.contains(q.as_str())).count(),
        }
    }
}

/// Drives one run over a question list.
pub struct PipelineController<S> {
    questions: Vec<String>,
    store: ResultStore,
    checkpoint: CheckpointStore,
    invoker: RetryingInvoker<S>,
    inter_question_delay: Duration,
    show_progress: bool,
    cancel: CancelFlag,
    model: Option<String>,
}

impl<S: CompletionService> PipelineController<S> {
    pub fn new(
        questions: Vec<String>,
        store: ResultStore,
        checkpoint: CheckpointStore,
        invoker: RetryingInvoker<S>,
    ) -> Self {
        Self {
            questions,
            store,
            checkpoint,
            invoker,
            inter_question_delay: Duration::ZERO,
            show_progress: false,
            cancel: CancelFlag::new(),
            model: None,
        }
    }

    /// Wire a controller from configuration and an already loaded question list.
    pub fn from_config(config: &Config, questions: Vec<String>, service: S) -> Self {
        let invoker = RetryingInvoker::new(
            service,
            config.retry.clone(),
            config.service.answer_format,
        );

        Self::new(
            questions,
            ResultStore::open(&config.output.results),
            CheckpointStore::new(&config.output.checkpoint),
            invoker,
        )
        .with_inter_question_delay(config.output.inter_question_delay())
        .with_progress(config.output.show_progress)
        .with_model(config.service.model.clone())
    }

    pub fn with_inter_question_delay(mut self, delay: Duration) -> Self {
        self.inter_question_delay = delay;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Model name recorded when the endpoint does not report one.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn status(&self) -> StatusReport {
        StatusReport::collect(&self.questions, &self.store, &self.checkpoint)
    }

    /// Examine every question once, resuming from the checkpoint.
    ///
    /// Returns an error only when the result store or checkpoint cannot be
    /// written; per-question failures are recorded, not raised.
    pub async fn run(&mut self) -> Result<RunStats> {
        let start = Instant::now();
        let total = self.questions.len();
        let resume_from = self.checkpoint.load();

        let mut stats = RunStats {
            total_questions: total,
            ..RunStats::default()
        };

        if resume_from > total {
            warn!(
                resume_from,
                total, "Checkpoint is past the end of the question list"
            );
        }

        info!(
            total_questions = total,
            resume_from,
            existing_records = self.store.len(),
            "Starting run"
        );

        let pb = self.progress_bar(total);
        pb.set_position(resume_from.min(total) as u64);

        for index in 0..total {
            if self.cancel.is_cancelled() {
                stats.cancelled = true;
                warn!(index, "Cancelled, keeping checkpoint for resume");
                break;
            }

            if index < resume_from {
                stats.skipped_by_checkpoint += 1;
                continue;
            }

            let question = &self.questions[index];

            if self.store.contains(question) {
                debug!(index, "Already answered, skipping");
                stats.skipped_by_content += 1;
                self.checkpoint.save(index + 1)?;
                pb.inc(1);
                continue;
            }

            debug!(index, "Asking");
            let invocation = self.invoker.invoke(question).await;
            let record = self.record_for(question, invocation);

            self.store.append(&record)?;
            self.store.remember(question);
            self.checkpoint.save(index + 1)?;

            if let Some(error) = &record.error {
                warn!(index, error = %error, "Recorded failure");
            }
            stats.record(&record);
            pb.inc(1);
            pb.set_message(format!("ok: {}, failed: {}", stats.succeeded, stats.failed));

            if index + 1 < total && !self.inter_question_delay.is_zero() {
                tokio::time::sleep(self.inter_question_delay).await;
            }
        }

        if !stats.cancelled {
            self.checkpoint.clear()?;
        }

        stats.store_total = self.store.len();
        stats.runtime_secs = start.elapsed().as_secs_f64();

        pb.finish_with_message(format!(
            "Done! {} ok, {} failed, {} skipped",
            stats.succeeded,
            stats.failed,
            stats.skipped()
        ));

        info!(
            processed = stats.processed,
            succeeded = stats.succeeded,
            failed = stats.failed,
            raw_responses = stats.raw_responses,
            skipped = stats.skipped(),
            store_total = stats.store_total,
            cancelled = stats.cancelled,
            runtime_secs = stats.runtime_secs,
            "Run finished"
        );

        Ok(stats)
    }

    fn record_for(&self, question: &str, invocation: Invocation) -> AnswerRecord {
        let model = invocation.model.or_else(|| self.model.clone());
        let record =
            AnswerRecord::from_outcome(question, invocation.outcome).with_attempts(invocation.attempts);
        match model {
            Some(model) => record.with_model(model),
            None => record,
        }
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
            .map(|style| style.progress_chars("##-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb
    }
}
