//! askbatch - Resumable batch question answering against an LLM endpoint.
//!
//! ## Architecture
//!
//! A fixed list of questions is sent, one at a time, to an
//! OpenAI-compatible chat completion endpoint. Every answer (or classified
//! failure) is appended to a JSON result file, and a checkpoint records how
//! far the run got.
//!
//! - **QuestionSource**: ordered, restartable question list (CSV or lines)
//! - **RetryingInvoker**: one question → one typed `Outcome`, bounded retries
//! - **ResultStore**: append-only JSON array, atomic rewrite on every append
//! - **CheckpointStore**: next index to examine, atomic overwrite
//! - **PipelineController**: checkpoint skip → content skip → process
//!
//! ## Resume guarantees
//!
//! - A record is durable before the checkpoint moves past its question
//! - Re-running a finished list makes zero service calls
//! - Questions already in the result file are never asked again

pub mod checkpoint;
pub mod client;
pub mod models;
pub mod pipeline;
pub mod source;
pub mod store;

// Re-exports for convenience
pub use checkpoint::CheckpointStore;
pub use client::{Completion, CompletionService, Invocation, LlmClient, RetryingInvoker};
pub use models::{AnswerRecord, AskbatchError, Config, FailureKind, Outcome, Result, RunStats};
pub use pipeline::{CancelFlag, PipelineController, StatusReport};
pub use source::QuestionSource;
pub use store::ResultStore;
