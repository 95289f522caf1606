//! Completion service client and retry policy.

mod invoker;
mod llm_client;

pub use invoker::*;
pub use llm_client::*;
