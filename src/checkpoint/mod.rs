//! Checkpoint module for resumable pipeline execution.
//!
//! Provides:
//! - `CheckpointStore`: persistence of the next question index
//! - `write_json_atomic`: write-then-rename used by every durable file

mod atomic;
mod state;

pub use atomic::*;
pub use state::*;
