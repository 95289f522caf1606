//! Core data models for askbatch.
//!
//! - `config`: the explicit run configuration
//! - `error`: fatal and per-call error taxonomy
//! - `record`: persisted records, invocation outcomes, run statistics

mod config;
mod error;
mod record;

pub use config::*;
pub use error::*;
pub use record::*;
