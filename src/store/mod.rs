//! Result persistence.

mod results;

pub use results::*;
