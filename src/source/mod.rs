//! Question list input.

mod questions;

pub use questions::*;
