//! Pipeline module.

mod controller;

pub use controller::*;
