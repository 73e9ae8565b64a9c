//! Crucible CI Core
//!
//! Core domain types and pure logic for Crucible CI: dependency
//! declarations, environment assembly, test command construction, and
//! the pipeline job model. This crate has minimal dependencies and
//! executes nothing; process spawning lives in `crucible-runner`.

pub mod deps;
pub mod env;
pub mod error;
pub mod invoke;
pub mod job;
pub mod platform;

pub use error::{Error, Result};
