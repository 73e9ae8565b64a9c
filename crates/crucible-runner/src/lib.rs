//! Crucible CI job execution engine.
//!
//! Resolves the declared dependency set to installed roots, assembles
//! the build/test environment once per run, and executes the pipeline
//! job table with per-job timeout and retry control.

pub mod executor;
pub mod locator;
pub mod pipeline;

pub use executor::{ExecutorConfig, JobExecutor, JobReport, OutputLine, OutputStream};
pub use locator::{resolve_all, Installer, PackageStore, RootLocator};
pub use pipeline::{aggregate, run_pipeline, PipelineReport, RunConfig};
