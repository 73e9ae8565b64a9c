//! CLI command definitions.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run one component's test suite
    Test {
        /// Component name
        component: String,

        /// Space-joined feature flag names
        #[arg(long)]
        features: Option<String>,

        /// Options routed to the test binary after `--`
        #[arg(long)]
        test_options: Option<String>,

        /// Repository root
        #[arg(long, default_value = ".")]
        repo_root: PathBuf,

        /// Pipeline file providing the dependency set
        #[arg(long)]
        pipeline: Option<String>,

        /// Dependency package store
        #[arg(long, default_value = "/opt/crucible/pkgs")]
        store: PathBuf,
    },

    /// Execute the full pipeline job table
    Run {
        /// Path to pipeline file
        #[arg(long)]
        pipeline: Option<String>,

        /// Repository root
        #[arg(long, default_value = ".")]
        repo_root: PathBuf,

        /// Dependency package store
        #[arg(long, default_value = "/opt/crucible/pkgs")]
        store: PathBuf,
    },

    /// Validate a pipeline file
    Validate {
        /// Path to pipeline file
        path: Option<String>,
    },

    /// Print the assembled build/test environment
    Env {
        /// Path to pipeline file
        #[arg(long)]
        pipeline: Option<String>,

        /// Dependency package store
        #[arg(long, default_value = "/opt/crucible/pkgs")]
        store: PathBuf,

        /// Target platform: linux or windows
        #[arg(long, default_value = "linux")]
        platform: String,
    },
}
