//! Component test invocation.
//!
//! Builds the exact test-runner command line and working directory for
//! a component. The invoker is pure: it returns a structured command
//! descriptor and executes nothing, so it is independently testable and
//! the executor is the only place a process is ever spawned.

use crate::platform::Platform;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_template() -> Vec<String> {
    vec!["cargo".to_string(), "test".to_string()]
}

/// One component's test invocation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInvocation {
    /// Component name; the working directory is
    /// `<repo-root>/components/<component>`.
    pub component: String,
    /// Base command template.
    #[serde(default = "default_template")]
    pub template: Vec<String>,
    /// Space-joined feature flag names. Empty or absent means the
    /// feature flag is omitted entirely; some test runners reject a
    /// trailing empty flag, so an empty string must never render one.
    #[serde(default)]
    pub features: Option<String>,
    /// Opaque options routed to the test binary after the `--`
    /// separator, appended verbatim.
    #[serde(default)]
    pub test_options: Option<String>,
}

impl ComponentInvocation {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            template: default_template(),
            features: None,
            test_options: None,
        }
    }

    pub fn with_features(mut self, features: impl Into<String>) -> Self {
        let features = features.into();
        self.features = if features.is_empty() {
            None
        } else {
            Some(features)
        };
        self
    }

    pub fn with_test_options(mut self, options: impl Into<String>) -> Self {
        self.test_options = Some(options.into());
        self
    }

    /// Render the logical command for this invocation.
    pub fn command(&self, repo_root: &Path) -> CommandSpec {
        let mut args: Vec<String> = self.template.iter().skip(1).cloned().collect();

        if let Some(features) = self.features.as_deref().filter(|f| !f.is_empty()) {
            args.push("--features".to_string());
            args.push(features.to_string());
        }

        CommandSpec {
            program: self
                .template
                .first()
                .cloned()
                .unwrap_or_else(|| "cargo".to_string()),
            args,
            trailing: self
                .test_options
                .as_deref()
                .filter(|o| !o.is_empty())
                .map(String::from),
            cwd: repo_root.join("components").join(&self.component),
        }
    }
}

/// Structured command descriptor produced by the invoker and consumed
/// by the job executor. The program and argument vector are the logical
/// invocation and are identical on every platform; only the shell
/// wrapper differs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Opaque test-runner options appended verbatim after the `--`
    /// separator. Never tokenized; internal whitespace is preserved.
    pub trailing: Option<String>,
    pub cwd: PathBuf,
}

impl CommandSpec {
    /// Render a single shell command line for the given platform.
    pub fn shell_line(&self, _platform: Platform) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&quote(arg));
        }
        if let Some(trailing) = &self.trailing {
            line.push_str(" -- ");
            line.push_str(trailing);
        }
        line
    }

    /// The shell argv that wraps this command on the given platform,
    /// e.g. `["sh", "-c", "<line>"]` on Linux.
    pub fn shell_argv(&self, platform: Platform) -> Vec<String> {
        vec![
            platform.shell().to_string(),
            platform.shell_command_flag().to_string(),
            self.shell_line(platform),
        ]
    }
}

fn quote(arg: &str) -> String {
    if arg.chars().any(|c| c.is_whitespace() || c == '"') {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}
