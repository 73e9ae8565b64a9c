//! Environment assembly.
//!
//! Composes the environment variables a native build or test step needs
//! from the declared dependency set and its resolved install roots. The
//! assembled map is an explicit value handed to each job invocation,
//! never process-global state, so jobs cannot interfere with each other
//! and assembly is testable in isolation.
//!
//! Determinism invariant: identical declaration order and resolved
//! roots produce byte-identical variable values. Downstream linkers
//! resolve search paths first-match-wins, so fragment order is part of
//! the contract.

use crate::deps::{DepIdent, DependencySpec, LinkMode, ResolvedRoots};
use crate::platform::Platform;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// A single rule in the assembler's rule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvRule {
    /// Aggregate `<root>/<subpath>` of every dependency in `mode`, in
    /// declaration order, joined with the platform list separator.
    PathList {
        var: String,
        mode: LinkMode,
        subpath: &'static str,
    },
    /// Direct 1:1 mapping of one dependency's root, no aggregation.
    RootDir { var: String, ident: DepIdent },
    /// Boolean linkage-mode flag, independent of any path variable.
    StaticFlag { var: String, ident: DepIdent },
}

/// Ordered rule table driving assembly.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<EnvRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<EnvRule>) -> Self {
        Self { rules }
    }

    /// The standard rule table for a native build/test step:
    ///
    /// - `LIBRARY_PATH`: `lib` of every static-link dependency
    /// - `PKG_CONFIG_PATH`: `lib/pkgconfig` of every tool-path dependency
    /// - `LD_LIBRARY_PATH`: `lib` of every dynamic-runtime dependency
    /// - `<NAME>_DIR` per dependency
    /// - `<NAME>_STATIC=true` per static-build dependency
    pub fn standard(specs: &[DependencySpec]) -> Self {
        let mut rules = vec![
            EnvRule::PathList {
                var: "LIBRARY_PATH".to_string(),
                mode: LinkMode::StaticLink,
                subpath: "lib",
            },
            EnvRule::PathList {
                var: "PKG_CONFIG_PATH".to_string(),
                mode: LinkMode::ToolPath,
                subpath: "lib/pkgconfig",
            },
            EnvRule::PathList {
                var: "LD_LIBRARY_PATH".to_string(),
                mode: LinkMode::DynamicRuntime,
                subpath: "lib",
            },
        ];

        for spec in specs {
            rules.push(EnvRule::RootDir {
                var: format!("{}_DIR", spec.ident.env_name()),
                ident: spec.ident.clone(),
            });
            if spec.mode == LinkMode::StaticBuild {
                rules.push(EnvRule::StaticFlag {
                    var: format!("{}_STATIC", spec.ident.env_name()),
                    ident: spec.ident.clone(),
                });
            }
        }

        Self { rules }
    }

    pub fn rules(&self) -> &[EnvRule] {
        &self.rules
    }
}

/// Assembled environment. Read-only once built; safe to share across
/// concurrently running jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvMap(BTreeMap<String, String>);

impl EnvMap {
    pub fn get(&self, var: &str) -> Option<&str> {
        self.0.get(var).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Assemble the environment for the full dependency set.
///
/// All-or-nothing: if any declared dependency has no resolved root the
/// whole assembly fails with `UnresolvedDependency` and no variable is
/// produced. A partial environment risks incorrect linkage and must
/// never be tolerated.
pub fn assemble(
    specs: &[DependencySpec],
    roots: &ResolvedRoots,
    rules: &RuleSet,
    platform: Platform,
) -> Result<EnvMap> {
    for spec in specs {
        if roots.get(&spec.ident).is_none() {
            return Err(Error::UnresolvedDependency(spec.ident.to_string()));
        }
    }

    let mut env = BTreeMap::new();
    let sep = platform.path_list_separator();

    for rule in rules.rules() {
        match rule {
            EnvRule::PathList { var, mode, subpath } => {
                let fragments: Vec<String> = specs
                    .iter()
                    .filter(|spec| spec.mode == *mode)
                    .map(|spec| {
                        let root = roots
                            .get(&spec.ident)
                            .ok_or_else(|| Error::UnresolvedDependency(spec.ident.to_string()))?;
                        Ok(join_subpath(root, subpath))
                    })
                    .collect::<Result<_>>()?;
                if !fragments.is_empty() {
                    env.insert(var.clone(), fragments.join(&sep.to_string()));
                }
            }
            EnvRule::RootDir { var, ident } => {
                let root = roots
                    .get(ident)
                    .ok_or_else(|| Error::UnresolvedDependency(ident.to_string()))?;
                env.insert(var.clone(), root.display().to_string());
            }
            EnvRule::StaticFlag { var, ident } => {
                if roots.get(ident).is_none() {
                    return Err(Error::UnresolvedDependency(ident.to_string()));
                }
                env.insert(var.clone(), "true".to_string());
            }
        }
    }

    Ok(EnvMap(env))
}

/// Join a fixed subpath onto a root with `/`, regardless of host OS.
/// Paths in the assembled environment follow the target platform of the
/// job, and the fixed subpaths use forward slashes on both.
fn join_subpath(root: &Path, subpath: &str) -> String {
    let root = root.display().to_string();
    let root = root.trim_end_matches('/');
    format!("{}/{}", root, subpath)
}
