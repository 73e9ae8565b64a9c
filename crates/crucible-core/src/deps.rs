//! Native dependency declarations and resolved install roots.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Identifier of a declared dependency: `origin/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DepIdent {
    origin: String,
    name: String,
}

impl DepIdent {
    pub fn new(origin: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            name: name.into(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The dependency name uppercased for use in environment variable
    /// names, e.g. `core/openssl` -> `OPENSSL`.
    pub fn env_name(&self) -> String {
        self.name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for DepIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.origin, self.name)
    }
}

impl FromStr for DepIdent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split('/').collect::<Vec<_>>().as_slice() {
            [origin, name] if !origin.is_empty() && !name.is_empty() => {
                Ok(Self::new(*origin, *name))
            }
            _ => Err(Error::InvalidIdent(s.to_string())),
        }
    }
}

impl TryFrom<String> for DepIdent {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<DepIdent> for String {
    fn from(ident: DepIdent) -> Self {
        ident.to_string()
    }
}

/// How a dependency is consumed by the build or test step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkMode {
    /// Built into the binary as a static archive; sets the per-dependency
    /// static flag in addition to the root variable.
    StaticBuild,
    /// Archive searched at link time (build-time visibility).
    StaticLink,
    /// Shared object loaded at run time (run-time visibility).
    DynamicRuntime,
    /// Discovery-only tool metadata (pkg-config style).
    ToolPath,
}

/// A declared dependency. Declaration order across the full set is
/// significant: aggregated search paths preserve it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub ident: DepIdent,
    pub mode: LinkMode,
}

impl DependencySpec {
    pub fn new(ident: DepIdent, mode: LinkMode) -> Self {
        Self { ident, mode }
    }
}

/// Install root of a resolved dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoot {
    pub ident: DepIdent,
    pub path: PathBuf,
}

/// Lookup table of resolved roots. Order-insensitive; ordering always
/// comes from the declared spec list, never from this table.
#[derive(Debug, Clone, Default)]
pub struct ResolvedRoots(HashMap<DepIdent, PathBuf>);

impl ResolvedRoots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, root: ResolvedRoot) {
        self.0.insert(root.ident, root.path);
    }

    pub fn get(&self, ident: &DepIdent) -> Option<&PathBuf> {
        self.0.get(ident)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ResolvedRoot> for ResolvedRoots {
    fn from_iter<I: IntoIterator<Item = ResolvedRoot>>(iter: I) -> Self {
        let mut roots = Self::new();
        for root in iter {
            roots.insert(root);
        }
        roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ident_parse_roundtrip() {
        let ident: DepIdent = "core/openssl".parse().unwrap();
        assert_eq!(ident.origin(), "core");
        assert_eq!(ident.name(), "openssl");
        assert_eq!(ident.to_string(), "core/openssl");
    }

    #[test]
    fn ident_rejects_malformed() {
        assert!("openssl".parse::<DepIdent>().is_err());
        assert!("/openssl".parse::<DepIdent>().is_err());
        assert!("core/".parse::<DepIdent>().is_err());
        assert!("a/b/c".parse::<DepIdent>().is_err());
    }

    #[test]
    fn env_name_uppercases_and_sanitizes() {
        let ident: DepIdent = "core/zeromq".parse().unwrap();
        assert_eq!(ident.env_name(), "ZEROMQ");

        let ident: DepIdent = "core/pkg-config".parse().unwrap();
        assert_eq!(ident.env_name(), "PKG_CONFIG");
    }
}
