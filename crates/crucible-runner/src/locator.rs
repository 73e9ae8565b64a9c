//! Dependency installation and root lookup ports.

use async_trait::async_trait;
use crucible_core::deps::{DepIdent, DependencySpec, ResolvedRoot, ResolvedRoots};
use crucible_core::{Error, Result};
use std::path::PathBuf;
use tracing::{debug, info};

/// Locates the installed filesystem root of a declared dependency.
/// Pure lookup; a missing dependency is a hard configuration error.
#[async_trait]
pub trait RootLocator: Send + Sync {
    async fn resolve(&self, spec: &DependencySpec) -> Result<ResolvedRoot>;
}

/// Installation collaborator invoked once per dependency before
/// resolution. Failure here is fatal to the whole run.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(&self, ident: &DepIdent) -> Result<()>;
}

/// Disk-backed locator: a dependency `origin/name` is installed when
/// `<store>/<origin>/<name>` exists.
pub struct PackageStore {
    base: PathBuf,
}

impl PackageStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn root_path(&self, ident: &DepIdent) -> PathBuf {
        self.base.join(ident.origin()).join(ident.name())
    }
}

#[async_trait]
impl RootLocator for PackageStore {
    async fn resolve(&self, spec: &DependencySpec) -> Result<ResolvedRoot> {
        let path = self.root_path(&spec.ident);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {
                debug!(dependency = %spec.ident, path = %path.display(), "Resolved dependency root");
                Ok(ResolvedRoot {
                    ident: spec.ident.clone(),
                    path,
                })
            }
            _ => Err(Error::DependencyMissing(spec.ident.to_string())),
        }
    }
}

/// Resolve every declared dependency, failing fast on the first miss.
/// A partial result is never produced; every job shares the resolved
/// set, so a hole in it would mean incorrect linkage for all of them.
pub async fn resolve_all(
    locator: &dyn RootLocator,
    specs: &[DependencySpec],
) -> Result<ResolvedRoots> {
    let mut roots = ResolvedRoots::new();
    for spec in specs {
        let root = locator.resolve(spec).await?;
        roots.insert(root);
    }
    info!(count = roots.len(), "Resolved dependency roots");
    Ok(roots)
}
