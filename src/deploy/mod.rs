//! Applying and deleting deployment manifests
//!
//! Manifests are located in the plugins repository ([`locate_repo_file`]) and applied
//! through a [`ManifestApplier`], normally [`KubectlApplier`].

mod kubectl;
mod kustomize;
mod locate;

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::error::{E2eError, E2eResult};

pub use kubectl::KubectlApplier;
pub use kustomize::{relative_to_root, write_namespace_overlay};
pub use locate::{locate_repo_file, search_upwards};

/// Where the objects of a manifest come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    /// A directory holding a `kustomization.yaml`
    Kustomize(PathBuf),
    /// A single manifest file
    File(PathBuf),
}

/// A manifest together with the namespace it is applied to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub source: ManifestSource,
    pub namespace: Option<String>,
}

impl Manifest {
    /// Build from a located `kustomization.yaml`; kustomize works on its directory
    pub fn kustomization(file: &Path) -> E2eResult<Self> {
        let dir = file
            .parent()
            .ok_or_else(|| E2eError::locate(file.display().to_string(), "no parent directory"))?;

        Ok(Self {
            source: ManifestSource::Kustomize(dir.to_path_buf()),
            namespace: None,
        })
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: ManifestSource::File(path.into()),
            namespace: None,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn path(&self) -> &Path {
        match &self.source {
            ManifestSource::Kustomize(dir) => dir,
            ManifestSource::File(file) => file,
        }
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ManifestSource::Kustomize(dir) => write!(f, "kustomization {}", dir.display())?,
            ManifestSource::File(file) => write!(f, "manifest {}", file.display())?,
        }
        if let Some(ns) = &self.namespace {
            write!(f, " (namespace {})", ns)?;
        }
        Ok(())
    }
}

/// A manifest this run has applied (or tried to) and must delete again
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentHandle {
    pub manifest: Manifest,
    /// Whether the apply completed; a failed apply may still have created objects
    pub applied: bool,
}

impl DeploymentHandle {
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest,
            applied: false,
        }
    }
}

/// Applies and deletes manifests against the cluster.
///
/// Both calls return once the tool has finished. Deleting something already gone is not
/// an error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManifestApplier: Send + Sync {
    async fn apply(&self, manifest: &Manifest) -> E2eResult<()>;

    async fn delete(&self, manifest: &Manifest) -> E2eResult<()>;
}
