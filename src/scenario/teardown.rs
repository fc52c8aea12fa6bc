use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use crate::deploy::{DeploymentHandle, ManifestApplier};
use crate::error::{E2eError, E2eResult};
use crate::k8s::ClusterApi;
use crate::wait::wait_for_pods_gone;

/// Pods that must disappear after a manifest is deleted, such as the plugin daemonset an
/// operator removes once its custom resource is gone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settle {
    pub selector: String,
    pub namespace: String,
    pub deadline: Duration,
}

/// Something a scenario created and must remove again
#[derive(Debug, Clone, PartialEq)]
pub enum TeardownItem {
    Manifest {
        handle: DeploymentHandle,
        settle: Option<Settle>,
    },
    Pod {
        namespace: String,
        name: String,
    },
    Namespace(String),
    /// Scratch directory holding generated kustomizations
    WorkDir(PathBuf),
}

impl fmt::Display for TeardownItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manifest { handle, .. } => write!(f, "{}", handle.manifest),
            Self::Pod { namespace, name } => write!(f, "pod {}/{}", namespace, name),
            Self::Namespace(name) => write!(f, "namespace {}", name),
            Self::WorkDir(dir) => write!(f, "work dir {}", dir.display()),
        }
    }
}

/// Created objects in creation order.
///
/// [`TeardownStack::unwind`] consumes the stack, so it runs at most once per scenario.
#[derive(Debug, Default)]
pub struct TeardownStack {
    items: Vec<TeardownItem>,
}

impl TeardownStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: TeardownItem) {
        self.items.push(item);
    }

    /// Flag the most recently pushed manifest as fully applied
    pub fn mark_applied(&mut self) {
        if let Some(TeardownItem::Manifest { handle, .. }) = self.items.last_mut() {
            handle.applied = true;
        }
    }

    pub fn items(&self) -> &[TeardownItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove everything in reverse creation order.
    ///
    /// Every item is attempted. Failures are logged and returned, never raised.
    pub async fn unwind(
        self,
        cluster: &dyn ClusterApi,
        applier: &dyn ManifestApplier,
        interval: Duration,
    ) -> Vec<E2eError> {
        let mut errors = Vec::new();

        for item in self.items.into_iter().rev() {
            info!(item = %item, "Removing");

            if let Err(err) = remove(&item, cluster, applier, interval).await {
                warn!(item = %item, error = %err, "Teardown step failed");
                errors.push(err);
            }
        }

        errors
    }
}

async fn remove(
    item: &TeardownItem,
    cluster: &dyn ClusterApi,
    applier: &dyn ManifestApplier,
    interval: Duration,
) -> E2eResult<()> {
    match item {
        TeardownItem::Manifest { handle, settle } => {
            if !handle.applied {
                info!(manifest = %handle.manifest, "Apply did not complete, deleting anyway");
            }
            applier.delete(&handle.manifest).await?;

            if let Some(settle) = settle {
                wait_for_pods_gone(cluster, &settle.selector, &settle.namespace, interval, settle.deadline)
                    .await
                    .map_err(|e| E2eError::teardown(handle.manifest.to_string(), e.to_string()))?;
            }
            Ok(())
        }
        TeardownItem::Pod { namespace, name } => cluster
            .delete_pod(namespace, name)
            .await
            .map_err(|e| E2eError::teardown(item.to_string(), e.to_string())),
        TeardownItem::Namespace(name) => cluster
            .delete_namespace(name)
            .await
            .map_err(|e| E2eError::teardown(item.to_string(), e.to_string())),
        TeardownItem::WorkDir(dir) => match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(E2eError::teardown(item.to_string(), e.to_string())),
        },
    }
}
