//! Generated kustomizations
//!
//! The admission webhook overlay has a fixed namespace. To deploy it into the per-run
//! namespace a wrapper kustomization is written that sets `namespace` and pulls the overlay
//! in as its only resource.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::info;

use super::Manifest;
use crate::error::{E2eError, E2eResult};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Kustomization {
    api_version: &'static str,
    kind: &'static str,
    namespace: String,
    resources: Vec<String>,
}

/// Path from `from` to `to` that climbs to the filesystem root first.
///
/// kustomize refuses absolute resource paths, so both must be absolute and the result is
/// `../` repeated once per component of `from`, followed by `to` without its root.
pub fn relative_to_root(from: &Path, to: &Path) -> PathBuf {
    let depth = from
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count();

    let mut path: PathBuf = std::iter::repeat("..").take(depth).collect();
    path.extend(to.components().filter(|c| matches!(c, Component::Normal(_))));
    path
}

/// Write a kustomization into `work_dir` that deploys `base` into `namespace`
pub async fn write_namespace_overlay(work_dir: &Path, base: &Path, namespace: &str) -> E2eResult<Manifest> {
    if !work_dir.is_absolute() || !base.is_absolute() {
        return Err(E2eError::locate(
            base.display().to_string(),
            format!("overlay paths must be absolute (work dir {})", work_dir.display()),
        ));
    }

    tokio::fs::create_dir_all(work_dir).await?;

    let kustomization = Kustomization {
        api_version: "kustomize.config.k8s.io/v1beta1",
        kind: "Kustomization",
        namespace: namespace.to_string(),
        resources: vec![relative_to_root(work_dir, base).to_string_lossy().to_string()],
    };
    let content = serde_yaml::to_string(&kustomization)
        .map_err(|e| E2eError::apply(base.display().to_string(), e.to_string()))?;

    let path = work_dir.join("kustomization.yaml");
    tokio::fs::write(&path, content).await?;
    info!(path = %path.display(), namespace, "Wrote namespace overlay");

    Ok(Manifest {
        source: super::ManifestSource::Kustomize(work_dir.to_path_buf()),
        namespace: Some(namespace.to_string()),
    })
}
