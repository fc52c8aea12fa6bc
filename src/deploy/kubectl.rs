use std::ffi::OsString;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info, instrument, warn};

use super::{Manifest, ManifestApplier, ManifestSource};
use crate::error::{E2eError, E2eResult};

/// Applies manifests by running the kubectl CLI
#[derive(Debug, Clone)]
pub struct KubectlApplier {
    program: String,
}

impl KubectlApplier {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for `kubectl <action>` on a manifest
    pub fn args(action: &str, manifest: &Manifest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![action.into()];

        match &manifest.source {
            ManifestSource::Kustomize(dir) => {
                args.push("-k".into());
                args.push(dir.into());
            }
            ManifestSource::File(file) => {
                args.push("-f".into());
                args.push(file.into());
            }
        }

        if let Some(ns) = &manifest.namespace {
            args.push("--namespace".into());
            args.push(ns.into());
        }

        if action == "delete" {
            args.push("--ignore-not-found".into());
        }

        args
    }

    /// Run kubectl, returning stdout on success and stderr on failure
    async fn run(&self, args: Vec<OsString>) -> Result<String, String> {
        let output = Command::new(&self.program)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| format!("failed to execute {}: {}", self.program, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        info!("kubectl stdout: {}", stdout.trim_end());
        if !stderr.is_empty() {
            warn!("kubectl stderr: {}", stderr.trim_end());
        }

        if output.status.success() {
            Ok(stdout.to_string())
        } else {
            Err(format!("{}: {}", output.status, stderr.trim_end()))
        }
    }
}

impl Default for KubectlApplier {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

#[async_trait]
impl ManifestApplier for KubectlApplier {
    #[instrument(skip_all, fields(manifest = %manifest))]
    async fn apply(&self, manifest: &Manifest) -> E2eResult<()> {
        info!("Applying manifest");

        self.run(Self::args("apply", manifest)).await.map_err(|reason| {
            error!(%reason, "kubectl apply failed");
            E2eError::apply(manifest.to_string(), reason)
        })?;

        info!("Manifest applied");
        Ok(())
    }

    #[instrument(skip_all, fields(manifest = %manifest))]
    async fn delete(&self, manifest: &Manifest) -> E2eResult<()> {
        info!("Deleting manifest");

        self.run(Self::args("delete", manifest)).await.map_err(|reason| {
            error!(%reason, "kubectl delete failed");
            E2eError::teardown(manifest.to_string(), reason)
        })?;

        info!("Manifest deleted");
        Ok(())
    }
}
