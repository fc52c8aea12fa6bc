//! Error types for the SGX plugin deployment checks

use std::time::Duration;

use thiserror::Error;

use crate::diagnostics::NamespaceDump;

/// Result alias used throughout the crate
pub type E2eResult<T> = Result<T, E2eError>;

/// Every way a verification step can fail
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum E2eError {
    /// A manifest could not be found in the plugins repository
    #[error("unable to locate {path:?}: {reason}")]
    Locate { path: String, reason: String },

    /// `kubectl apply` failed
    #[error("unable to apply {manifest}: {reason}")]
    Apply { manifest: String, reason: String },

    /// A wait exceeded its deadline
    #[error("timed out after {deadline:?} waiting for {what} (last observed: {last_observed})")]
    Timeout {
        what: String,
        deadline: Duration,
        last_observed: String,
        diagnostics: Option<Box<NamespaceDump>>,
    },

    /// The submitted workload terminated without succeeding
    #[error("pod {pod} terminated in phase {phase}: {reason}")]
    WorkloadFailure {
        pod: String,
        phase: String,
        reason: String,
    },

    /// A delete failed while tearing down
    #[error("unable to delete {target}: {reason}")]
    Teardown { target: String, reason: String },

    /// A wait query violated its invariants
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A workload spec violated its invariants
    #[error("invalid workload: {0}")]
    InvalidWorkload(String),

    /// A plugin container runs with a writable root filesystem
    #[error("{pod} (container: {container}): {reason}")]
    InsecurePod {
        pod: String,
        container: String,
        reason: String,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl E2eError {
    /// Create a locate error for a repository-relative path
    pub fn locate(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Locate {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an apply error for a manifest
    pub fn apply(manifest: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Apply {
            manifest: manifest.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error without diagnostics attached
    pub fn timeout(what: impl Into<String>, deadline: Duration, last_observed: impl Into<String>) -> Self {
        Self::Timeout {
            what: what.into(),
            deadline,
            last_observed: last_observed.into(),
            diagnostics: None,
        }
    }

    /// Create a teardown error for a delete target
    pub fn teardown(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Teardown {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid query error
    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    /// Create an invalid workload error
    pub fn invalid_workload(msg: impl Into<String>) -> Self {
        Self::InvalidWorkload(msg.into())
    }

    /// Attach a diagnostic dump to a timeout. Other errors are returned unchanged.
    pub fn with_diagnostics(self, dump: NamespaceDump) -> Self {
        match self {
            Self::Timeout {
                what,
                deadline,
                last_observed,
                ..
            } => Self::Timeout {
                what,
                deadline,
                last_observed,
                diagnostics: Some(Box::new(dump)),
            },
            other => other,
        }
    }

    /// Diagnostics captured for this error, if any
    pub fn diagnostics(&self) -> Option<&NamespaceDump> {
        match self {
            Self::Timeout { diagnostics, .. } => diagnostics.as_deref(),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
