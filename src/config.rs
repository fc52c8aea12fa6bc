use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::E2eResult;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root of the device plugins repository holding the deployment manifests
    #[serde(default = "default_repo_dir")]
    pub repo_dir: Option<PathBuf>,

    #[serde(default = "default_kubectl")]
    pub kubectl: String,

    /// Prefix of the per-run namespace created by the direct deployment check
    #[serde(default = "default_namespace_prefix")]
    pub namespace_prefix: String,

    #[serde(default = "default_operator_namespace")]
    pub operator_namespace: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_workload_image")]
    pub workload_image: String,

    /// Where diagnostic dumps and run summaries are written
    #[serde(default)]
    pub artifacts_dir: Option<PathBuf>,

    /// Scratch space for generated kustomizations, defaults to the system temp dir
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: i64,

    #[serde(default = "default_require_cert_manager")]
    pub require_cert_manager: bool,

    #[serde(default = "default_operator_cleanup_timeout_secs")]
    pub operator_cleanup_timeout_secs: u64,

    #[serde(default)]
    pub log_json: bool,
}

fn default_repo_dir() -> Option<PathBuf> {
    std::env::var_os("PLUGINS_REPO_DIR").map(PathBuf::from)
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_namespace_prefix() -> String {
    "sgxplugin".to_string()
}

fn default_operator_namespace() -> String {
    "inteldeviceplugins-system".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_workload_image() -> String {
    "registry.k8s.io/e2e-test-images/busybox:1.36.1-1".to_string()
}

fn default_log_tail_lines() -> i64 {
    100
}

fn default_require_cert_manager() -> bool {
    true
}

fn default_operator_cleanup_timeout_secs() -> u64 {
    60
}

impl Config {
    pub fn load() -> E2eResult<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("SGX_E2E").try_parsing(true))
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the waits spin or never poll
    pub fn validate(&self) -> E2eResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(config::ConfigError::Message(
                "poll_interval_ms must be at least 1".to_string(),
            )
            .into());
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn operator_cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.operator_cleanup_timeout_secs)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repo_dir: default_repo_dir(),
            kubectl: default_kubectl(),
            namespace_prefix: default_namespace_prefix(),
            operator_namespace: default_operator_namespace(),
            poll_interval_ms: default_poll_interval_ms(),
            workload_image: default_workload_image(),
            artifacts_dir: None,
            work_dir: None,
            log_tail_lines: default_log_tail_lines(),
            require_cert_manager: default_require_cert_manager(),
            operator_cleanup_timeout_secs: default_operator_cleanup_timeout_secs(),
            log_json: false,
        }
    }
}
