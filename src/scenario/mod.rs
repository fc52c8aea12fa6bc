//! The two deployment verification workflows
//!
//! Each scenario walks a fixed state sequence, stops at the first hard failure and always
//! finishes by unwinding what it created:
//!
//! ```text
//! Init -> PluginDeploying -> PluginReady -> ResourcesAdvertised
//!      -> WorkloadSubmitted -> WorkloadSucceeded -> Teardown -> Done
//! ```
//!
//! A failure in any state moves the run to `Failed` once teardown has completed.

mod orchestrator;
mod teardown;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;

use crate::diagnostics::NamespaceDump;
use crate::error::E2eError;

pub use orchestrator::{run_all, run_direct_deployment, run_operator_deployment, Orchestrator};
pub use teardown::{Settle, TeardownItem, TeardownStack};

pub const EPC_RESOURCE: &str = "sgx.intel.com/epc";
pub const ENCLAVE_RESOURCE: &str = "sgx.intel.com/enclave";
pub const PROVISION_RESOURCE: &str = "sgx.intel.com/provision";

pub const PLUGIN_SELECTOR: &str = "app=intel-sgx-plugin";
pub const CONTROLLER_MANAGER_SELECTOR: &str = "control-plane=controller-manager";
pub const CERT_MANAGER_SELECTOR: &str = "app.kubernetes.io/instance=cert-manager";
pub const CERT_MANAGER_NAMESPACE: &str = "cert-manager";
/// cert-manager runs its controller, cainjector and webhook
pub const CERT_MANAGER_PODS: usize = 3;

pub const WEBHOOK_KUSTOMIZATION: &str =
    "deployments/sgx_admissionwebhook/overlays/default-with-certmanager/kustomization.yaml";
pub const PLUGIN_KUSTOMIZATION: &str = "deployments/sgx_plugin/base/kustomization.yaml";
pub const OPERATOR_KUSTOMIZATION: &str = "deployments/operator/default/kustomization.yaml";
pub const SGX_SAMPLE_CR: &str = "deployments/operator/samples/deviceplugin_v1_sgxdeviceplugin.yaml";

pub const CERT_MANAGER_TIMEOUT: Duration = Duration::from_secs(10);
pub const WEBHOOK_READY_TIMEOUT: Duration = Duration::from_secs(60);
pub const DIRECT_PLUGIN_READY_TIMEOUT: Duration = Duration::from_secs(100);
pub const OPERATOR_READY_TIMEOUT: Duration = Duration::from_secs(120);
pub const OPERATOR_PLUGIN_READY_TIMEOUT: Duration = Duration::from_secs(120);
pub const EPC_TIMEOUT: Duration = Duration::from_secs(150);
pub const ENCLAVE_TIMEOUT: Duration = Duration::from_secs(30);
pub const PROVISION_TIMEOUT: Duration = Duration::from_secs(30);
pub const WORKLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// The SGX resources a working plugin advertises, with how long each may take to appear
pub const SGX_RESOURCES: [(&str, Duration); 3] = [
    (EPC_RESOURCE, EPC_TIMEOUT),
    (ENCLAVE_RESOURCE, ENCLAVE_TIMEOUT),
    (PROVISION_RESOURCE, PROVISION_TIMEOUT),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum ScenarioState {
    Init,
    PluginDeploying,
    PluginReady,
    ResourcesAdvertised,
    WorkloadSubmitted,
    WorkloadSucceeded,
    Teardown,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Scenario {
    /// Webhook and plugin deployed with kustomize into a fresh namespace, then a workload
    DirectDeployment,
    /// Plugin deployed by the operator from the sample custom resource
    OperatorDeployment,
}

/// The first hard failure of a run and the state it happened in
#[derive(Debug)]
pub struct StepFailure {
    pub state: ScenarioState,
    pub error: E2eError,
}

#[derive(Debug)]
pub struct ScenarioResult {
    pub scenario: Scenario,
    /// Every state entered, in order
    pub visited: Vec<ScenarioState>,
    pub failure: Option<StepFailure>,
    /// Deletes that failed while tearing down; these never fail the scenario
    pub teardown_errors: Vec<E2eError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    pub fn final_state(&self) -> ScenarioState {
        self.visited.last().copied().unwrap_or(ScenarioState::Init)
    }

    pub fn summary(&self) -> ScenarioSummary {
        ScenarioSummary {
            scenario: self.scenario,
            passed: self.passed(),
            visited: self.visited.clone(),
            failure: self.failure.as_ref().map(|f| FailureSummary {
                state: f.state,
                error: f.error.to_string(),
                diagnostics: f.error.diagnostics().cloned(),
            }),
            teardown_errors: self.teardown_errors.iter().map(|e| e.to_string()).collect(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

impl fmt::Display for ScenarioResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path: Vec<String> = self.visited.iter().map(|s| s.to_string()).collect();
        let elapsed = (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0;

        writeln!(
            f,
            "{}: {} in {:.1}s",
            self.scenario,
            if self.passed() { "PASSED" } else { "FAILED" },
            elapsed
        )?;
        writeln!(f, "  states: {}", path.join(" -> "))?;

        if let Some(failure) = &self.failure {
            writeln!(f, "  failed in {}: {}", failure.state, failure.error)?;
            if let Some(dump) = failure.error.diagnostics() {
                write!(f, "{}", dump)?;
            }
        }

        for err in &self.teardown_errors {
            writeln!(f, "  teardown: {}", err)?;
        }

        Ok(())
    }
}

/// Serializable form of a [`ScenarioResult`], written as the run artifact
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioSummary {
    pub scenario: Scenario,
    pub passed: bool,
    pub visited: Vec<ScenarioState>,
    pub failure: Option<FailureSummary>,
    pub teardown_errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureSummary {
    pub state: ScenarioState,
    pub error: String,
    pub diagnostics: Option<NamespaceDump>,
}
