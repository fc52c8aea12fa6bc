//! SGX device plugin deployment verification
//!
//! Deploys the Intel SGX device plugin to a live cluster, either directly with kustomize or
//! through the device plugin operator, and checks that it becomes ready, advertises the SGX
//! resources on the nodes and that a pod can consume them.

pub mod config;
pub mod deploy;
pub mod diagnostics;
pub mod error;
pub mod k8s;
pub mod poll;
pub mod scenario;
pub mod wait;
pub mod workload;

pub use config::Config;
pub use error::{E2eError, E2eResult};
pub use scenario::{
    run_all, run_direct_deployment, run_operator_deployment, Scenario, ScenarioResult,
    ScenarioState,
};
