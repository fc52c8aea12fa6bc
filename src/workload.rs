//! Test workload requesting SGX resources
//!
//! SGX resources cannot burst, so a [`WorkloadSpec`] only exists with request == limit for
//! every resource it names.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::error::{E2eError, E2eResult};
use crate::k8s::quantity_value;

pub const TESTER_POD_NAME: &str = "sgxplugin-tester";
pub const TESTER_CONTAINER_NAME: &str = "testcontainer";
/// Amount of `sgx.intel.com/epc` the tester requests
pub const TESTER_EPC_UNITS: &str = "42";

/// A single-container pod that runs to completion
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadSpec {
    name: String,
    image: String,
    command: Vec<String>,
    args: Vec<String>,
    /// Keyed by resource name; request and limit are equal
    resources: BTreeMap<String, Quantity>,
}

impl WorkloadSpec {
    pub fn builder(name: impl Into<String>, image: impl Into<String>) -> WorkloadSpecBuilder {
        WorkloadSpecBuilder {
            name: name.into(),
            image: image.into(),
            command: Vec::new(),
            args: Vec::new(),
            requests: BTreeMap::new(),
            limits: BTreeMap::new(),
        }
    }

    /// The busybox pod that echoes and exits while holding 42 units of EPC
    pub fn sgx_tester(image: impl Into<String>, epc_resource: &str) -> E2eResult<Self> {
        Self::builder(TESTER_POD_NAME, image)
            .command(["/bin/sh"])
            .args(["-c", "echo hello world"])
            .request(epc_resource, TESTER_EPC_UNITS)
            .limit(epc_resource, TESTER_EPC_UNITS)
            .build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resources(&self) -> &BTreeMap<String, Quantity> {
        &self.resources
    }

    /// Render as a pod with restart policy Never
    pub fn to_pod(&self) -> Pod {
        let resources = (!self.resources.is_empty()).then(|| ResourceRequirements {
            requests: Some(self.resources.clone()),
            limits: Some(self.resources.clone()),
            ..Default::default()
        });

        Pod {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                labels: Some(
                    [("app.kubernetes.io/managed-by".to_string(), "sgx-plugin-e2e".to_string())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: TESTER_CONTAINER_NAME.to_string(),
                    image: Some(self.image.clone()),
                    command: Some(self.command.clone()),
                    args: Some(self.args.clone()),
                    resources,
                    ..Default::default()
                }],
                restart_policy: Some("Never".to_string()),
                ..Default::default()
            }),
            status: None,
        }
    }
}

pub struct WorkloadSpecBuilder {
    name: String,
    image: String,
    command: Vec<String>,
    args: Vec<String>,
    requests: BTreeMap<String, Quantity>,
    limits: BTreeMap<String, Quantity>,
}

impl WorkloadSpecBuilder {
    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn request(mut self, resource: &str, quantity: &str) -> Self {
        self.requests
            .insert(resource.to_string(), Quantity(quantity.to_string()));
        self
    }

    pub fn limit(mut self, resource: &str, quantity: &str) -> Self {
        self.limits
            .insert(resource.to_string(), Quantity(quantity.to_string()));
        self
    }

    /// Validate that every resource has a positive request equal to its limit
    pub fn build(self) -> E2eResult<WorkloadSpec> {
        if self.command.is_empty() {
            return Err(E2eError::invalid_workload(format!("{} has no command", self.name)));
        }

        for resource in self.limits.keys() {
            if !self.requests.contains_key(resource) {
                return Err(E2eError::invalid_workload(format!(
                    "{} limits {} without requesting it",
                    self.name, resource
                )));
            }
        }

        for (resource, request) in &self.requests {
            let Some(limit) = self.limits.get(resource) else {
                return Err(E2eError::invalid_workload(format!(
                    "{} requests {} without a limit",
                    self.name, resource
                )));
            };

            let (Some(requested), Some(limited)) = (quantity_value(request), quantity_value(limit)) else {
                return Err(E2eError::invalid_workload(format!(
                    "{} has an unparsable quantity for {}",
                    self.name, resource
                )));
            };

            if requested <= 0.0 {
                return Err(E2eError::invalid_workload(format!(
                    "{} must request a positive amount of {}",
                    self.name, resource
                )));
            }

            if requested != limited {
                return Err(E2eError::invalid_workload(format!(
                    "{} requests {} of {} but limits it to {}",
                    self.name, request.0, resource, limit.0
                )));
            }
        }

        Ok(WorkloadSpec {
            name: self.name,
            image: self.image,
            command: self.command,
            args: self.args,
            resources: self.requests,
        })
    }
}
