//! Wait primitives built on [`crate::poll::poll_until`]
//!
//! - node allocatable resources: [`wait_for_resource`]
//! - pod readiness, pod completion and pod removal: [`wait_for_ready_pods`],
//!   [`wait_for_pod_success`], [`wait_for_pods_gone`]

mod pods;
mod resources;

pub use pods::{wait_for_pod_success, wait_for_pods_gone, wait_for_ready_pods, ReadinessQuery};
pub use resources::{resource_availability, wait_for_resource, ResourceAvailability, ResourceQuery};
