//! Helpers for reading pod and node state

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::info;

use crate::error::{E2eError, E2eResult};

/// Create labels for the per-run test namespace
///
/// The plugin needs host access, so the namespace enforces the privileged pod security level.
pub fn test_namespace_labels(prefix: &str) -> BTreeMap<String, String> {
    [
        (
            "app.kubernetes.io/managed-by".to_string(),
            "sgx-plugin-e2e".to_string(),
        ),
        ("e2e-framework".to_string(), prefix.to_string()),
        (
            "pod-security.kubernetes.io/enforce".to_string(),
            "privileged".to_string(),
        ),
        (
            "pod-security.kubernetes.io/audit".to_string(),
            "privileged".to_string(),
        ),
        (
            "pod-security.kubernetes.io/warn".to_string(),
            "privileged".to_string(),
        ),
    ]
    .into_iter()
    .collect()
}

/// Numeric value of a Kubernetes quantity such as `42`, `100m`, `64Mi` or `1e3`.
///
/// Returns `None` for strings that are not valid quantities.
pub fn quantity_value(quantity: &Quantity) -> Option<f64> {
    let raw = quantity.0.trim();
    let split = raw
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '+' || c == '-'))))
        .map(|(i, _)| i)
        .unwrap_or(raw.len());
    let (number, suffix) = raw.split_at(split);
    let base: f64 = number.parse().ok()?;

    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        exp if exp.starts_with(['e', 'E']) => 10f64.powi(exp.get(1..)?.parse::<i32>().ok()?),
        _ => return None,
    };

    Some(base * multiplier)
}

pub fn pod_name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or("unknown")
}

pub fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown")
}

/// A pod is ready when it is Running and its Ready condition is True.
///
/// Without reported conditions every container status must be ready instead.
pub fn is_pod_running_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };

    if status.phase.as_deref() != Some("Running") {
        return false;
    }

    match status.conditions.as_deref() {
        Some(conditions) if !conditions.is_empty() => conditions
            .iter()
            .any(|c| c.type_ == "Ready" && c.status == "True"),
        _ => status
            .container_statuses
            .as_deref()
            .is_some_and(|cs| !cs.is_empty() && cs.iter().all(|c| c.ready)),
    }
}

/// Best description of why a pod terminated
pub fn termination_reason(pod: &Pod) -> String {
    let Some(status) = pod.status.as_ref() else {
        return "no status reported".to_string();
    };

    let terminated = status
        .container_statuses
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|c| c.state.as_ref().and_then(|s| s.terminated.as_ref()).map(|t| (c, t)))
        .find(|(_, t)| t.exit_code != 0);

    if let Some((container, t)) = terminated {
        return format!(
            "container {} exited with code {} ({})",
            container.name,
            t.exit_code,
            t.reason.as_deref().unwrap_or("no reason")
        );
    }

    match (status.reason.as_deref(), status.message.as_deref()) {
        (Some(reason), Some(message)) => format!("{}: {}", reason, message),
        (Some(reason), None) => reason.to_string(),
        (None, Some(message)) => message.to_string(),
        (None, None) => "no reason reported".to_string(),
    }
}

/// Every container of every pod must run with a read-only root filesystem
pub fn check_read_only_root_filesystem(pods: &[Pod]) -> E2eResult<()> {
    for pod in pods {
        let Some(spec) = pod.spec.as_ref() else {
            continue;
        };

        for container in &spec.containers {
            let read_only = container
                .security_context
                .as_ref()
                .and_then(|sc| sc.read_only_root_filesystem)
                .unwrap_or(false);

            if !read_only {
                return Err(E2eError::InsecurePod {
                    pod: pod_name(pod).to_string(),
                    container: container.name.clone(),
                    reason: "writable root filesystem".to_string(),
                });
            }

            for mount in container.volume_mounts.as_deref().unwrap_or_default() {
                info!(
                    pod = pod_name(pod),
                    container = %container.name,
                    mount = %mount.mount_path,
                    read_only = mount.read_only.unwrap_or(false),
                    "Volume mount"
                );
            }
        }
    }

    Ok(())
}
