//! Legacy fixed resource ordering
//!
//! Orders cluster plumbing (namespaces, RBAC, config) ahead of workloads
//! and admission webhook configurations last, mirroring the ordering
//! clusters historically relied on when applying a whole build in one pass.

use overpack_core::resource::Resource;

const ORDER_FIRST: &[&str] = &[
    "Namespace",
    "ResourceQuota",
    "StorageClass",
    "CustomResourceDefinition",
    "ServiceAccount",
    "PodSecurityPolicy",
    "Role",
    "ClusterRole",
    "RoleBinding",
    "ClusterRoleBinding",
    "ConfigMap",
    "Secret",
    "Endpoints",
    "Service",
    "LimitRange",
    "PriorityClass",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "Deployment",
    "StatefulSet",
    "CronJob",
    "PodDisruptionBudget",
];

const ORDER_LAST: &[&str] = &[
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
];

/// Stable-sort resources into the legacy fixed ordering. Kinds in neither
/// list keep their relative order between the two groups.
pub fn legacy_sort(resources: &mut [Resource]) {
    resources.sort_by_key(|resource| rank(resource.kind()));
}

fn rank(kind: &str) -> usize {
    if let Some(index) = ORDER_FIRST.iter().position(|k| *k == kind) {
        return index;
    }
    if let Some(index) = ORDER_LAST.iter().position(|k| *k == kind) {
        return ORDER_FIRST.len() + 1 + index;
    }
    ORDER_FIRST.len()
}
