//! Metric schema
//!
//! The fixed catalog of every metric the exporter emits. Each entry pairs
//! a filesystem ([`Volume`]) with one [`UsageField`]; the projector walks
//! this table instead of branching per field, so a metric added here is
//! picked up everywhere.

use crate::models::ResourceUsage;

/// Namespace prepended to every metric name
pub const METRICS_NAMESPACE: &str = "kube_summary";

/// Label dimensions a metric is keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// `node, pod, [uid,] namespace, name`
    Container,
    /// `node, pod, [uid,] namespace`
    Pod,
    /// `node`
    Node,
}

/// The filesystem a usage figure describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Volume {
    ContainerLogs,
    ContainerRootfs,
    PodEphemeralStorage,
    NodeRuntimeImageFs,
}

impl Volume {
    pub fn scope(&self) -> Scope {
        match self {
            Volume::ContainerLogs | Volume::ContainerRootfs => Scope::Container,
            Volume::PodEphemeralStorage => Scope::Pod,
            Volume::NodeRuntimeImageFs => Scope::Node,
        }
    }
}

/// One of the six optional numbers in a [`ResourceUsage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageField {
    AvailableBytes,
    CapacityBytes,
    UsedBytes,
    InodesFree,
    Inodes,
    InodesUsed,
}

impl UsageField {
    pub const ALL: [UsageField; 6] = [
        UsageField::AvailableBytes,
        UsageField::CapacityBytes,
        UsageField::UsedBytes,
        UsageField::InodesFree,
        UsageField::Inodes,
        UsageField::InodesUsed,
    ];

    /// Read this field from a usage report
    pub fn read(&self, usage: &ResourceUsage) -> Option<u64> {
        match self {
            UsageField::AvailableBytes => usage.available_bytes,
            UsageField::CapacityBytes => usage.capacity_bytes,
            UsageField::UsedBytes => usage.used_bytes,
            UsageField::InodesFree => usage.inodes_free,
            UsageField::Inodes => usage.inodes,
            UsageField::InodesUsed => usage.inodes_used,
        }
    }
}

/// Whether pod-scoped series carry the pod UID
///
/// Applied to container- and pod-scoped metrics together; mixing would
/// give one metric name two label sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelPolicy {
    pub include_pod_uid: bool,
}

impl LabelPolicy {
    pub fn with_pod_uid() -> Self {
        Self {
            include_pod_uid: true,
        }
    }

    /// Label keys for a scope, in the order values are supplied
    pub fn label_keys(&self, scope: Scope) -> &'static [&'static str] {
        match (scope, self.include_pod_uid) {
            (Scope::Container, false) => &["node", "pod", "namespace", "name"],
            (Scope::Container, true) => &["node", "pod", "uid", "namespace", "name"],
            (Scope::Pod, false) => &["node", "pod", "namespace"],
            (Scope::Pod, true) => &["node", "pod", "uid", "namespace"],
            (Scope::Node, _) => &["node"],
        }
    }
}

/// A single catalog entry
#[derive(Debug, PartialEq, Eq)]
pub struct MetricSpec {
    pub volume: Volume,
    pub field: UsageField,
    /// Name without the namespace prefix
    pub name: &'static str,
    pub help: &'static str,
}

impl MetricSpec {
    pub fn scope(&self) -> Scope {
        self.volume.scope()
    }

    /// Fully qualified name as it appears in the exposition
    pub fn fq_name(&self) -> String {
        format!("{}_{}", METRICS_NAMESPACE, self.name)
    }

    /// Catalog entries for one filesystem
    pub fn for_volume(volume: Volume) -> impl Iterator<Item = &'static MetricSpec> {
        METRICS.iter().filter(move |spec| spec.volume == volume)
    }
}

macro_rules! metric {
    ($volume:ident, $field:ident, $name:literal, $help:literal) => {
        MetricSpec {
            volume: Volume::$volume,
            field: UsageField::$field,
            name: $name,
            help: $help,
        }
    };
}

/// Every metric the exporter can emit
#[rustfmt::skip]
pub static METRICS: [MetricSpec; 24] = [
    metric!(ContainerLogs, InodesFree, "container_logs_inodes_free", "Number of available Inodes for logs"),
    metric!(ContainerLogs, Inodes, "container_logs_inodes", "Number of Inodes for logs"),
    metric!(ContainerLogs, InodesUsed, "container_logs_inodes_used", "Number of used Inodes for logs"),
    metric!(ContainerLogs, AvailableBytes, "container_logs_available_bytes", "Number of bytes that aren't consumed by the container logs"),
    metric!(ContainerLogs, CapacityBytes, "container_logs_capacity_bytes", "Number of bytes that can be consumed by the container logs"),
    metric!(ContainerLogs, UsedBytes, "container_logs_used_bytes", "Number of bytes that are consumed by the container logs"),
    metric!(ContainerRootfs, InodesFree, "container_rootfs_inodes_free", "Number of available Inodes"),
    metric!(ContainerRootfs, Inodes, "container_rootfs_inodes", "Number of Inodes"),
    metric!(ContainerRootfs, InodesUsed, "container_rootfs_inodes_used", "Number of used Inodes"),
    metric!(ContainerRootfs, AvailableBytes, "container_rootfs_available_bytes", "Number of bytes that aren't consumed by the container"),
    metric!(ContainerRootfs, CapacityBytes, "container_rootfs_capacity_bytes", "Number of bytes that can be consumed by the container"),
    metric!(ContainerRootfs, UsedBytes, "container_rootfs_used_bytes", "Number of bytes that are consumed by the container"),
    metric!(PodEphemeralStorage, AvailableBytes, "pod_ephemeral_storage_available_bytes", "Number of bytes of Ephemeral storage that aren't consumed by the pod"),
    metric!(PodEphemeralStorage, CapacityBytes, "pod_ephemeral_storage_capacity_bytes", "Number of bytes of Ephemeral storage that can be consumed by the pod"),
    metric!(PodEphemeralStorage, UsedBytes, "pod_ephemeral_storage_used_bytes", "Number of bytes of Ephemeral storage that are consumed by the pod"),
    metric!(PodEphemeralStorage, InodesFree, "pod_ephemeral_storage_inodes_free", "Number of available Inodes for pod Ephemeral storage"),
    metric!(PodEphemeralStorage, Inodes, "pod_ephemeral_storage_inodes", "Number of Inodes for pod Ephemeral storage"),
    metric!(PodEphemeralStorage, InodesUsed, "pod_ephemeral_storage_inodes_used", "Number of used Inodes for pod Ephemeral storage"),
    metric!(NodeRuntimeImageFs, AvailableBytes, "node_runtime_imagefs_available_bytes", "Number of bytes of node Runtime ImageFS that aren't consumed"),
    metric!(NodeRuntimeImageFs, CapacityBytes, "node_runtime_imagefs_capacity_bytes", "Number of bytes of node Runtime ImageFS that can be consumed"),
    metric!(NodeRuntimeImageFs, UsedBytes, "node_runtime_imagefs_used_bytes", "Number of bytes of node Runtime ImageFS that are consumed"),
    metric!(NodeRuntimeImageFs, InodesFree, "node_runtime_imagefs_inodes_free", "Number of available Inodes for node Runtime ImageFS"),
    metric!(NodeRuntimeImageFs, Inodes, "node_runtime_imagefs_inodes", "Number of Inodes for node Runtime ImageFS"),
    metric!(NodeRuntimeImageFs, InodesUsed, "node_runtime_imagefs_inodes_used", "Number of used Inodes for node Runtime ImageFS"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const VOLUMES: [Volume; 4] = [
        Volume::ContainerLogs,
        Volume::ContainerRootfs,
        Volume::PodEphemeralStorage,
        Volume::NodeRuntimeImageFs,
    ];

    #[test]
    fn test_every_volume_covers_every_field_once() {
        for volume in VOLUMES {
            let fields: Vec<UsageField> =
                MetricSpec::for_volume(volume).map(|spec| spec.field).collect();
            assert_eq!(fields.len(), UsageField::ALL.len(), "{:?}", volume);

            let unique: HashSet<UsageField> = fields.into_iter().collect();
            assert_eq!(unique.len(), UsageField::ALL.len(), "{:?}", volume);
        }
    }

    #[test]
    fn test_metric_names_are_unique_and_namespaced() {
        let names: HashSet<String> = METRICS.iter().map(MetricSpec::fq_name).collect();
        assert_eq!(names.len(), METRICS.len());
        assert!(names.iter().all(|n| n.starts_with("kube_summary_")));
    }

    #[test]
    fn test_scope_counts() {
        let count = |scope| METRICS.iter().filter(|m| m.scope() == scope).count();
        assert_eq!(count(Scope::Container), 12);
        assert_eq!(count(Scope::Pod), 6);
        assert_eq!(count(Scope::Node), 6);
    }

    #[test]
    fn test_uid_policy_applies_to_container_and_pod_only() {
        let plain = LabelPolicy::default();
        let with_uid = LabelPolicy::with_pod_uid();

        assert!(!plain.label_keys(Scope::Container).contains(&"uid"));
        assert!(!plain.label_keys(Scope::Pod).contains(&"uid"));
        assert!(with_uid.label_keys(Scope::Container).contains(&"uid"));
        assert!(with_uid.label_keys(Scope::Pod).contains(&"uid"));
        assert_eq!(with_uid.label_keys(Scope::Node), &["node"]);
    }

    #[test]
    fn test_usage_field_read() {
        let usage = ResourceUsage {
            inodes_used: Some(14),
            ..Default::default()
        };
        assert_eq!(UsageField::InodesUsed.read(&usage), Some(14));
        assert_eq!(UsageField::Inodes.read(&usage), None);
    }
}
