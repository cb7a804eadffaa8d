//! Snapshot model for the kubelet `/stats/summary` document
//!
//! Only the filesystem-related parts of the summary are modelled. Every
//! other field the kubelet reports (cpu, memory, network, volumes,
//! timestamps) is ignored during deserialization.

use serde::{Deserialize, Serialize};

/// Filesystem usage of a single resource
///
/// Every field is optional: the kubelet omits values it could not
/// determine, and an absent value means "unknown", never zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inodes_free: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inodes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inodes_used: Option<u64>,
}

/// A container within a pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<ResourceUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rootfs: Option<ResourceUsage>,
}

/// Identity of a pod, unique within one node's report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodRef {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// A pod and its containers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodEntry {
    pub pod_ref: PodRef,
    #[serde(default)]
    pub containers: Vec<ContainerEntry>,
    #[serde(
        rename = "ephemeral-storage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ephemeral_storage: Option<ResourceUsage>,
}

/// Container runtime statistics of a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRuntime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_fs: Option<ResourceUsage>,
}

/// Node-level section of the summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeEntry {
    pub node_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<NodeRuntime>,
}

/// One node's point-in-time usage report
///
/// Owned by the scrape that fetched it and dropped once projected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub node: NodeEntry,
    #[serde(default)]
    pub pods: Vec<PodEntry>,
}

impl Snapshot {
    /// Parse a raw `/stats/summary` response body
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    pub fn node_name(&self) -> &str {
        &self.node.node_name
    }

    /// Image filesystem usage, if the runtime reported one
    pub fn image_fs(&self) -> Option<&ResourceUsage> {
        self.node.runtime.as_ref()?.image_fs.as_ref()
    }
}
