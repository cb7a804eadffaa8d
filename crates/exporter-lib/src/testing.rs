//! In-memory cluster for tests
//!
//! Enabled for this crate's unit tests and, through the `testing`
//! feature, for integration tests of dependent crates.

use crate::cluster::ClusterClient;
use async_trait::async_trait;
use kube::core::ErrorResponse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum NodeBehavior {
    Body(Vec<u8>),
    Fail(u16, String),
}

/// Mock [`ClusterClient`] with per-node responses, latency and failures
#[derive(Debug, Default, Clone)]
pub struct MockCluster {
    nodes: Vec<String>,
    behavior: HashMap<String, NodeBehavior>,
    latency: HashMap<String, Duration>,
    list_failure: Option<String>,
    list_latency: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    summary_calls: Arc<AtomicUsize>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node that answers with [`sample_summary`]
    pub fn with_node(self, node: &str) -> Self {
        let body = sample_summary(node).into_bytes();
        self.with_raw(node, body)
    }

    /// Add a node that answers with an arbitrary body
    pub fn with_raw(mut self, node: &str, body: Vec<u8>) -> Self {
        self.push_node(node);
        self.behavior
            .insert(node.to_string(), NodeBehavior::Body(body));
        self
    }

    /// Add a node whose proxied request fails with a 503
    pub fn with_unreachable_node(mut self, node: &str) -> Self {
        self.push_node(node);
        self.behavior.insert(
            node.to_string(),
            NodeBehavior::Fail(
                503,
                format!("error trying to reach service: dial tcp {}:10250: i/o timeout", node),
            ),
        );
        self
    }

    /// Delay every summary response of `node`
    pub fn with_latency(mut self, node: &str, latency: Duration) -> Self {
        self.latency.insert(node.to_string(), latency);
        self
    }

    /// Make node enumeration fail
    pub fn with_list_failure(mut self, message: &str) -> Self {
        self.list_failure = Some(message.to_string());
        self
    }

    /// Delay node enumeration
    pub fn with_list_latency(mut self, latency: Duration) -> Self {
        self.list_latency = Some(latency);
        self
    }

    /// Highest number of summary requests observed in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Total summary requests made
    pub fn summary_calls(&self) -> usize {
        self.summary_calls.load(Ordering::SeqCst)
    }

    fn push_node(&mut self, node: &str) {
        if !self.nodes.iter().any(|n| n == node) {
            self.nodes.push(node.to_string());
        }
    }
}

fn api_error(code: u16, reason: &str, message: String) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    })
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn list_nodes(&self) -> Result<Vec<String>, kube::Error> {
        if let Some(latency) = self.list_latency {
            tokio::time::sleep(latency).await;
        }
        match &self.list_failure {
            Some(message) => Err(api_error(403, "Forbidden", message.clone())),
            None => Ok(self.nodes.clone()),
        }
    }

    async fn node_summary(&self, node: &str) -> Result<Vec<u8>, kube::Error> {
        self.summary_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight::enter(&self.in_flight, &self.max_in_flight);

        if let Some(latency) = self.latency.get(node) {
            tokio::time::sleep(*latency).await;
        }

        match self.behavior.get(node) {
            Some(NodeBehavior::Body(body)) => Ok(body.clone()),
            Some(NodeBehavior::Fail(code, message)) => {
                Err(api_error(*code, "ServiceUnavailable", message.clone()))
            }
            None => Err(api_error(
                404,
                "NotFound",
                format!("nodes \"{}\" not found", node),
            )),
        }
    }
}

/// Counts a request as in flight until dropped, including when the
/// caller abandons it at a deadline
struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let current = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(current, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A kubelet summary for `node` with one pod, one container and an image
/// filesystem, every usage field populated
pub fn sample_summary(node: &str) -> String {
    serde_json::json!({
        "node": {
            "nodeName": node,
            "startTime": "2024-03-01T10:00:00Z",
            "runtime": {
                "imageFs": {
                    "time": "2024-03-01T10:05:00Z",
                    "availableBytes": 60_000_000_000u64,
                    "capacityBytes": 100_000_000_000u64,
                    "usedBytes": 40_000_000_000u64,
                    "inodesFree": 6_000_000u64,
                    "inodes": 6_500_000u64,
                    "inodesUsed": 500_000u64
                }
            }
        },
        "pods": [{
            "podRef": {"name": format!("{}-agent", node), "namespace": "kube-system", "uid": "8d1f0c52"},
            "startTime": "2024-03-01T10:00:00Z",
            "containers": [{
                "name": "agent",
                "startTime": "2024-03-01T10:00:01Z",
                "rootfs": {
                    "availableBytes": 60_000_000_000u64,
                    "capacityBytes": 100_000_000_000u64,
                    "usedBytes": 65_536u64,
                    "inodesFree": 6_000_000u64,
                    "inodes": 6_500_000u64,
                    "inodesUsed": 12u64
                },
                "logs": {
                    "availableBytes": 60_000_000_000u64,
                    "capacityBytes": 100_000_000_000u64,
                    "usedBytes": 4_096u64,
                    "inodesFree": 6_000_000u64,
                    "inodes": 6_500_000u64,
                    "inodesUsed": 1u64
                }
            }],
            "ephemeral-storage": {
                "availableBytes": 60_000_000_000u64,
                "capacityBytes": 100_000_000_000u64,
                "usedBytes": 69_632u64,
                "inodesFree": 6_000_000u64,
                "inodes": 6_500_000u64,
                "inodesUsed": 13u64
            }
        }]
    })
    .to_string()
}
