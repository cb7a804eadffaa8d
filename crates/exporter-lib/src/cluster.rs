//! Kubernetes API access
//!
//! The exporter needs exactly two calls from the API server: the list of
//! node names and the kubelet summary of one node, proxied through the
//! API server so no direct kubelet connectivity is required.

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, ResourceExt};
use std::path::Path;
use tracing::info;

/// Cluster operations the aggregator depends on
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Names of every node in the cluster
    async fn list_nodes(&self) -> Result<Vec<String>, kube::Error>;

    /// Raw body of `GET /api/v1/nodes/{node}/proxy/stats/summary`
    async fn node_summary(&self, node: &str) -> Result<Vec<u8>, kube::Error>;
}

/// [`ClusterClient`] backed by a `kube::Client`
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from an explicit kubeconfig, or infer one from
    /// `KUBECONFIG`, `~/.kube/config` or the in-cluster service account.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self> {
        let client = match kubeconfig {
            Some(path) => {
                info!(path = %path.display(), "Loading kubeconfig");
                let kubeconfig = Kubeconfig::read_from(path)
                    .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
                let config =
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .context("Invalid kubeconfig")?;
                Client::try_from(config).context("Failed to create kube client")?
            }
            None => Client::try_default()
                .await
                .context("Failed to infer kube client configuration")?,
        };

        Ok(Self::new(client))
    }
}

/// Reject names that would not stay a single segment of the proxy path.
/// Path parameters arrive percent-decoded, so `/`, `.` and `..` are live.
pub fn validate_node_name(node: &str) -> Result<(), kube::Error> {
    let invalid = node.is_empty()
        || node == "."
        || node == ".."
        || node.contains(['/', '%', '?', '#']);

    if invalid {
        return Err(kube::Error::BuildRequest(
            kube::core::request::Error::Validation(format!(
                "invalid node name {:?}: must be a single path segment",
                node
            )),
        ));
    }
    Ok(())
}

/// API server path proxying to a node's kubelet summary endpoint
pub fn summary_path(node: &str) -> String {
    format!("/api/v1/nodes/{}/proxy/stats/summary", node)
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_nodes(&self) -> Result<Vec<String>, kube::Error> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list_metadata(&ListParams::default()).await?;

        Ok(list.items.iter().map(|node| node.name_any()).collect())
    }

    async fn node_summary(&self, node: &str) -> Result<Vec<u8>, kube::Error> {
        validate_node_name(node)?;
        let request = http::Request::get(summary_path(node))
            .body(Vec::new())
            .map_err(kube::Error::HttpError)?;

        let body = self.client.request_text(request).await?;
        Ok(body.into_bytes())
    }
}
