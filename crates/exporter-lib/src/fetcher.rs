//! Single-node snapshot retrieval

use crate::cluster::{validate_node_name, ClusterClient};
use crate::deadline::Deadline;
use crate::error::ScrapeError;
use crate::models::Snapshot;
use crate::observability::ExporterMetrics;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

/// Fetches and decodes one node's summary under a caller-supplied deadline
#[derive(Clone)]
pub struct Fetcher {
    client: Arc<dyn ClusterClient>,
    metrics: ExporterMetrics,
}

impl Fetcher {
    pub fn new(client: Arc<dyn ClusterClient>, metrics: ExporterMetrics) -> Self {
        Self { client, metrics }
    }

    pub fn client(&self) -> &Arc<dyn ClusterClient> {
        &self.client
    }

    pub fn metrics(&self) -> &ExporterMetrics {
        &self.metrics
    }

    /// One round trip to the node. Transport, decoding and deadline
    /// failures all come back as a [`ScrapeError`] naming the node.
    pub async fn fetch(&self, node: &str, deadline: Deadline) -> Result<Snapshot, ScrapeError> {
        let start = Instant::now();

        let result = self.fetch_inner(node, deadline).await;

        let elapsed = start.elapsed();
        self.metrics.observe_node_scrape(elapsed.as_secs_f64());
        match &result {
            Ok(snapshot) => debug!(
                node = %node,
                pods = snapshot.pods.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Fetched node summary"
            ),
            Err(e) => self.metrics.inc_node_scrape_errors(e.kind()),
        }

        result
    }

    async fn fetch_inner(&self, node: &str, deadline: Deadline) -> Result<Snapshot, ScrapeError> {
        validate_node_name(node).map_err(|source| ScrapeError::Transport {
            node: node.to_string(),
            source,
        })?;

        let body = deadline
            .run(self.client.node_summary(node))
            .await
            .map_err(|after| ScrapeError::Timeout {
                target: node.to_string(),
                after,
            })?
            .map_err(|source| ScrapeError::Transport {
                node: node.to_string(),
                source,
            })?;

        Snapshot::from_slice(&body).map_err(|source| ScrapeError::Deserialization {
            node: node.to_string(),
            source,
        })
    }
}
