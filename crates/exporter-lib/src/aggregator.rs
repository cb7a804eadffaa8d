//! Single-node and fan-out collection
//!
//! Both paths build a fresh [`SummaryRegistry`] per call. The fan-out path
//! spawns one task per node; tasks report into a bounded channel and the
//! caller's task is the only writer to the registry. The channel closing
//! (every sender dropped) means every task has reported.

use crate::deadline::Deadline;
use crate::error::{ScrapeError, NODE_LIST_TARGET};
use crate::fetcher::Fetcher;
use crate::models::Snapshot;
use crate::projector::project;
use crate::registry::SummaryRegistry;
use crate::schema::LabelPolicy;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Default cap on simultaneously in-flight node fetches
pub const DEFAULT_MAX_CONCURRENT_SCRAPES: usize = 32;

/// Capacity of the channel between node tasks and the collection point
const RESULT_BUFFER: usize = 64;

/// Outcome of one fan-out
#[derive(Debug, Default)]
pub struct ScrapeReport {
    pub requested: usize,
    pub succeeded: usize,
    /// Failures, in the order they reached the collection point
    pub failures: Vec<ScrapeError>,
}

impl ScrapeReport {
    /// Nodes that did not contribute, including tasks that never reported
    pub fn failed(&self) -> usize {
        self.requested - self.succeeded
    }
}

/// Aborts still-running node tasks when the request is dropped
struct AbortOnDrop(Vec<JoinHandle<()>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Turns node summaries into rendered-ready registries
#[derive(Clone)]
pub struct Aggregator {
    fetcher: Fetcher,
    policy: LabelPolicy,
    /// Per-request cap on in-flight fetches, 0 when unbounded
    max_concurrent_scrapes: usize,
}

impl Aggregator {
    /// `max_concurrent_scrapes == 0` disables the cap
    pub fn new(fetcher: Fetcher, policy: LabelPolicy, max_concurrent_scrapes: usize) -> Self {
        Self {
            fetcher,
            policy,
            max_concurrent_scrapes,
        }
    }

    pub fn policy(&self) -> LabelPolicy {
        self.policy
    }

    /// Scrape one node. Any failure fails the whole call; there is no
    /// partial result.
    pub async fn collect_one(
        &self,
        node: &str,
        deadline: Deadline,
    ) -> Result<SummaryRegistry, ScrapeError> {
        let snapshot = self.fetcher.fetch(node, deadline).await.map_err(|e| {
            warn!(
                event = "node_scrape_failed",
                node = %node,
                kind = e.kind(),
                error = %e,
                "Node scrape failed"
            );
            e
        })?;

        let registry = SummaryRegistry::new(self.policy)?;
        self.merge(&registry, &snapshot)?;
        Ok(registry)
    }

    /// Enumerate the cluster's nodes and scrape all of them.
    ///
    /// Fails only when enumeration fails or times out; per-node failures
    /// are logged and left out of the registry.
    pub async fn collect_all(
        &self,
        deadline: Deadline,
    ) -> Result<(SummaryRegistry, ScrapeReport), ScrapeError> {
        let nodes = deadline
            .run(self.fetcher.client().list_nodes())
            .await
            .map_err(|after| ScrapeError::Timeout {
                target: NODE_LIST_TARGET.to_string(),
                after,
            })
            .and_then(|listed| listed.map_err(|source| ScrapeError::Enumeration { source }))
            .map_err(|e| {
                error!(
                    event = "node_enumeration_failed",
                    kind = e.kind(),
                    error = %e,
                    "Failed to enumerate cluster nodes"
                );
                e
            })?;

        self.collect_nodes(nodes, deadline).await
    }

    /// Scrape `nodes` concurrently under one shared deadline
    pub async fn collect_nodes(
        &self,
        nodes: Vec<String>,
        deadline: Deadline,
    ) -> Result<(SummaryRegistry, ScrapeReport), ScrapeError> {
        let start = Instant::now();
        let registry = SummaryRegistry::new(self.policy)?;
        let mut report = ScrapeReport {
            requested: nodes.len(),
            ..Default::default()
        };

        // Slots belong to this request only; concurrent requests never
        // wait on each other
        let limiter = (self.max_concurrent_scrapes > 0)
            .then(|| Arc::new(Semaphore::new(self.max_concurrent_scrapes)));

        let (tx, mut rx) = mpsc::channel::<(String, Result<Snapshot, ScrapeError>)>(RESULT_BUFFER);
        let mut tasks = AbortOnDrop(Vec::with_capacity(nodes.len()));

        for node in nodes {
            let tx = tx.clone();
            let fetcher = self.fetcher.clone();
            let limiter = limiter.clone();

            tasks.0.push(tokio::spawn(async move {
                let result = scrape_limited(&fetcher, limiter, &node, deadline).await;
                // The receiver is gone only if the request was abandoned
                let _ = tx.send((node, result)).await;
            }));
        }
        drop(tx);

        while let Some((node, result)) = rx.recv().await {
            match result {
                Ok(snapshot) => {
                    self.merge(&registry, &snapshot)?;
                    report.succeeded += 1;
                }
                Err(e) => {
                    warn!(
                        event = "node_scrape_failed",
                        node = %node,
                        kind = e.kind(),
                        error = %e,
                        "Node scrape failed, excluding it from the response"
                    );
                    report.failures.push(e);
                }
            }
        }

        self.fetcher
            .metrics()
            .set_last_fanout(report.succeeded, report.failed());
        debug!(
            event = "fanout_complete",
            requested = report.requested,
            succeeded = report.succeeded,
            failed = report.failed(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Fan-out complete"
        );

        Ok((registry, report))
    }

    fn merge(&self, registry: &SummaryRegistry, snapshot: &Snapshot) -> Result<(), ScrapeError> {
        registry.write_all(&project(snapshot, self.policy))?;
        Ok(())
    }
}

/// Wait for a fetch slot, then fetch. Waiting counts against the deadline.
async fn scrape_limited(
    fetcher: &Fetcher,
    limiter: Option<Arc<Semaphore>>,
    node: &str,
    deadline: Deadline,
) -> Result<Snapshot, ScrapeError> {
    let _permit = match limiter {
        Some(semaphore) => match deadline.run(semaphore.acquire_owned()).await {
            // The semaphore is never closed
            Ok(permit) => permit.ok(),
            Err(after) => {
                fetcher.metrics().inc_node_scrape_errors("timeout");
                return Err(ScrapeError::Timeout {
                    target: node.to_string(),
                    after,
                });
            }
        },
        None => None,
    };

    fetcher.fetch(node, deadline).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::ExporterMetrics;
    use crate::testing::MockCluster;
    use std::time::Duration;

    const RECORDS_PER_SAMPLE_NODE: usize = 24;

    fn aggregator(cluster: MockCluster, cap: usize) -> Aggregator {
        let fetcher = Fetcher::new(Arc::new(cluster), ExporterMetrics::new());
        Aggregator::new(fetcher, LabelPolicy::default(), cap)
    }

    fn render(registry: &SummaryRegistry) -> String {
        String::from_utf8(registry.render().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_collect_one_success() {
        let agg = aggregator(MockCluster::new().with_node("node-a"), 0);
        let registry = agg.collect_one("node-a", Deadline::none()).await.unwrap();

        assert_eq!(registry.series_count(), RECORDS_PER_SAMPLE_NODE);
        assert!(render(&registry).contains("node=\"node-a\""));
    }

    #[tokio::test]
    async fn test_collect_one_failure_has_no_partial_result() {
        let agg = aggregator(MockCluster::new().with_unreachable_node("node-a"), 0);
        let err = agg
            .collect_one("node-a", Deadline::none())
            .await
            .err()
            .unwrap();

        assert_eq!(err.kind(), "transport");
        assert!(err
            .to_string()
            .starts_with("Error querying /stats/summary for node-a:"));
    }

    #[tokio::test]
    async fn test_collect_all_skips_failed_nodes() {
        let cluster = MockCluster::new()
            .with_node("node-a")
            .with_unreachable_node("node-b")
            .with_node("node-c")
            .with_raw("node-d", b"{\"node\":".to_vec());

        let (registry, report) = aggregator(cluster, 0)
            .collect_all(Deadline::none())
            .await
            .unwrap();

        assert_eq!(report.requested, 4);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed(), 2);

        let mut kinds: Vec<_> = report.failures.iter().map(|e| e.kind()).collect();
        kinds.sort();
        assert_eq!(kinds, ["deserialization", "transport"]);

        // Union of the two successful projections, nothing else
        assert_eq!(registry.series_count(), 2 * RECORDS_PER_SAMPLE_NODE);
        let text = render(&registry);
        assert!(text.contains("node=\"node-a\""));
        assert!(text.contains("node=\"node-c\""));
        assert!(!text.contains("node=\"node-b\""));
        assert!(!text.contains("node=\"node-d\""));
    }

    #[tokio::test]
    async fn test_collect_all_every_node_failing_is_still_ok() {
        let cluster = MockCluster::new()
            .with_unreachable_node("node-a")
            .with_unreachable_node("node-b");

        let (registry, report) = aggregator(cluster, 0)
            .collect_all(Deadline::none())
            .await
            .unwrap();

        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(registry.series_count(), 0);
    }

    #[tokio::test]
    async fn test_collect_all_empty_cluster() {
        let (registry, report) = aggregator(MockCluster::new(), 0)
            .collect_all(Deadline::none())
            .await
            .unwrap();

        assert_eq!(report.requested, 0);
        assert_eq!(registry.series_count(), 0);
    }

    #[tokio::test]
    async fn test_enumeration_failure() {
        let cluster = MockCluster::new()
            .with_node("node-a")
            .with_list_failure("nodes is forbidden");

        let err = aggregator(cluster.clone(), 0)
            .collect_all(Deadline::none())
            .await
            .err()
            .unwrap();

        assert_eq!(err.kind(), "enumeration");
        assert_eq!(cluster.summary_calls(), 0);
    }

    #[tokio::test]
    async fn test_enumeration_respects_deadline() {
        let cluster = MockCluster::new()
            .with_node("node-a")
            .with_list_latency(Duration::from_secs(10));

        let err = aggregator(cluster, 0)
            .collect_all(Deadline::after(Duration::from_millis(50)))
            .await
            .err()
            .unwrap();

        assert!(
            matches!(err, ScrapeError::Timeout { ref target, .. } if target == NODE_LIST_TARGET)
        );
    }

    #[tokio::test]
    async fn test_slow_node_does_not_affect_others() {
        let cluster = MockCluster::new()
            .with_node("fast")
            .with_node("slow")
            .with_latency("slow", Duration::from_secs(10));

        let start = std::time::Instant::now();
        let (registry, report) = aggregator(cluster, 0)
            .collect_all(Deadline::after(Duration::from_millis(300)))
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind(), "timeout");
        assert_eq!(report.failures[0].node(), Some("slow"));
        assert_eq!(registry.series_count(), RECORDS_PER_SAMPLE_NODE);
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let mut cluster = MockCluster::new();
        for i in 0..8 {
            let node = format!("node-{}", i);
            cluster = cluster
                .with_node(&node)
                .with_latency(&node, Duration::from_millis(30));
        }

        let (_, report) = aggregator(cluster.clone(), 2)
            .collect_all(Deadline::none())
            .await
            .unwrap();

        assert_eq!(report.succeeded, 8);
        assert!(cluster.max_in_flight() <= 2);
        assert_eq!(cluster.summary_calls(), 8);
    }

    #[tokio::test]
    async fn test_unbounded_fanout_runs_all_at_once() {
        let mut cluster = MockCluster::new();
        for i in 0..8 {
            let node = format!("node-{}", i);
            cluster = cluster
                .with_node(&node)
                .with_latency(&node, Duration::from_millis(200));
        }

        let (_, report) = aggregator(cluster.clone(), 0)
            .collect_all(Deadline::none())
            .await
            .unwrap();

        assert_eq!(report.succeeded, 8);
        assert_eq!(cluster.max_in_flight(), 8);
    }

    #[tokio::test]
    async fn test_concurrent_requests_have_independent_caps() {
        let mut cluster = MockCluster::new();
        for node in ["n0", "n1"] {
            cluster = cluster
                .with_node(node)
                .with_latency(node, Duration::from_millis(200));
        }
        let agg = aggregator(cluster, 2);

        let first = {
            let agg = agg.clone();
            tokio::spawn(async move { agg.collect_all(Deadline::none()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Alone this finishes in ~200ms; it must not queue behind `first`
        let (_, second) = agg
            .collect_all(Deadline::after(Duration::from_millis(300)))
            .await
            .ok()
            .unwrap();
        let (_, first) = first.await.unwrap().ok().unwrap();

        assert_eq!(first.succeeded, 2);
        assert_eq!(second.succeeded, 2);
        assert!(second.failures.is_empty());
    }

    #[tokio::test]
    async fn test_queued_nodes_time_out_waiting_for_a_slot() {
        let cluster = MockCluster::new()
            .with_node("first")
            .with_latency("first", Duration::from_secs(10))
            .with_node("second")
            .with_latency("second", Duration::from_secs(10));

        let (_, report) = aggregator(cluster, 1)
            .collect_all(Deadline::after(Duration::from_millis(100)))
            .await
            .unwrap();

        assert_eq!(report.succeeded, 0);
        assert!(report.failures.iter().all(|e| e.kind() == "timeout"));
        assert_eq!(report.failures.len(), 2);
    }
}
