//! Kubelet summary exporter library
//!
//! Turns the `/stats/summary` documents of cluster nodes into Prometheus
//! gauges for container, pod and node filesystem usage:
//! - Snapshot model and metric schema
//! - Projection into metric records and a per-request registry
//! - Deadline-bounded fetching, single-node and fan-out aggregation
//! - HTTP router, health probes and self-observability

pub mod aggregator;
pub mod api;
pub mod cluster;
pub mod deadline;
pub mod error;
pub mod fetcher;
pub mod health;
pub mod models;
pub mod observability;
pub mod projector;
pub mod registry;
pub mod schema;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use aggregator::{Aggregator, ScrapeReport, DEFAULT_MAX_CONCURRENT_SCRAPES};
pub use cluster::{ClusterClient, KubeClusterClient};
pub use deadline::{Deadline, TimeoutHeaderPolicy};
pub use error::ScrapeError;
pub use fetcher::Fetcher;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::ExporterMetrics;
pub use registry::SummaryRegistry;
pub use schema::LabelPolicy;
