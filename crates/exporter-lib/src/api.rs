//! HTTP surface: summary exposition, self metrics and probes

use crate::aggregator::Aggregator;
use crate::deadline::{Deadline, InvalidTimeout, TimeoutHeaderPolicy, SCRAPE_TIMEOUT_HEADER};
use crate::error::ScrapeError;
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::observability::{render_process_metrics, ExporterMetrics};
use crate::registry::{SummaryRegistry, EXPOSITION_CONTENT_TYPE};
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const ERROR_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

const INDEX_PAGE: &str = r#"<html>
<head><title>Kube Summary Exporter</title></head>
<body>
<h1>Kube Summary Exporter</h1>
<p><a href="node/example-node">Retrieve metrics for 'example-node'</a></p>
<p><a href="nodes">Retrieve metrics for all nodes</a></p>
<p><a href="metrics">Exporter metrics</a></p>
</body>
</html>
"#;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Aggregator,
    pub health_registry: HealthRegistry,
    pub metrics: ExporterMetrics,
    pub timeout_policy: TimeoutHeaderPolicy,
}

impl AppState {
    pub fn new(
        aggregator: Aggregator,
        health_registry: HealthRegistry,
        metrics: ExporterMetrics,
        timeout_policy: TimeoutHeaderPolicy,
    ) -> Self {
        Self {
            aggregator,
            health_registry,
            metrics,
            timeout_policy,
        }
    }

    fn deadline(&self, headers: &HeaderMap) -> Result<Deadline, InvalidTimeout> {
        let value = headers
            .get(SCRAPE_TIMEOUT_HEADER)
            .map(|v| String::from_utf8_lossy(v.as_bytes()));

        Deadline::from_header(value.as_deref(), self.timeout_policy).map_err(|e| {
            warn!(error = %e, "Rejecting request with unparseable scrape timeout");
            e
        })
    }
}

/// Escape characters that are significant in HTML/XML
pub fn escape_markup(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }

    let mut escaped = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

fn error_response(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, ERROR_CONTENT_TYPE)],
        escape_markup(message).into_owned(),
    )
        .into_response()
}

fn exposition_response(registry: &SummaryRegistry) -> Response {
    match registry.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => error_response(&ScrapeError::from(e).to_string()),
    }
}

/// Record the request in the self metrics and pass the response through
fn observed(state: &AppState, handler: &str, start: Instant, response: Response) -> Response {
    state.metrics.observe_request(
        handler,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

/// Summary metrics of one node; any failure is a 500
async fn node_metrics(
    State(state): State<Arc<AppState>>,
    Path(node): Path<String>,
    headers: HeaderMap,
) -> Response {
    let start = Instant::now();

    let response = match state.deadline(&headers) {
        Err(e) => error_response(&e.to_string()),
        Ok(deadline) => match state.aggregator.collect_one(&node, deadline).await {
            Ok(registry) => exposition_response(&registry),
            Err(e) => error_response(&e.to_string()),
        },
    };

    observed(&state, "node", start, response)
}

/// Summary metrics of every node; only enumeration failure is a 500
async fn all_nodes_metrics(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let start = Instant::now();

    let response = match state.deadline(&headers) {
        Err(e) => error_response(&e.to_string()),
        Ok(deadline) => match state.aggregator.collect_all(deadline).await {
            Ok((registry, _report)) => {
                state.health_registry.set_healthy(components::KUBE_API).await;
                exposition_response(&registry)
            }
            Err(e) => {
                if matches!(e, ScrapeError::Enumeration { .. } | ScrapeError::Timeout { .. }) {
                    state
                        .health_registry
                        .set_degraded(components::KUBE_API, e.to_string())
                        .await;
                }
                error_response(&e.to_string())
            }
        },
    };

    observed(&state, "nodes", start, response)
}

/// The exporter's own metrics from the default registry
async fn process_metrics(State(state): State<Arc<AppState>>) -> Response {
    let start = Instant::now();

    let response = match render_process_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => error_response(&e.to_string()),
    };

    observed(&state, "metrics", start, response)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

/// Returns 200 unless a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/node/:node", get(node_metrics))
        .route("/nodes", get(all_nodes_metrics))
        .route("/metrics", get(process_metrics))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// Serve the API until `shutdown` resolves
pub async fn serve(
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
