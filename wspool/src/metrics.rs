use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use crate::workspace::PoolManager;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct AcquireLabels {
    source: AcquireSource,
}

/// Where an acquired workspace came from.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum AcquireSource {
    Pooled,
    Direct,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ProvisionLabels {
    result: ProvisionResult,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
enum ProvisionResult {
    Success,
    Failure,
}

// ---------------------------------------------------------------------------
// MetricsRegistry
// ---------------------------------------------------------------------------

/// Prometheus metrics for the workspace pool.
///
/// Recording is atomic and safe from any task. `Clone` shares the same
/// underlying registry.
#[derive(Clone)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Mutex<Registry>,
    acquisitions_total: Family<AcquireLabels, Counter>,
    provisioned_total: Family<ProvisionLabels, Counter>,
    orphans_deleted_total: Counter,
    delete_failures_total: Counter,
    provision_duration_seconds: Histogram,
    acquire_wait_seconds: Histogram,
    ready_workspaces: Gauge,
    start_time: Instant,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let acquisitions_total = Family::<AcquireLabels, Counter>::default();
        registry.register(
            "wspool_acquisitions",
            "Workspaces handed to callers by source",
            acquisitions_total.clone(),
        );

        let provisioned_total = Family::<ProvisionLabels, Counter>::default();
        registry.register(
            "wspool_provisioned",
            "Workspace provisioning attempts by result",
            provisioned_total.clone(),
        );

        let orphans_deleted_total = Counter::default();
        registry.register(
            "wspool_orphans_deleted",
            "Workspaces deleted because the pool filled while they were created",
            orphans_deleted_total.clone(),
        );

        let delete_failures_total = Counter::default();
        registry.register(
            "wspool_delete_failures",
            "Workspace deletions that failed or timed out",
            delete_failures_total.clone(),
        );

        // Provisioning: 0.5s to ~10min
        let provision_duration_seconds = Histogram::new(exponential_buckets(0.5, 2.0, 11));
        registry.register(
            "wspool_provision_duration_seconds",
            "Create + start + wait-for-running duration",
            provision_duration_seconds.clone(),
        );

        let acquire_wait_seconds = Histogram::new(exponential_buckets(0.01, 2.0, 14));
        registry.register(
            "wspool_acquire_wait_seconds",
            "Time callers spent in acquire",
            acquire_wait_seconds.clone(),
        );

        let ready_workspaces = Gauge::default();
        registry.register(
            "wspool_ready_workspaces",
            "Workspaces currently waiting in the pool",
            ready_workspaces.clone(),
        );

        Self {
            inner: Arc::new(MetricsInner {
                registry: Mutex::new(registry),
                acquisitions_total,
                provisioned_total,
                orphans_deleted_total,
                delete_failures_total,
                provision_duration_seconds,
                acquire_wait_seconds,
                ready_workspaces,
                start_time: Instant::now(),
            }),
        }
    }

    pub fn record_acquire(&self, source: AcquireSource, wait: std::time::Duration) {
        self.inner
            .acquisitions_total
            .get_or_create(&AcquireLabels { source })
            .inc();
        self.inner.acquire_wait_seconds.observe(wait.as_secs_f64());
    }

    pub fn record_provision_success(&self, duration: std::time::Duration) {
        self.inner
            .provisioned_total
            .get_or_create(&ProvisionLabels {
                result: ProvisionResult::Success,
            })
            .inc();
        self.inner
            .provision_duration_seconds
            .observe(duration.as_secs_f64());
    }

    pub fn record_provision_failure(&self) {
        self.inner
            .provisioned_total
            .get_or_create(&ProvisionLabels {
                result: ProvisionResult::Failure,
            })
            .inc();
    }

    pub fn record_orphan_deleted(&self) {
        self.inner.orphans_deleted_total.inc();
    }

    pub fn record_delete_failure(&self) {
        self.inner.delete_failures_total.inc();
    }

    pub fn set_ready_workspaces(&self, count: usize) {
        self.inner.ready_workspaces.set(count as i64);
    }

    /// Encode all metrics in OpenMetrics text format.
    pub fn encode_metrics(&self) -> String {
        let mut buf = String::new();
        let registry = self
            .inner
            .registry
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if let Err(e) = encode(&mut buf, &registry) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        buf
    }

    /// Seconds since the registry was created.
    pub fn uptime_seconds(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

struct MetricsState {
    metrics: MetricsRegistry,
    manager: Arc<PoolManager>,
}

async fn metrics_handler(State(state): State<Arc<MetricsState>>) -> impl IntoResponse {
    state
        .metrics
        .set_ready_workspaces(state.manager.ready_count().await);

    let body = state.metrics.encode_metrics();
    (
        StatusCode::OK,
        [("content-type", "application/openmetrics-text; version=1.0.0; charset=utf-8")],
        body,
    )
}

async fn healthz_handler(State(state): State<Arc<MetricsState>>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": state.manager.state().to_string(),
        "pool": {
            "ready": state.manager.ready_count().await,
            "capacity": state.manager.capacity(),
        },
        "uptime_seconds": state.metrics.uptime_seconds(),
    });

    (
        StatusCode::OK,
        [("content-type", "application/json")],
        body.to_string(),
    )
}

/// Routes served by the metrics server: `/metrics` and `/healthz`.
pub fn router(metrics: MetricsRegistry, manager: Arc<PoolManager>) -> Router {
    let state = Arc::new(MetricsState { metrics, manager });

    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

/// Start the metrics HTTP server as a background tokio task.
pub fn start_metrics_server(
    addr: SocketAddr,
    metrics: MetricsRegistry,
    manager: Arc<PoolManager>,
) -> tokio::task::JoinHandle<()> {
    let app = router(metrics, manager);

    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(addr = %addr, error = %e, "failed to bind metrics server");
                return;
            }
        };
        tracing::info!(addr = %addr, "metrics server listening");
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "metrics server error");
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
