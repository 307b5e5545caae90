//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 once the watch cache has synced
//!   or the admission webhook is listening, and 503 while shutting down)
//! - `/metrics` - Prometheus metrics endpoint

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

/// Labels for reconciliation metrics (namespace + name)
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReconcileLabels {
    pub namespace: String,
    pub name: String,
}

impl ReconcileLabels {
    fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl EncodeLabelSet for ReconcileLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for admission verdicts
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct DecisionLabels {
    pub decision: String,
}

impl EncodeLabelSet for DecisionLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("decision", self.decision.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Outcome of a single image scan
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ScanResultLabel {
    Clean,
    Vulnerable,
    Failed,
}

impl ScanResultLabel {
    fn as_str(self) -> &'static str {
        match self {
            ScanResultLabel::Clean => "clean",
            ScanResultLabel::Vulnerable => "vulnerable",
            ScanResultLabel::Failed => "failed",
        }
    }
}

/// Labels for image scan metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ScanLabels {
    pub result: ScanResultLabel,
}

impl EncodeLabelSet for ScanLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("result", self.result.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the controller and webhook
pub struct Metrics {
    /// Total reconciliations counter
    pub reconciliations_total: Family<ReconcileLabels, Counter>,
    /// Failed reconciliations counter
    pub reconciliation_errors_total: Family<ReconcileLabels, Counter>,
    /// Reconciliation duration histogram
    pub reconcile_duration_seconds: Family<ReconcileLabels, Histogram>,
    /// Workloads skipped because they opted out of exposure
    pub exposures_skipped_total: Family<ReconcileLabels, Counter>,
    /// Admission verdicts by decision
    pub admission_decisions_total: Family<DecisionLabels, Counter>,
    /// Image scans by result
    pub image_scans_total: Family<ScanLabels, Counter>,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "workload_gate_reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "workload_gate_reconciliation_errors",
            "Total number of reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ReconcileLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "workload_gate_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let exposures_skipped_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "workload_gate_exposures_skipped",
            "Workloads that opted out of automatic exposure",
            exposures_skipped_total.clone(),
        );

        let admission_decisions_total = Family::<DecisionLabels, Counter>::default();
        registry.register(
            "workload_gate_admission_decisions",
            "Admission verdicts by decision",
            admission_decisions_total.clone(),
        );

        let image_scans_total = Family::<ScanLabels, Counter>::default();
        registry.register(
            "workload_gate_image_scans",
            "Image scans by result",
            image_scans_total.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            exposures_skipped_total,
            admission_decisions_total,
            image_scans_total,
            registry,
        }
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = ReconcileLabels::new(namespace, name);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, namespace: &str, name: &str) {
        self.reconciliation_errors_total
            .get_or_create(&ReconcileLabels::new(namespace, name))
            .inc();
    }

    /// Record a workload that opted out of exposure
    pub fn record_skipped(&self, namespace: &str, name: &str) {
        self.exposures_skipped_total
            .get_or_create(&ReconcileLabels::new(namespace, name))
            .inc();
    }

    /// Record an admission verdict
    pub fn record_decision(&self, decision: &str) {
        self.admission_decisions_total
            .get_or_create(&DecisionLabels {
                decision: decision.to_string(),
            })
            .inc();
    }

    /// Record the result of one image scan
    pub fn record_scan(&self, result: ScanResultLabel) {
        self.image_scans_total
            .get_or_create(&ScanLabels { result })
            .inc();
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Which serving components are up.
#[derive(Clone, Copy, Debug, Default)]
struct Readiness {
    controller: bool,
    webhook: bool,
    draining: bool,
}

impl Readiness {
    /// Either component serving is enough; nothing is ready once draining.
    fn is_ready(self) -> bool {
        !self.draining && (self.controller || self.webhook)
    }
}

/// Shared state for the health server
pub struct HealthState {
    readiness: RwLock<Readiness>,
    /// Metrics registry
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            readiness: RwLock::new(Readiness::default()),
            metrics: Metrics::new(),
        }
    }

    /// Mark the controller as synced (or not)
    pub async fn set_ready(&self, ready: bool) {
        self.readiness.write().await.controller = ready;
    }

    /// Mark the admission webhook as listening (or not)
    pub async fn set_webhook_ready(&self, ready: bool) {
        self.readiness.write().await.webhook = ready;
    }

    /// Report not ready from now on, whatever the components say
    pub async fn begin_shutdown(&self) {
        self.readiness.write().await.draining = true;
    }

    /// Check if the process is ready
    pub async fn is_ready(&self) -> bool {
        self.readiness.read().await.is_ready()
    }
}

/// Liveness probe handler
///
/// Returns 200 OK if the process is alive.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 200 OK once ready, 503 Service Unavailable before that and
/// during shutdown.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server on `0.0.0.0:<port>`.
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port = port, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
