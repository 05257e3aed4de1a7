use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::telemetry::stats::PipelineEvent;

/// Prometheus metrics for pipeline health.
///
/// All metrics use the "telemetryd" namespace. Frame counters and the
/// overage histogram are fed by the aggregator as frames are built; event
/// counters and gauges are fed by the status monitor from stats snapshots.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Total frames emitted.
    pub frames_emitted: Counter,
    /// Total frames flagged degraded.
    pub degraded_frames: Counter,
    /// Total aggregation wakes past the deadline tolerance.
    pub deadline_misses: Counter,
    /// How far late wakes overran the frame period (1ms-1s buckets).
    pub deadline_overage: Histogram,
    /// Pipeline events by kind.
    pub pipeline_events: CounterVec,
    /// Cumulative frames as reported by the aggregator.
    pub frames_total: Gauge,
    /// Cumulative load generator busy time in seconds.
    pub load_busy_seconds: Gauge,
    /// Pipeline uptime in seconds.
    pub uptime_seconds: Gauge,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let frames_emitted = Counter::with_opts(
            Opts::new("frames_emitted_total", "Total telemetry frames emitted.")
                .namespace("telemetryd"),
        )?;
        let degraded_frames = Counter::with_opts(
            Opts::new(
                "degraded_frames_total",
                "Total telemetry frames flagged degraded.",
            )
            .namespace("telemetryd"),
        )?;
        let deadline_misses = Counter::with_opts(
            Opts::new(
                "deadline_misses_total",
                "Total aggregation cycles that woke past the deadline tolerance.",
            )
            .namespace("telemetryd"),
        )?;
        let deadline_overage = Histogram::with_opts(
            HistogramOpts::new(
                "deadline_overage_seconds",
                "Time a late aggregation wake overran the frame period.",
            )
            .namespace("telemetryd")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        )?;
        let pipeline_events = CounterVec::new(
            Opts::new("pipeline_events_total", "Total pipeline events by kind.")
                .namespace("telemetryd"),
            &["event"],
        )?;
        let frames_total = Gauge::with_opts(
            Opts::new("frames_total", "Cumulative frames built by the aggregator.")
                .namespace("telemetryd"),
        )?;
        let load_busy_seconds = Gauge::with_opts(
            Opts::new(
                "load_busy_seconds",
                "Cumulative CPU burst time spent by the load generator.",
            )
            .namespace("telemetryd"),
        )?;
        let uptime_seconds = Gauge::with_opts(
            Opts::new("uptime_seconds", "Pipeline uptime in seconds.").namespace("telemetryd"),
        )?;

        registry.register(Box::new(frames_emitted.clone()))?;
        registry.register(Box::new(degraded_frames.clone()))?;
        registry.register(Box::new(deadline_misses.clone()))?;
        registry.register(Box::new(deadline_overage.clone()))?;
        registry.register(Box::new(pipeline_events.clone()))?;
        registry.register(Box::new(frames_total.clone()))?;
        registry.register(Box::new(load_busy_seconds.clone()))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            frames_emitted,
            degraded_frames,
            deadline_misses,
            deadline_overage,
            pipeline_events,
            frames_total,
            load_busy_seconds,
            uptime_seconds,
        })
    }

    /// Add a stats snapshot to the per-event counters.
    pub fn observe_events(&self, snapshot: &[(PipelineEvent, u64)]) {
        for (event, count) in snapshot {
            self.pipeline_events
                .with_label_values(&[event.as_str()])
                .inc_by(*count as f64);
        }
    }

    /// Encode every registered metric in the prometheus text format.
    pub fn render(&self) -> Result<String> {
        encode_registry(&self.registry)
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 was requested.
    pub async fn start(&self) -> Result<SocketAddr> {
        let addr = if self.addr.is_empty() {
            ":9090"
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let registry = self.registry.clone();
        let app_state = Arc::new(AppState { registry });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(local_addr)
    }

    /// Gracefully shuts down the health metrics server.
    pub fn stop(&self) {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }
    }
}

fn encode_registry(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("encoding metrics")?;
    String::from_utf8(buffer).context("converting metrics to string")
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match encode_registry(&state.registry) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "encoding metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
