//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Prometheus instruments and scrape endpoint for PV-Watch."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Prometheus instruments for the daemon and the `/metrics` scrape endpoint.
//!
//! Each component owns a small struct of instruments registered against one
//! [`SharedRegistry`]; registering the same struct twice fails.
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use prometheus::{
    Gauge, Histogram, HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub type SharedRegistry = Arc<Registry>;

pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Serve `registry` in the Prometheus text format at `GET /metrics`.
///
/// Binding happens before this returns, so a port conflict surfaces as an
/// error here rather than inside the spawned task. Must be called from within
/// a Tokio runtime.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let listener = bind(addr)?;
    let addr = listener
        .local_addr()
        .context("failed to read metrics listener address")?;
    let app = Router::new()
        .route("/metrics", get(scrape))
        .with_state(registry);

    let (shutdown, stop) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                stop.await.ok();
            })
            .await
            .context("metrics exporter stopped with an error")
    });
    info!(address = %addr, "metrics exporter listening");

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown),
        task,
    })
}

fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to make metrics listener non-blocking")?;
    TcpListener::from_std(listener).context("failed to register metrics listener with tokio")
}

async fn scrape(State(registry): State<SharedRegistry>) -> Response {
    match TextEncoder::new().encode_to_string(&registry.gather()) {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error").into_response()
        }
    }
}

/// Running `/metrics` exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Address actually bound; differs from the requested one for port 0.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting scrapes and wait for in-flight requests.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
        self.task.await.context("metrics exporter task panicked")?
    }
}

/// Process-level gauges of `pvwd`.
#[derive(Clone, Debug)]
pub struct DaemonMetrics {
    build_info: IntGaugeVec,
    start_time: Gauge,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let build_info = IntGaugeVec::new(
            Opts::new("pvwd_build_info", "Always 1, labelled with the daemon version"),
            &["version"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        let start_time = Gauge::with_opts(Opts::new(
            "pvwd_start_time_seconds",
            "Unix time at which the daemon started",
        ))?;
        registry.register(Box::new(start_time.clone()))?;

        Ok(Self {
            build_info,
            start_time,
        })
    }

    /// Mark the daemon as started with `version`.
    pub fn record_start(&self, version: &str) {
        self.build_info.with_label_values(&[version]).set(1);
        self.start_time.set(Utc::now().timestamp_millis() as f64 / 1000.0);
    }
}

/// Read-side metrics of the telemetry aggregator.
#[derive(Clone, Debug)]
pub struct DashboardMetrics {
    queries: IntCounterVec,
    fallbacks: IntCounterVec,
    read_seconds: Histogram,
}

impl DashboardMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let queries = IntCounterVec::new(
            Opts::new(
                "pvw_dashboard_queries_total",
                "Dashboard queries served, by query kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(queries.clone()))?;

        let fallbacks = IntCounterVec::new(
            Opts::new(
                "pvw_dashboard_fallbacks_total",
                "Queries answered with demo or empty data, by failure reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(fallbacks.clone()))?;

        let buckets = prometheus::exponential_buckets(0.0001, 2.0, 14)
            .context("failed to construct histogram buckets")?;
        let read_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "pvw_dashboard_read_seconds",
                "Time spent refreshing the event log index",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(read_seconds.clone()))?;

        Ok(Self {
            queries,
            fallbacks,
            read_seconds,
        })
    }

    pub fn record_query(&self, kind: &str) {
        self.queries.with_label_values(&[kind]).inc();
    }

    pub fn record_fallback(&self, reason: &str) {
        self.fallbacks.with_label_values(&[reason]).inc();
    }

    pub fn observe_read(&self, seconds: f64) {
        self.read_seconds.observe(seconds);
    }
}

/// Lifecycle metrics of the simulation supervisor.
#[derive(Clone, Debug)]
pub struct SimulationMetrics {
    control: IntCounterVec,
    exits: IntCounterVec,
    running: IntGauge,
}

impl SimulationMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let control = IntCounterVec::new(
            Opts::new(
                "pvw_simulation_control_total",
                "Start/stop requests by action and outcome",
            ),
            &["action", "outcome"],
        )?;
        registry.register(Box::new(control.clone()))?;

        let exits = IntCounterVec::new(
            Opts::new(
                "pvw_simulation_exits_total",
                "Simulation process exits observed, by result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(exits.clone()))?;

        let running = IntGauge::with_opts(Opts::new(
            "pvw_simulation_running",
            "Indicator (0/1) whether a simulation process handle is held",
        ))?;
        registry.register(Box::new(running.clone()))?;

        Ok(Self {
            control,
            exits,
            running,
        })
    }

    pub fn record_control(&self, action: &str, outcome: &str) {
        self.control.with_label_values(&[action, outcome]).inc();
    }

    pub fn record_exit(&self, result: &str) {
        self.exits.with_label_values(&[result]).inc();
    }

    pub fn set_running(&self, running: bool) {
        self.running.set(if running { 1 } else { 0 });
    }
}

pub use prometheus;
