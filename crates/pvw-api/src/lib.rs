//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Networking API surface for the dashboard."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---

use std::fmt;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::{get, get_service, post};
use axum::{Json, Router};
use chrono::Utc;
use pvw_aggregator::{DashboardSnapshot, TelemetryAggregator, WindowEntry};
use pvw_supervisor::{ControlOutcome, SimulationReport, SimulationSupervisor};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared API state exposed to handlers.
pub struct ApiState {
    aggregator: Arc<TelemetryAggregator>,
    supervisor: SimulationSupervisor,
    version: String,
    start: Instant,
    poll_interval: Duration,
}

impl ApiState {
    pub fn new(
        aggregator: Arc<TelemetryAggregator>,
        supervisor: SimulationSupervisor,
        version: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            aggregator,
            supervisor,
            version: version.into(),
            start: Instant::now(),
            poll_interval,
        }
    }

    fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok",
            version: self.version.clone(),
            uptime_seconds: self.start.elapsed().as_secs(),
            poll_interval_seconds: self.poll_interval.as_secs(),
        }
    }
}

impl fmt::Debug for ApiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiState")
            .field("version", &self.version)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// Handle to the running API server.
#[derive(Debug)]
pub struct ApiServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ApiServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

/// Build the dashboard router, optionally serving static assets for other paths.
pub fn router(state: Arc<ApiState>, static_dir: Option<PathBuf>) -> Router {
    let api_routes = Router::new()
        .route("/api/dashboard-data", get(get_dashboard_data))
        .route("/api/realtime-stream", get(get_realtime_stream))
        .route("/api/start-simulation", post(post_start_simulation))
        .route("/api/stop-simulation", post(post_stop_simulation))
        .route("/api/simulation", get(get_simulation))
        .route("/api/health", get(get_health))
        .with_state(state);

    if let Some(dir) = static_dir {
        let service = get_service(ServeDir::new(dir).append_index_html_on_directories(true));
        Router::new()
            .merge(api_routes)
            .fallback_service(service)
            .layer(TraceLayer::new_for_http())
    } else {
        api_routes.layer(TraceLayer::new_for_http())
    }
}

/// Spawn the REST API with optional static asset hosting.
pub fn spawn_api_server(
    state: Arc<ApiState>,
    addr: SocketAddr,
    static_dir: Option<PathBuf>,
) -> Result<ApiServer> {
    let router = router(state, static_dir);

    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind API listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure API listener as non-blocking")?;
    let addr = listener
        .local_addr()
        .context("failed to read API listener address")?;
    let tcp_listener =
        TcpListener::from_std(listener).context("failed to create tokio listener")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %addr, "api server listening");
        if let Err(err) = axum::serve(tcp_listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            error!(address = %addr, error = %err, "api server exited with error");
            return Err(err.into());
        }
        Ok(())
    });

    Ok(ApiServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: String,
    uptime_seconds: u64,
    poll_interval_seconds: u64,
}

#[derive(Debug, Serialize)]
struct RealtimeResponse {
    success: bool,
    data: Vec<WindowEntry>,
    timestamp: String,
}

async fn get_dashboard_data(State(state): State<Arc<ApiState>>) -> Json<DashboardSnapshot> {
    let aggregator = Arc::clone(&state.aggregator);
    let snapshot = match tokio::task::spawn_blocking(move || aggregator.snapshot()).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(error = %err, "snapshot task failed; serving demo data");
            DashboardSnapshot::demo()
        }
    };
    Json(snapshot)
}

async fn get_realtime_stream(State(state): State<Arc<ApiState>>) -> Json<RealtimeResponse> {
    let aggregator = Arc::clone(&state.aggregator);
    let data = match tokio::task::spawn_blocking(move || aggregator.recent_window()).await {
        Ok(window) => window,
        Err(err) => {
            warn!(error = %err, "window task failed; serving empty window");
            Vec::new()
        }
    };
    Json(RealtimeResponse {
        success: true,
        data,
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn post_start_simulation(State(state): State<Arc<ApiState>>) -> Json<ControlOutcome> {
    Json(state.supervisor.start())
}

async fn post_stop_simulation(State(state): State<Arc<ApiState>>) -> Json<ControlOutcome> {
    Json(state.supervisor.stop())
}

async fn get_simulation(State(state): State<Arc<ApiState>>) -> Json<SimulationReport> {
    Json(state.supervisor.report())
}

async fn get_health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(state.health())
}
