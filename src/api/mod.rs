//! HTTP/JSON + WebSocket adapter surface (§6). Read-only except
//! `/api/simulate`, which evaluates a hypothetical change without
//! mutating any live state.

pub mod dto;
pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::analyzer::Analyzer;
use crate::anomaly::AnomalyDetector;
use crate::config::Config;
use crate::flows::FlowCollector;
use crate::graph::TopologyGraphEngine;
use crate::probes::ProbeScheduler;
use crate::watcher::ClusterWatcher;

pub struct AppState {
    pub config: Config,
    pub watcher: Arc<ClusterWatcher>,
    pub flows: Option<Arc<FlowCollector>>,
    pub anomaly: Arc<AnomalyDetector>,
    pub probes: Arc<ProbeScheduler>,
    pub graph: Arc<TopologyGraphEngine>,
    pub analyzer: Arc<Analyzer>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/topology", get(handlers::topology))
        .route("/api/nodes", get(handlers::nodes))
        .route("/api/pods", get(handlers::pods))
        .route("/api/services", get(handlers::services))
        .route("/api/policies", get(handlers::policies))
        .route("/api/probes", get(handlers::probes))
        .route("/api/issues", get(handlers::issues))
        .route("/api/flows", get(handlers::flows))
        .route("/api/flows/metrics", get(handlers::flow_metrics))
        .route("/api/flows/active", get(handlers::flows_active))
        .route("/api/flows/anomalies", get(handlers::anomalies))
        .route("/api/simulate", post(handlers::simulate))
        .route("/ws/flows", get(handlers::ws_flows))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until `addr` fails to bind; runs forever otherwise
/// (axum handles graceful shutdown via the passed future).
pub async fn serve(addr: &str, state: Arc<AppState>, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> crate::Result<()> {
    let app = router(state);
    let bind_addr = if let Some(port) = addr.strip_prefix(':') { format!("0.0.0.0:{port}") } else { addr.to_string() };
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.map_err(crate::NetobserveError::Io)?;
    info!(%addr, "HTTP API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(crate::NetobserveError::Io)
}
