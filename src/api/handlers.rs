//! One handler per route in [`super::router`].

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use tracing::debug;

use super::dto::*;
use super::AppState;
use crate::anomaly::Severity;
use crate::simulator::{self, narrator::Narrator, PolicyAction};
use crate::watcher::NetworkPolicy;

pub async fn health() -> &'static str {
    "ok"
}

pub async fn topology(State(state): State<Arc<AppState>>) -> Json<TopologyDto> {
    Json(TopologyDto::from(&*state.graph.get_topology()))
}

pub async fn nodes(State(state): State<Arc<AppState>>) -> Json<Vec<NodeInfoDto>> {
    Json(state.watcher.get_nodes().await.iter().map(NodeInfoDto::from).collect())
}

pub async fn pods(State(state): State<Arc<AppState>>) -> Json<Vec<PodDto>> {
    Json(state.watcher.get_pods().await.iter().map(PodDto::from).collect())
}

pub async fn services(State(state): State<Arc<AppState>>) -> Json<Vec<ServiceDto>> {
    Json(state.watcher.get_services().await.iter().map(ServiceDto::from).collect())
}

pub async fn policies(State(state): State<Arc<AppState>>) -> Json<Vec<PolicyDto>> {
    Json(state.watcher.get_network_policies().await.iter().map(PolicyDto::from).collect())
}

pub async fn probes(State(state): State<Arc<AppState>>) -> Json<Vec<ProbeResultDto>> {
    let results = state.probes.get_recent_results(std::time::Duration::from_secs(3600)).await;
    Json(results.iter().map(ProbeResultDto::from).collect())
}

pub async fn issues(State(state): State<Arc<AppState>>) -> Json<Vec<crate::analyzer::Issue>> {
    Json(state.analyzer.get_issues().await)
}

#[derive(Deserialize)]
pub struct FlowsQuery {
    limit: Option<usize>,
}

pub async fn flows(State(state): State<Arc<AppState>>, Query(query): Query<FlowsQuery>) -> Json<Vec<FlowDto>> {
    let limit = query.limit.unwrap_or(100);
    let Some(flows) = &state.flows else { return Json(Vec::new()) };
    Json(flows.get_flows(limit).await.iter().map(|f| FlowDto::from(f.as_ref())).collect())
}

pub async fn flow_metrics(State(state): State<Arc<AppState>>) -> Json<HashMap<String, serde_json::Value>> {
    let Some(flows) = &state.flows else { return Json(HashMap::new()) };
    let metrics = flows.get_flow_metrics().await;
    let out = metrics
        .into_iter()
        .map(|((source, dest), metric)| {
            (
                format!("{source}->{dest}"),
                serde_json::json!({
                    "bytes_per_sec": metric.bytes_per_sec,
                    "packets_per_sec": metric.packets_per_sec,
                    "connection_count": metric.connection_count,
                    "error_rate": metric.error_rate,
                    "is_active": metric.is_active,
                }),
            )
        })
        .collect();
    Json(out)
}

pub async fn flows_active(State(state): State<Arc<AppState>>) -> Json<Vec<EdgeDto>> {
    Json(state.graph.get_active_flows().iter().map(EdgeDto::from).collect())
}

#[derive(Deserialize)]
pub struct AnomaliesQuery {
    severity: Option<String>,
}

pub async fn anomalies(State(state): State<Arc<AppState>>, Query(query): Query<AnomaliesQuery>) -> Json<Vec<AnomalyDto>> {
    let anomalies = match query.severity.as_deref() {
        Some("critical") => state.anomaly.get_anomalies_by_severity(Severity::Critical).await,
        Some("high") => state.anomaly.get_anomalies_by_severity(Severity::High).await,
        Some("medium") => state.anomaly.get_anomalies_by_severity(Severity::Medium).await,
        Some("low") => state.anomaly.get_anomalies_by_severity(Severity::Low).await,
        _ => state.anomaly.get_anomalies(1_000).await,
    };
    Json(anomalies.iter().map(AnomalyDto::from).collect())
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimulateRequest {
    NetworkPolicy { policy: NetworkPolicy, action: PolicyAction },
    PodFailure { namespace: String, name: String },
    NodeFailure { name: String },
}

pub async fn simulate(State(state): State<Arc<AppState>>, Json(request): Json<SimulateRequest>) -> Result<Json<simulator::SimulationResult>, (StatusCode, String)> {
    let pods = state.watcher.get_pods().await;
    let topology = state.graph.get_topology();

    let mut result = match request {
        SimulateRequest::NetworkPolicy { policy, action } => simulator::simulate_network_policy(&topology, &pods, &policy, action),
        SimulateRequest::PodFailure { namespace, name } => simulator::simulate_pod_failure(&topology, &pods, &namespace, &name),
        SimulateRequest::NodeFailure { name } => simulator::simulate_node_failure(&topology, &pods, &name),
    };

    if let Some(api_key) = &state.config.ai_api_key {
        if let Ok(narrator) = crate::simulator::narrator::HttpNarrator::new(
            "https://api.openai.com/v1/completions".to_string(),
            api_key.clone(),
            std::time::Duration::from_secs(10),
        ) {
            match narrator.narrate(&result).await {
                Ok(narrative) => result.narrative = Some(narrative),
                Err(e) => debug!(error = %e, "narrator call failed, returning simulation without narrative"),
            }
        }
    }

    Ok(Json(result))
}

pub async fn ws_flows(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_flow_socket(socket, state))
}

async fn handle_flow_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let Some(flows) = &state.flows else {
        let _ = socket.send(Message::Close(None)).await;
        return;
    };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = flows.aggregator.subscribe_callback(move |flow| {
        let _ = tx.send(flow);
    });

    while let Some(flow) = rx.recv().await {
        let dto = FlowDto::from(flow.as_ref());
        let Ok(json) = serde_json::to_string(&dto) else { continue };
        if socket.send(Message::Text(json)).await.is_err() {
            break;
        }
    }

    handle.abort();
}
