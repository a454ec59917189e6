//! The Topology Graph Engine: the typed node/edge model synthesized
//! from cluster watcher snapshots, flow metrics and probe results.
//!
//! The current graph is published as a single [`ArcSwap`] snapshot;
//! readers get a lock-free, consistent `Arc<Topology>` without
//! blocking the refresh writer.

pub mod synth;

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};

use crate::flows::{FlowMetric, PairKey};
use crate::probes::ProbeResult;
use crate::watcher::{Endpoints, NetworkPolicy, Node, Pod, Service};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Pod,
    Service,
    Node,
    Namespace,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Degraded,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeType {
    Connection,
    Service,
    Policy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ingress,
    Egress,
    Bidirectional,
}

#[derive(Debug, Clone)]
pub struct FlowData {
    pub bytes_per_sec: f64,
    pub packets_per_sec: f64,
    pub connection_count: u64,
    pub error_rate: f64,
    pub protocol: crate::flows::record::Protocol,
    pub last_seen: DateTime<Utc>,
    pub is_active: bool,
    pub direction: Direction,
}

impl From<&FlowMetric> for FlowData {
    fn from(metric: &FlowMetric) -> Self {
        Self {
            bytes_per_sec: metric.bytes_per_sec,
            packets_per_sec: metric.packets_per_sec,
            connection_count: metric.connection_count,
            error_rate: metric.error_rate,
            protocol: metric.protocol,
            last_seen: metric.last_seen,
            is_active: metric.is_active,
            direction: match metric.direction {
                crate::flows::record::Direction::Ingress => Direction::Ingress,
                crate::flows::record::Direction::Egress => Direction::Egress,
                crate::flows::record::Direction::Bidirectional => Direction::Bidirectional,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub node_type: NodeType,
    pub health: Health,
    pub namespace: Option<String>,
    pub pod_ip: Option<String>,
    pub node_name: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub edge_type: EdgeType,
    pub health: Health,
    pub latency_ms: Option<f64>,
    pub packet_loss: Option<f64>,
    pub flow_data: Option<FlowData>,
}

impl GraphEdge {
    pub fn edge_id(source_id: &str, target_id: &str, edge_type: EdgeType) -> String {
        let kind = match edge_type {
            EdgeType::Connection => "connection",
            EdgeType::Service => "service",
            EdgeType::Policy => "policy",
        };
        format!("{kind}:{source_id}->{target_id}")
    }
}

#[derive(Debug, Clone)]
pub struct Topology {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub timestamp: DateTime<Utc>,
}

/// Everything the synthesis pass needs, gathered up front so it runs
/// against one consistent set of snapshots.
pub struct SynthInputs {
    pub pods: Vec<Pod>,
    pub services: Vec<Service>,
    pub endpoints: Vec<Endpoints>,
    pub nodes: Vec<Node>,
    pub network_policies: Vec<NetworkPolicy>,
    pub flow_metrics: BTreeMap<PairKey, FlowMetric>,
    pub probe_results: Vec<ProbeResult>,
}

pub struct TopologyGraphEngine {
    current: ArcSwap<Topology>,
}

impl Default for TopologyGraphEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyGraphEngine {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::new(Arc::new(Topology {
                nodes: Vec::new(),
                edges: Vec::new(),
                timestamp: Utc::now(),
            })),
        }
    }

    /// Rebuild the graph from scratch against `inputs` and publish it.
    /// This is the engine's only mutation path: `Upsert<Kind>` in the
    /// original design collapses to "refresh from the latest snapshot",
    /// since the watcher already owns authoritative per-kind state and
    /// a full resynthesis is cheap relative to the refresh interval.
    pub fn refresh(&self, inputs: SynthInputs) {
        let topology = synth::build_topology(inputs);
        self.current.store(Arc::new(topology));
    }

    /// An immutable snapshot of the current graph.
    pub fn get_topology(&self) -> Arc<Topology> {
        self.current.load_full()
    }

    /// Upsert flow data onto an existing `connection` edge, or create
    /// one between the two endpoints if absent. Used for the narrow
    /// path where a new flow observation should be visible before the
    /// next full refresh.
    pub fn update_edge_flow_data(&self, source_id: &str, target_id: &str, flow_data: FlowData) {
        let current = self.current.load_full();
        let mut topology = (*current).clone();
        let edge_id = GraphEdge::edge_id(source_id, target_id, EdgeType::Connection);

        if let Some(edge) = topology.edges.iter_mut().find(|e| e.id == edge_id) {
            edge.health = if flow_data.error_rate > 0.5 { Health::Degraded } else { Health::Healthy };
            edge.flow_data = Some(flow_data);
        } else {
            topology.edges.push(GraphEdge {
                id: edge_id,
                source_id: source_id.to_string(),
                target_id: target_id.to_string(),
                edge_type: EdgeType::Connection,
                health: if flow_data.error_rate > 0.5 { Health::Degraded } else { Health::Healthy },
                latency_ms: None,
                packet_loss: None,
                flow_data: Some(flow_data),
            });
        }

        self.current.store(Arc::new(topology));
    }

    /// Edges whose attached flow data is currently active.
    pub fn get_active_flows(&self) -> Vec<GraphEdge> {
        self.current
            .load_full()
            .edges
            .iter()
            .filter(|e| e.flow_data.as_ref().is_some_and(|f| f.is_active))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_engine_has_empty_topology() {
        let engine = TopologyGraphEngine::new();
        let topology = engine.get_topology();
        assert!(topology.nodes.is_empty());
        assert!(topology.edges.is_empty());
    }

    #[test]
    fn update_edge_flow_data_creates_then_updates() {
        let engine = TopologyGraphEngine::new();
        let flow_data = FlowData {
            bytes_per_sec: 100.0,
            packets_per_sec: 10.0,
            connection_count: 1,
            error_rate: 0.0,
            protocol: crate::flows::record::Protocol::Tcp,
            last_seen: Utc::now(),
            is_active: true,
            direction: Direction::Egress,
        };
        engine.update_edge_flow_data("pod/default/a", "pod/default/b", flow_data.clone());
        assert_eq!(engine.get_topology().edges.len(), 1);

        engine.update_edge_flow_data("pod/default/a", "pod/default/b", flow_data);
        assert_eq!(engine.get_topology().edges.len(), 1);
    }

    #[test]
    fn get_active_flows_filters_inactive() {
        let engine = TopologyGraphEngine::new();
        let active = FlowData {
            bytes_per_sec: 1.0,
            packets_per_sec: 1.0,
            connection_count: 1,
            error_rate: 0.0,
            protocol: crate::flows::record::Protocol::Tcp,
            last_seen: Utc::now(),
            is_active: true,
            direction: Direction::Egress,
        };
        let mut inactive = active.clone();
        inactive.is_active = false;

        engine.update_edge_flow_data("pod/default/a", "pod/default/b", active);
        engine.update_edge_flow_data("pod/default/a", "pod/default/c", inactive);

        assert_eq!(engine.get_active_flows().len(), 1);
    }
}
