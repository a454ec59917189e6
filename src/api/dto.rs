//! UI-facing DTOs projected from cache/graph/detector snapshots. Kept
//! separate from the domain types so the wire format can evolve
//! independently of internal representations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::anomaly::Anomaly;
use crate::flows::Flow;
use crate::graph::{EdgeType, GraphEdge, GraphNode, Health, NodeType, Topology};
use crate::probes::ProbeResult;
use crate::watcher::{NetworkPolicy, Node, Pod, Service};

#[derive(Debug, Serialize)]
pub struct NodeDto {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: &'static str,
    pub health: &'static str,
    pub namespace: Option<String>,
    pub pod_ip: Option<String>,
    pub node_name: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub properties: BTreeMap<String, String>,
}

impl From<&GraphNode> for NodeDto {
    fn from(node: &GraphNode) -> Self {
        Self {
            id: node.id.clone(),
            node_type: node_type_str(node.node_type),
            health: health_str(node.health),
            namespace: node.namespace.clone(),
            pod_ip: node.pod_ip.clone(),
            node_name: node.node_name.clone(),
            labels: node.labels.clone(),
            properties: node.properties.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EdgeDto {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    #[serde(rename = "type")]
    pub edge_type: &'static str,
    pub health: &'static str,
    pub latency_ms: Option<f64>,
    pub packet_loss: Option<f64>,
    pub bytes_per_sec: Option<f64>,
    pub is_active: Option<bool>,
}

impl From<&GraphEdge> for EdgeDto {
    fn from(edge: &GraphEdge) -> Self {
        Self {
            id: edge.id.clone(),
            source_id: edge.source_id.clone(),
            target_id: edge.target_id.clone(),
            edge_type: edge_type_str(edge.edge_type),
            health: health_str(edge.health),
            latency_ms: edge.latency_ms,
            packet_loss: edge.packet_loss,
            bytes_per_sec: edge.flow_data.as_ref().map(|f| f.bytes_per_sec),
            is_active: edge.flow_data.as_ref().map(|f| f.is_active),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TopologyDto {
    pub nodes: Vec<NodeDto>,
    pub edges: Vec<EdgeDto>,
    pub timestamp: DateTime<Utc>,
}

impl From<&Topology> for TopologyDto {
    fn from(topology: &Topology) -> Self {
        Self {
            nodes: topology.nodes.iter().map(NodeDto::from).collect(),
            edges: topology.edges.iter().map(EdgeDto::from).collect(),
            timestamp: topology.timestamp,
        }
    }
}

fn node_type_str(t: NodeType) -> &'static str {
    match t {
        NodeType::Pod => "pod",
        NodeType::Service => "service",
        NodeType::Node => "node",
        NodeType::Namespace => "namespace",
        NodeType::External => "external",
    }
}

fn edge_type_str(t: EdgeType) -> &'static str {
    match t {
        EdgeType::Connection => "connection",
        EdgeType::Service => "service",
        EdgeType::Policy => "policy",
    }
}

fn health_str(h: Health) -> &'static str {
    match h {
        Health::Healthy => "healthy",
        Health::Degraded => "degraded",
        Health::Failed => "failed",
        Health::Unknown => "unknown",
    }
}

#[derive(Debug, Serialize)]
pub struct PodDto {
    pub namespace: String,
    pub name: String,
    pub phase: &'static str,
    pub pod_ip: Option<String>,
    pub node_name: Option<String>,
    pub restart_count: u32,
}

impl From<&Pod> for PodDto {
    fn from(pod: &Pod) -> Self {
        Self {
            namespace: pod.namespace.clone(),
            name: pod.name.clone(),
            phase: match pod.phase {
                crate::watcher::PodPhase::Pending => "pending",
                crate::watcher::PodPhase::Running => "running",
                crate::watcher::PodPhase::Failed => "failed",
                crate::watcher::PodPhase::Succeeded => "succeeded",
                crate::watcher::PodPhase::Unknown => "unknown",
            },
            pod_ip: pod.pod_ip.clone(),
            node_name: pod.node_name.clone(),
            restart_count: pod.restart_count(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ServiceDto {
    pub namespace: String,
    pub name: String,
    pub cluster_ip: Option<String>,
    pub ports: Vec<u16>,
}

impl From<&Service> for ServiceDto {
    fn from(service: &Service) -> Self {
        Self {
            namespace: service.namespace.clone(),
            name: service.name.clone(),
            cluster_ip: service.cluster_ip.clone(),
            ports: service.ports.iter().map(|p| p.port).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NodeInfoDto {
    pub name: String,
    pub ready: bool,
    pub pod_cidr: Option<String>,
    pub internal_ip: Option<String>,
}

impl From<&Node> for NodeInfoDto {
    fn from(node: &Node) -> Self {
        Self { name: node.name.clone(), ready: node.ready, pod_cidr: node.pod_cidr.clone(), internal_ip: node.internal_ip.clone() }
    }
}

#[derive(Debug, Serialize)]
pub struct PolicyDto {
    pub namespace: String,
    pub name: String,
    pub policy_types: Vec<&'static str>,
}

impl From<&NetworkPolicy> for PolicyDto {
    fn from(policy: &NetworkPolicy) -> Self {
        Self {
            namespace: policy.namespace.clone(),
            name: policy.name.clone(),
            policy_types: policy
                .policy_types
                .iter()
                .map(|t| match t {
                    crate::watcher::PolicyType::Ingress => "ingress",
                    crate::watcher::PolicyType::Egress => "egress",
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProbeResultDto {
    pub timestamp: DateTime<Utc>,
    pub source_pod_id: String,
    pub target_id: Option<String>,
    pub target_ip: String,
    pub target_port: u16,
    pub probe_type: &'static str,
    pub success: bool,
    pub latency_ms: Option<f64>,
    pub error: Option<String>,
}

impl From<&ProbeResult> for ProbeResultDto {
    fn from(result: &ProbeResult) -> Self {
        Self {
            timestamp: result.timestamp,
            source_pod_id: result.source_pod_id.clone(),
            target_id: result.target_id.clone(),
            target_ip: result.target_ip.clone(),
            target_port: result.target_port,
            probe_type: result.probe_type.as_str(),
            success: result.success,
            latency_ms: result.latency_ms,
            error: result.error.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FlowDto {
    pub id: String,
    pub source_pod_id: Option<String>,
    pub dest_pod_id: Option<String>,
    pub protocol: &'static str,
    pub bytes_sent: u64,
    pub verdict: &'static str,
    pub timestamp: DateTime<Utc>,
}

impl From<&Flow> for FlowDto {
    fn from(flow: &Flow) -> Self {
        Self {
            id: flow.id.clone(),
            source_pod_id: flow.source_pod_id.clone(),
            dest_pod_id: flow.dest_pod_id.clone(),
            protocol: flow.protocol.as_str(),
            bytes_sent: flow.bytes_sent,
            verdict: flow.verdict.as_str(),
            timestamp: flow.timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AnomalyDto {
    pub id: String,
    #[serde(rename = "type")]
    pub anomaly_type: &'static str,
    pub severity: &'static str,
    pub title: String,
    pub description: String,
    pub source_pod_id: String,
    pub dest_pod_id: Option<String>,
    pub score: f64,
    pub detected_at: DateTime<Utc>,
}

impl From<&Anomaly> for AnomalyDto {
    fn from(anomaly: &Anomaly) -> Self {
        Self {
            id: anomaly.id.clone(),
            anomaly_type: anomaly.anomaly_type.as_str(),
            severity: anomaly.severity.as_str(),
            title: anomaly.title.clone(),
            description: anomaly.description.clone(),
            source_pod_id: anomaly.source_pod_id.clone(),
            dest_pod_id: anomaly.dest_pod_id.clone(),
            score: anomaly.score,
            detected_at: anomaly.detected_at,
        }
    }
}
