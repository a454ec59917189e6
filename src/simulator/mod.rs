//! The Simulator: pure-functional evaluation of hypothetical
//! NetworkPolicy, pod, and node changes against the current graph
//! snapshot. Never mutates live state.

pub mod narrator;
pub mod remediation;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::{EdgeType, GraphEdge, Topology};
use crate::ids;
use crate::watcher::{NetworkPolicy, Pod};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowState {
    Allowed,
    Blocked,
    Rerouted,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowImpact {
    pub edge_id: String,
    pub before: FlowState,
    pub after: FlowState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImpactSummary {
    pub affected_pods: usize,
    pub blocked_connections: usize,
    pub affected_services: usize,
    pub critical_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub flows: Vec<FlowImpact>,
    pub impact: ImpactSummary,
    pub recommendations: Vec<String>,
    pub summary: String,
    pub narrative: Option<String>,
    pub risk: Risk,
    pub timestamp: DateTime<Utc>,
}

/// Edges whose destination id contains one of these substrings are
/// treated as critical paths (§4.7 heuristic).
const CRITICAL_PATH_SUBSTRINGS: [&str; 3] = ["database", "auth", "payment"];

fn is_critical_destination(dest_id: &str) -> bool {
    CRITICAL_PATH_SUBSTRINGS.iter().any(|s| dest_id.contains(s))
}

pub fn simulate_network_policy(topology: &Topology, pods: &[Pod], policy: &NetworkPolicy, action: PolicyAction) -> SimulationResult {
    let matching_pods: Vec<&Pod> = pods
        .iter()
        .filter(|p| p.namespace == policy.namespace && policy.selects(&p.labels))
        .collect();
    let matching_ids: std::collections::BTreeSet<String> = matching_pods.iter().map(|p| ids::pod(&p.namespace, &p.name)).collect();

    let mut flows = Vec::new();
    let mut blocked = 0usize;
    let mut affected_services: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    let mut critical_paths = Vec::new();

    for edge in &topology.edges {
        if !matching_ids.contains(&edge.source_id) && !matching_ids.contains(&edge.target_id) {
            continue;
        }

        let would_allow = policy_permits(policy, edge);
        let (before, after) = match action {
            PolicyAction::Add => (FlowState::Allowed, if would_allow { FlowState::Allowed } else { FlowState::Blocked }),
            PolicyAction::Remove => (FlowState::Allowed, FlowState::Allowed),
        };

        if after == FlowState::Blocked {
            blocked += 1;
            if is_critical_destination(&edge.target_id) {
                critical_paths.push(edge.target_id.clone());
            }
        }
        if matches!(edge.edge_type, EdgeType::Service) {
            affected_services.insert(edge.target_id.clone());
        }

        flows.push(FlowImpact { edge_id: edge.id.clone(), before, after });
    }

    let impact = ImpactSummary {
        affected_pods: matching_ids.len(),
        blocked_connections: blocked,
        affected_services: affected_services.len(),
        critical_paths,
    };

    let risk = policy_risk(&impact);
    let recommendations = remediation::for_simulation(SimulationKind::NetworkPolicy, risk);
    let summary = format!(
        "{:?} policy {}/{} affects {} pod(s), blocking {} connection(s)",
        action, policy.namespace, policy.name, impact.affected_pods, impact.blocked_connections
    );

    SimulationResult { flows, impact, recommendations, summary, narrative: None, risk, timestamp: Utc::now() }
}

fn policy_permits(policy: &NetworkPolicy, edge: &GraphEdge) -> bool {
    // A policy with no rules of the relevant direction denies all
    // traffic in that direction; an empty peer selector on a rule
    // permits any peer.
    if policy.ingress_rules.is_empty() && policy.egress_rules.is_empty() {
        return false;
    }
    policy
        .ingress_rules
        .iter()
        .chain(policy.egress_rules.iter())
        .any(|rule| rule.peer_selector.is_none())
}

fn policy_risk(impact: &ImpactSummary) -> Risk {
    if !impact.critical_paths.is_empty() {
        Risk::Critical
    } else if impact.blocked_connections > 10 || impact.affected_pods > 20 {
        Risk::High
    } else if impact.blocked_connections > 5 || impact.affected_pods > 10 {
        Risk::Medium
    } else {
        Risk::Low
    }
}

pub fn simulate_pod_failure(topology: &Topology, pods: &[Pod], namespace: &str, name: &str) -> SimulationResult {
    let pod_id = ids::pod(namespace, name);

    let owner = pods
        .iter()
        .find(|p| p.namespace == namespace && p.name == name)
        .and_then(|p| p.owner_reference.as_ref());

    let sibling_count = match owner {
        Some(owner) => pods
            .iter()
            .filter(|p| p.namespace == namespace && p.owner_reference.as_ref().is_some_and(|o| o.kind == owner.kind && o.name == owner.name))
            .count(),
        None => 1,
    };

    let mut flows = Vec::new();
    let mut blocked = 0usize;
    let mut critical_paths = Vec::new();

    for edge in &topology.edges {
        if edge.source_id != pod_id && edge.target_id != pod_id {
            continue;
        }
        blocked += 1;
        if is_critical_destination(&edge.target_id) {
            critical_paths.push(edge.target_id.clone());
        }
        flows.push(FlowImpact { edge_id: edge.id.clone(), before: FlowState::Allowed, after: FlowState::Failed });
    }

    let impact = ImpactSummary { affected_pods: 1, blocked_connections: blocked, affected_services: 0, critical_paths };

    let risk = if sibling_count <= 1 {
        Risk::Critical
    } else if sibling_count == 2 {
        Risk::High
    } else {
        Risk::Low
    };

    let recommendations = remediation::for_simulation(SimulationKind::PodFailure, risk);
    let summary = format!("Failure of {pod_id} leaves {} sibling replica(s)", sibling_count.saturating_sub(1));

    SimulationResult { flows, impact, recommendations, summary, narrative: None, risk, timestamp: Utc::now() }
}

pub fn simulate_node_failure(topology: &Topology, pods: &[Pod], node_name: &str) -> SimulationResult {
    let node_pods: Vec<&Pod> = pods.iter().filter(|p| p.node_name.as_deref() == Some(node_name)).collect();

    let mut owners: BTreeMap<(String, String), (usize, usize)> = BTreeMap::new();
    for pod in pods {
        if let Some(owner) = &pod.owner_reference {
            let key = (owner.kind.clone(), owner.name.clone());
            let entry = owners.entry(key).or_insert((0, 0));
            entry.0 += 1;
            if pod.node_name.as_deref() == Some(node_name) {
                entry.1 += 1;
            }
        }
    }

    let mut critical_paths = Vec::new();
    for ((kind, name), (total, on_node)) in &owners {
        if *on_node > 0 && *total == *on_node {
            critical_paths.push(format!("{kind}/{name}"));
        }
    }

    let node_pod_ids: std::collections::BTreeSet<String> = node_pods.iter().map(|p| ids::pod(&p.namespace, &p.name)).collect();
    let mut flows = Vec::new();
    let mut blocked = 0usize;
    for edge in &topology.edges {
        if node_pod_ids.contains(&edge.source_id) || node_pod_ids.contains(&edge.target_id) {
            blocked += 1;
            flows.push(FlowImpact { edge_id: edge.id.clone(), before: FlowState::Allowed, after: FlowState::Failed });
        }
    }

    let impact = ImpactSummary { affected_pods: node_pods.len(), blocked_connections: blocked, affected_services: 0, critical_paths: critical_paths.clone() };

    let risk = if !critical_paths.is_empty() {
        Risk::Critical
    } else if node_pods.len() > 10 {
        Risk::High
    } else {
        Risk::Medium
    };

    let recommendations = remediation::for_simulation(SimulationKind::NodeFailure, risk);
    let summary = format!("Failure of node {node_name} affects {} pod(s) across {} owner(s) with no remaining replica", node_pods.len(), critical_paths.len());

    SimulationResult { flows, impact, recommendations, summary, narrative: None, risk, timestamp: Utc::now() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationKind {
    NetworkPolicy,
    PodFailure,
    NodeFailure,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeType, GraphEdge, Health};
    use std::collections::BTreeMap as Map;

    fn topology_with_edge(source: &str, target: &str, edge_type: EdgeType) -> Topology {
        Topology {
            nodes: vec![],
            edges: vec![GraphEdge {
                id: format!("{source}->{target}"),
                source_id: source.to_string(),
                target_id: target.to_string(),
                edge_type,
                health: Health::Healthy,
                latency_ms: None,
                packet_loss: None,
                flow_data: None,
            }],
            timestamp: Utc::now(),
        }
    }

    fn sample_pod(namespace: &str, name: &str, labels: Map<String, String>) -> Pod {
        Pod {
            namespace: namespace.into(),
            name: name.into(),
            phase: crate::watcher::PodPhase::Running,
            phase_reason: None,
            pod_ip: Some("10.0.0.1".into()),
            node_name: Some("node-1".into()),
            labels,
            container_statuses: vec![],
            owner_reference: None,
            created_at: None,
        }
    }

    #[test]
    fn pod_failure_sole_replica_is_critical() {
        let topology = topology_with_edge("pod/ns/p", "pod/ns/database-0", EdgeType::Connection);
        let pods = vec![sample_pod("ns", "p", Map::new())];
        let result = simulate_pod_failure(&topology, &pods, "ns", "p");
        assert_eq!(result.risk, Risk::Critical);
        assert_eq!(result.impact.critical_paths.len(), 1);
    }

    #[test]
    fn policy_without_rules_blocks_all_matched_edges() {
        let topology = topology_with_edge("pod/ns/p", "pod/ns/q", EdgeType::Connection);
        let mut labels = Map::new();
        labels.insert("app".to_string(), "p".to_string());
        let pods = vec![sample_pod("ns", "p", labels.clone())];
        let policy = NetworkPolicy {
            namespace: "ns".into(),
            name: "deny-all".into(),
            pod_selector: labels,
            policy_types: vec![crate::watcher::PolicyType::Ingress],
            ingress_rules: vec![],
            egress_rules: vec![],
        };
        let result = simulate_network_policy(&topology, &pods, &policy, PolicyAction::Add);
        assert_eq!(result.impact.blocked_connections, 1);
        assert_eq!(result.risk, Risk::Low);
    }
}
