//! Edge synthesis: the three rules that turn watcher snapshots, flow
//! metrics and probe results into a [`Topology`].
//!
//! Duplicate `(source, target, type)` triples are resolved
//! last-writer-wins: later rule passes (and, within a pass, later
//! iteration order) overwrite earlier insertions via a map keyed by
//! edge id, flattened to a vec only at the end.

use std::collections::BTreeMap;

use crate::ids;

use super::{Direction, EdgeType, FlowData, GraphEdge, GraphNode, Health, NodeType, SynthInputs, Topology};

pub fn build_topology(inputs: SynthInputs) -> Topology {
    let mut nodes: BTreeMap<String, GraphNode> = BTreeMap::new();
    let mut edges: BTreeMap<String, GraphEdge> = BTreeMap::new();

    for pod in &inputs.pods {
        let id = ids::pod(&pod.namespace, &pod.name);
        nodes.insert(
            id.clone(),
            GraphNode {
                id,
                node_type: NodeType::Pod,
                health: pod_health(pod),
                namespace: Some(pod.namespace.clone()),
                pod_ip: pod.pod_ip.clone(),
                node_name: pod.node_name.clone(),
                labels: pod.labels.clone(),
                properties: pod_properties(pod),
            },
        );
    }

    for service in &inputs.services {
        let id = ids::service(&service.namespace, &service.name);
        nodes.insert(
            id.clone(),
            GraphNode {
                id,
                node_type: NodeType::Service,
                health: Health::Healthy,
                namespace: Some(service.namespace.clone()),
                pod_ip: service.cluster_ip.clone(),
                node_name: None,
                labels: BTreeMap::new(),
                properties: BTreeMap::new(),
            },
        );
    }

    for node in &inputs.nodes {
        let id = ids::node(&node.name);
        nodes.insert(
            id.clone(),
            GraphNode {
                id,
                node_type: NodeType::Node,
                health: if node.ready { Health::Healthy } else { Health::Failed },
                namespace: None,
                pod_ip: node.internal_ip.clone(),
                node_name: Some(node.name.clone()),
                labels: BTreeMap::new(),
                properties: BTreeMap::new(),
            },
        );
    }

    // Rule 1: service -> ready pod, per Service/Endpoints pair.
    let pods_by_namespaced_name: BTreeMap<(&str, &str), &crate::watcher::Pod> = inputs
        .pods
        .iter()
        .map(|p| ((p.namespace.as_str(), p.name.as_str()), p))
        .collect();

    for service in &inputs.services {
        let service_id = ids::service(&service.namespace, &service.name);
        let endpoints = inputs
            .endpoints
            .iter()
            .find(|e| e.namespace == service.namespace && e.name == service.name);

        let (health, ready_pods): (Health, Vec<&str>) = match endpoints {
            Some(ep) if ep.has_ready_addresses() => (Health::Healthy, ep.ready_pod_names()),
            Some(_) => (Health::Degraded, Vec::new()),
            None => {
                let selector_matches_running_pod = inputs.pods.iter().any(|p| {
                    p.namespace == service.namespace
                        && !service.selector.is_empty()
                        && service.selector.iter().all(|(k, v)| p.labels.get(k) == Some(v))
                });
                if selector_matches_running_pod {
                    (Health::Failed, Vec::new())
                } else {
                    (Health::Degraded, Vec::new())
                }
            }
        };

        for pod_name in ready_pods {
            let Some(pod) = pods_by_namespaced_name.get(&(service.namespace.as_str(), pod_name)) else {
                continue;
            };
            let pod_id = ids::pod(&pod.namespace, &pod.name);
            let edge_id = GraphEdge::edge_id(&service_id, &pod_id, EdgeType::Service);
            edges.insert(
                edge_id.clone(),
                GraphEdge {
                    id: edge_id,
                    source_id: service_id.clone(),
                    target_id: pod_id,
                    edge_type: EdgeType::Service,
                    health,
                    latency_ms: None,
                    packet_loss: None,
                    flow_data: None,
                },
            );
        }
    }

    // Rule 2: policy -> matching pod in the same namespace.
    for policy in &inputs.network_policies {
        let policy_id = ids::network_policy(&policy.namespace, &policy.name);
        for pod in inputs.pods.iter().filter(|p| p.namespace == policy.namespace) {
            if !policy.selects(&pod.labels) {
                continue;
            }
            let pod_id = ids::pod(&pod.namespace, &pod.name);
            let edge_id = GraphEdge::edge_id(&policy_id, &pod_id, EdgeType::Policy);
            let direction = policy_direction(&policy.policy_types);
            let mut properties = BTreeMap::new();
            properties.insert("direction".to_string(), direction_str(direction).to_string());

            edges.insert(
                edge_id.clone(),
                GraphEdge {
                    id: edge_id,
                    source_id: policy_id.clone(),
                    target_id: pod_id,
                    edge_type: EdgeType::Policy,
                    health: Health::Healthy,
                    latency_ms: None,
                    packet_loss: None,
                    flow_data: None,
                },
            );
        }
    }

    // Rule 3: connection edge per active flow-metric pair, resolving
    // off-cluster endpoints to external nodes as they're encountered.
    for metric in inputs.flow_metrics.values() {
        for endpoint_id in [&metric.source_id, &metric.dest_id] {
            if endpoint_id.starts_with("external/") && !nodes.contains_key(endpoint_id) {
                nodes.insert(
                    endpoint_id.clone(),
                    GraphNode {
                        id: endpoint_id.clone(),
                        node_type: NodeType::External,
                        health: Health::Unknown,
                        namespace: None,
                        pod_ip: None,
                        node_name: None,
                        labels: BTreeMap::new(),
                        properties: BTreeMap::new(),
                    },
                );
            }
        }

        let edge_id = GraphEdge::edge_id(&metric.source_id, &metric.dest_id, EdgeType::Connection);
        let flow_data = FlowData::from(metric);
        let health = if flow_data.error_rate > 0.5 { Health::Degraded } else { Health::Healthy };

        edges.insert(
            edge_id.clone(),
            GraphEdge {
                id: edge_id,
                source_id: metric.source_id.clone(),
                target_id: metric.dest_id.clone(),
                edge_type: EdgeType::Connection,
                health,
                latency_ms: probe_latency(&inputs, &metric.source_id, &metric.dest_id),
                packet_loss: None,
                flow_data: Some(flow_data),
            },
        );
    }

    Topology {
        nodes: nodes.into_values().collect(),
        edges: edges.into_values().collect(),
        timestamp: chrono::Utc::now(),
    }
}

fn pod_health(pod: &crate::watcher::Pod) -> Health {
    use crate::watcher::PodPhase;
    match pod.phase {
        PodPhase::Running if pod.is_ready() => Health::Healthy,
        PodPhase::Running => Health::Degraded,
        PodPhase::Pending => Health::Degraded,
        PodPhase::Failed => Health::Failed,
        PodPhase::Succeeded => Health::Healthy,
        PodPhase::Unknown => Health::Unknown,
    }
}

fn pod_properties(pod: &crate::watcher::Pod) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    properties.insert("restart_count".to_string(), pod.restart_count().to_string());
    if let Some(owner) = &pod.owner_reference {
        properties.insert("owner_kind".to_string(), owner.kind.clone());
        properties.insert("owner_name".to_string(), owner.name.clone());
    }
    properties
}

fn policy_direction(policy_types: &[crate::watcher::PolicyType]) -> Direction {
    use crate::watcher::PolicyType;
    let has_ingress = policy_types.contains(&PolicyType::Ingress);
    let has_egress = policy_types.contains(&PolicyType::Egress);
    match (has_ingress, has_egress) {
        (true, true) => Direction::Bidirectional,
        (true, false) => Direction::Ingress,
        (false, true) => Direction::Egress,
        (false, false) => Direction::Bidirectional,
    }
}

fn direction_str(direction: Direction) -> &'static str {
    match direction {
        Direction::Ingress => "ingress",
        Direction::Egress => "egress",
        Direction::Bidirectional => "bidirectional",
    }
}

/// Average the most recent matching pod-to-pod probe latencies for
/// this pair, if any were recorded.
fn probe_latency(inputs: &SynthInputs, source_id: &str, target_id: &str) -> Option<f64> {
    let samples: Vec<f64> = inputs
        .probe_results
        .iter()
        .filter(|r| r.source_pod_id == source_id && r.target_id.as_deref() == Some(target_id) && r.success)
        .filter_map(|r| r.latency_ms)
        .collect();

    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::{ContainerStatus, PodPhase};
    use std::collections::BTreeMap as Map;

    fn sample_pod(name: &str, labels: &[(&str, &str)]) -> crate::watcher::Pod {
        crate::watcher::Pod {
            namespace: "default".into(),
            name: name.into(),
            phase: PodPhase::Running,
            phase_reason: None,
            pod_ip: Some("10.0.0.1".into()),
            node_name: Some("node-1".into()),
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            container_statuses: vec![ContainerStatus { name: "c".into(), ready: true, restart_count: 0 }],
            owner_reference: None,
            created_at: None,
        }
    }

    fn empty_inputs() -> SynthInputs {
        SynthInputs {
            pods: vec![],
            services: vec![],
            endpoints: vec![],
            nodes: vec![],
            network_policies: vec![],
            flow_metrics: Map::new(),
            probe_results: vec![],
        }
    }

    #[test]
    fn policy_edge_created_for_matching_pod() {
        let mut inputs = empty_inputs();
        inputs.pods.push(sample_pod("web-1", &[("app", "web")]));
        inputs.network_policies.push(crate::watcher::NetworkPolicy {
            namespace: "default".into(),
            name: "deny-all".into(),
            pod_selector: [("app".to_string(), "web".to_string())].into_iter().collect(),
            policy_types: vec![crate::watcher::PolicyType::Ingress],
            ingress_rules: vec![],
            egress_rules: vec![],
        });

        let topology = build_topology(inputs);
        assert!(topology.edges.iter().any(|e| e.edge_type == EdgeType::Policy));
    }

    #[test]
    fn service_with_no_endpoints_produces_no_edge() {
        let mut inputs = empty_inputs();
        inputs.services.push(crate::watcher::Service {
            namespace: "default".into(),
            name: "web".into(),
            service_type: crate::watcher::ServiceType::ClusterIp,
            cluster_ip: Some("10.96.0.1".into()),
            ports: vec![],
            selector: Map::new(),
        });

        let topology = build_topology(inputs);
        assert!(!topology.edges.iter().any(|e| e.edge_type == EdgeType::Service));
    }

    #[test]
    fn connection_edge_created_from_flow_metric() {
        let mut inputs = empty_inputs();
        inputs.flow_metrics.insert(
            ("pod/default/a".to_string(), "pod/default/b".to_string()),
            crate::flows::FlowMetric::new(
                "pod/default/a".into(),
                "pod/default/b".into(),
                chrono::Utc::now(),
                crate::flows::record::Protocol::Tcp,
                crate::flows::record::Direction::Egress,
            ),
        );

        let topology = build_topology(inputs);
        assert_eq!(topology.edges.len(), 1);
        assert_eq!(topology.edges[0].edge_type, EdgeType::Connection);
    }
}
