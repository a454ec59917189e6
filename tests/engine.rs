//! End-to-end property and scenario tests exercising the public API of
//! each subsystem together, without a live cluster.

use std::collections::BTreeMap;

use chrono::Utc;

use netobserve::anomaly::{rules as anomaly_rules, BaselineStore};
use netobserve::flows::record::{Direction, Flow, FlowType, Protocol, Verdict};
use netobserve::flows::universal::parse_conntrack_line;
use netobserve::flows::{FlowAggregator, FlowMetric};
use netobserve::graph::{Direction as GraphDirection, EdgeType, FlowData, GraphEdge, Health, SynthInputs, Topology, TopologyGraphEngine};
use netobserve::simulator::{self, PolicyAction};
use netobserve::watcher::{ContainerStatus, NetworkPolicy, Node, Pod, PodPhase, PolicyRule, PolicyType};

fn sample_pod(namespace: &str, name: &str, node_name: &str) -> Pod {
    Pod {
        namespace: namespace.into(),
        name: name.into(),
        phase: PodPhase::Running,
        phase_reason: None,
        pod_ip: Some("10.0.0.5".into()),
        node_name: Some(node_name.into()),
        labels: BTreeMap::new(),
        container_statuses: vec![ContainerStatus { name: "c".into(), ready: true, restart_count: 0 }],
        owner_reference: None,
        created_at: None,
    }
}

// Property 1: every edge's endpoints appear in the same snapshot's node set.
#[test]
fn graph_closure_holds() {
    let mut inputs = SynthInputs {
        pods: vec![sample_pod("default", "a", "node-1"), sample_pod("default", "b", "node-1")],
        services: vec![],
        endpoints: vec![],
        nodes: vec![],
        network_policies: vec![],
        flow_metrics: BTreeMap::new(),
        probe_results: vec![],
    };
    inputs.flow_metrics.insert(
        ("pod/default/a".to_string(), "pod/default/b".to_string()),
        FlowMetric::new("pod/default/a".into(), "pod/default/b".into(), Utc::now(), Protocol::Tcp, Direction::Egress),
    );

    let engine = TopologyGraphEngine::new();
    engine.refresh(inputs);
    let topology = engine.get_topology();

    let node_ids: std::collections::BTreeSet<&str> = topology.nodes.iter().map(|n| n.id.as_str()).collect();
    for edge in &topology.edges {
        assert!(node_ids.contains(edge.source_id.as_str()), "dangling source {}", edge.source_id);
        assert!(node_ids.contains(edge.target_id.as_str()), "dangling target {}", edge.target_id);
    }
}

// Property 2: connection_count never decreases across consecutive
// observations of the same pair within a run.
#[tokio::test]
async fn flow_metric_connection_count_is_monotonic() {
    let aggregator = FlowAggregator::new(netobserve::config::FlowsConfig::default());
    let mut last = 0u64;
    for i in 0u64..5 {
        aggregator
            .ingest(sample_flow("pod/default/a", "pod/default/b", 10 * (i + 1)))
            .await;
        let metrics = aggregator.get_flow_metrics().await;
        let current = metrics.get(&("pod/default/a".to_string(), "pod/default/b".to_string())).unwrap().connection_count;
        assert!(current >= last);
        last = current;
    }
}

// Property 3: bounded retention for the recent-flow ring buffer.
#[tokio::test]
async fn recent_flows_never_exceed_capacity() {
    let mut config = netobserve::config::FlowsConfig::default();
    config.recent_flows_capacity = 10;
    let aggregator = FlowAggregator::new(config);
    for i in 0..50 {
        aggregator.ingest(sample_flow("pod/default/a", "pod/default/b", i)).await;
    }
    assert_eq!(aggregator.get_flows(1000).await.len(), 10);
}

// Property 4: a subscriber that never lags sees a prefix-preserving
// subsequence of the ingestion order (here: every flow, in order).
#[tokio::test]
async fn subscriber_sees_flows_in_ingestion_order() {
    let aggregator = FlowAggregator::new(netobserve::config::FlowsConfig::default());
    let received = std::sync::Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let received_clone = received.clone();

    let handle = aggregator.subscribe_callback(move |flow| {
        let received = received_clone.clone();
        let bytes = flow.bytes_sent;
        tokio::spawn(async move { received.lock().await.push(bytes) });
    });

    for i in 0..10u64 {
        aggregator.ingest(sample_flow("pod/default/a", "pod/default/b", i)).await;
    }
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    handle.abort();

    let seen = received.lock().await.clone();
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
}

// Property 5: no spike/drop anomaly before 10 samples for the pair.
#[test]
fn no_spike_before_ten_samples() {
    let mut baselines = BaselineStore::new(0.3);
    let now = Utc::now();
    for _ in 0..9 {
        baselines.update_traffic(("a".to_string(), "b".to_string()), 100.0, 10.0, 0.0, now);
    }
    let mut metric = FlowMetric::new("a".into(), "b".into(), now, Protocol::Tcp, Direction::Egress);
    metric.bytes_per_sec = 100_000.0;

    let anomalies = anomaly_rules::detect_traffic_rules(&("a".to_string(), "b".to_string()), &metric, &baselines, now);
    assert!(!anomalies.iter().any(|a| a.anomaly_type == anomaly_rules::AnomalyType::TrafficSpike));
}

// Property 6: severity band boundaries for a traffic spike.
#[test]
fn spike_severity_bands_match_ratio_thresholds() {
    let now = Utc::now();
    let severity_for_ratio = |ratio: f64| {
        let mut baselines = BaselineStore::new(0.3);
        for _ in 0..10 {
            baselines.update_traffic(("a".to_string(), "b".to_string()), 1000.0, 10.0, 0.0, now);
        }
        let mut metric = FlowMetric::new("a".into(), "b".into(), now, Protocol::Tcp, Direction::Egress);
        metric.bytes_per_sec = 1000.0 * (1.0 + ratio);
        let anomalies = anomaly_rules::detect_traffic_rules(&("a".to_string(), "b".to_string()), &metric, &baselines, now);
        anomalies.into_iter().find(|a| a.anomaly_type == anomaly_rules::AnomalyType::TrafficSpike).map(|a| a.severity)
    };

    assert_eq!(severity_for_ratio(9.0), Some(anomaly_rules::Severity::Critical));
    assert_eq!(severity_for_ratio(3.5), Some(anomaly_rules::Severity::High));
    assert_eq!(severity_for_ratio(2.0), Some(anomaly_rules::Severity::Medium));
}

// Property 8: UpdateEdgeFlowData then GetActiveFlows round-trips an
// active edge with the data that was written.
#[test]
fn update_edge_flow_data_round_trips_through_active_flows() {
    let engine = TopologyGraphEngine::new();
    let flow_data = FlowData {
        bytes_per_sec: 500.0,
        packets_per_sec: 20.0,
        connection_count: 3,
        error_rate: 0.0,
        protocol: Protocol::Tcp,
        last_seen: Utc::now(),
        is_active: true,
        direction: GraphDirection::Egress,
    };
    engine.update_edge_flow_data("pod/default/a", "pod/default/b", flow_data.clone());

    let active = engine.get_active_flows();
    let edge = active.iter().find(|e| e.source_id == "pod/default/a" && e.target_id == "pod/default/b").unwrap();
    let recorded = edge.flow_data.as_ref().unwrap();
    assert_eq!(recorded.bytes_per_sec, flow_data.bytes_per_sec);
    assert_eq!(recorded.connection_count, flow_data.connection_count);
    assert!(recorded.is_active);
}

// S1 - spike detection: 12 baseline observations, then a 10x spike.
#[test]
fn s1_spike_detection() {
    let mut baselines = BaselineStore::new(0.3);
    let now = Utc::now();
    for _ in 0..12 {
        baselines.update_traffic(("ns/a".to_string(), "ns/b".to_string()), 1000.0, 10.0, 0.0, now);
    }
    let mut metric = FlowMetric::new("ns/a".into(), "ns/b".into(), now, Protocol::Tcp, Direction::Egress);
    metric.bytes_per_sec = 10_000.0;

    let anomalies = anomaly_rules::detect_traffic_rules(&("ns/a".to_string(), "ns/b".to_string()), &metric, &baselines, now);
    let spike = anomalies.into_iter().find(|a| a.anomaly_type == anomaly_rules::AnomalyType::TrafficSpike).expect("expected a spike anomaly");
    assert_eq!(spike.severity, anomaly_rules::Severity::Critical);
    assert_eq!(spike.evidence.current, 10_000.0);
    assert!((spike.evidence.baseline - 1000.0).abs() / 1000.0 < 0.05);
    assert!(spike.evidence.threshold <= spike.evidence.current);
}

// S2 - port scan: one source touching 25 distinct ports on one
// destination inside the 60s window.
#[test]
fn s2_port_scan() {
    let now = Utc::now();
    let flows: Vec<_> = (0u16..25)
        .map(|i| {
            std::sync::Arc::new(Flow {
                id: format!("f{i}"),
                source_pod_id: Some("pod/ns/a".into()),
                source_ip: "10.0.0.1".into(),
                source_port: 1234,
                source_namespace: Some("ns".into()),
                dest_pod_id: None,
                dest_ip: "10.0.0.2".into(),
                dest_port: 1 + i,
                dest_namespace: None,
                protocol: Protocol::Tcp,
                flow_type: FlowType::L3L4,
                bytes_sent: 1,
                packets_sent: 1,
                direction: Direction::Egress,
                is_reply: false,
                verdict: Verdict::Accepted,
                drop_reason: None,
                l7: None,
                timestamp: now,
            })
        })
        .collect();

    let anomalies = anomaly_rules::detect_windowed_rules(&flows, now);
    let scan = anomalies.into_iter().find(|a| a.anomaly_type == anomaly_rules::AnomalyType::PortScan).expect("expected a port scan anomaly");
    assert_eq!(scan.severity, anomaly_rules::Severity::High);
    assert_eq!(scan.evidence.current, 25.0);
    assert_eq!(scan.evidence.threshold, 20.0);
}

// S3 - service without endpoints.
#[test]
fn s3_service_without_endpoints() {
    use netobserve::analyzer::rules::{evaluate, IssueType, Severity};
    use netobserve::watcher::{Service, ServiceType};

    let services = vec![Service {
        namespace: "ns".into(),
        name: "s".into(),
        service_type: ServiceType::ClusterIp,
        cluster_ip: Some("10.96.0.7".into()),
        ports: vec![],
        selector: BTreeMap::new(),
    }];
    let config = netobserve::config::AnalyzerConfig::default();
    let topology = Topology { nodes: vec![], edges: vec![], timestamp: Utc::now() };

    let issues = evaluate(&config, &[], &services, &[], &[], &[], &[], &topology);
    let issue = issues.into_iter().find(|i| i.issue_type == IssueType::ServiceWithoutEndpoints).expect("expected a service-without-endpoints issue");
    assert_eq!(issue.severity, Severity::High);
    assert!(issue.title.contains("Service Without Endpoints: ns/s"));
    assert_eq!(issue.affected_resource_ids, vec!["service/ns/s".to_string()]);
}

// S4 - policy removal simulation: a previously blocked service edge
// becomes allowed again, with low/medium risk.
#[test]
fn s4_policy_removal_simulation() {
    let topology = Topology {
        nodes: vec![],
        edges: vec![GraphEdge {
            id: "service:pod/ns/a->svc/ns/s".to_string(),
            source_id: "pod/ns/a".to_string(),
            target_id: "svc/ns/s".to_string(),
            edge_type: EdgeType::Service,
            health: Health::Healthy,
            latency_ms: None,
            packet_loss: None,
            flow_data: None,
        }],
        timestamp: Utc::now(),
    };
    let pods = vec![sample_pod("ns", "a", "node-1")];
    let policy = NetworkPolicy {
        namespace: "ns".into(),
        name: "np".into(),
        pod_selector: BTreeMap::new(),
        policy_types: vec![PolicyType::Ingress],
        ingress_rules: vec![PolicyRule { peer_selector: None }],
        egress_rules: vec![],
    };

    let result = simulator::simulate_network_policy(&topology, &pods, &policy, PolicyAction::Remove);
    assert_eq!(result.flows.len(), 1);
    assert!(result.flows.iter().all(|f| matches!(f.before, simulator::FlowState::Allowed) && matches!(f.after, simulator::FlowState::Allowed)));
    assert!(matches!(result.risk, simulator::Risk::Low | simulator::Risk::Medium));
}

// S5 - pod failure simulation, sole replica.
#[test]
fn s5_pod_failure_sole_replica() {
    let topology = Topology { nodes: vec![], edges: vec![], timestamp: Utc::now() };
    let pods = vec![sample_pod("ns", "p", "node-1")];

    let result = simulator::simulate_pod_failure(&topology, &pods, "ns", "p");
    assert_eq!(result.risk, simulator::Risk::Critical);
    assert!(result.recommendations.iter().any(|r| r.contains("replica")));
}

// S6 - universal flow parse.
#[test]
fn s6_universal_flow_parse() {
    let line = "tcp 6 ESTABLISHED src=10.244.0.5 dst=10.244.0.6 sport=45678 dport=8080 bytes=1024 packets=10";
    let entry = parse_conntrack_line(line).expect("expected a parsed conntrack entry");

    assert_eq!(entry.protocol, Protocol::Tcp);
    assert_eq!(entry.src_ip, "10.244.0.5");
    assert_eq!(entry.src_port, 45678);
    assert_eq!(entry.dst_ip, "10.244.0.6");
    assert_eq!(entry.dst_port, 8080);
    assert_eq!(entry.bytes, 1024);
    assert_eq!(entry.packets, 10);
    assert!(entry.established);

    let id = netobserve::flows::record::universal_flow_id(&entry.src_ip, entry.src_port, &entry.dst_ip, entry.dst_port, entry.protocol);
    assert_eq!(id, "10.244.0.5:45678->10.244.0.6:8080-TCP");
}

fn sample_flow(source: &str, dest: &str, bytes: u64) -> Flow {
    Flow {
        id: format!("{source}-{dest}-{bytes}"),
        source_pod_id: Some(source.to_string()),
        source_ip: "10.0.0.1".into(),
        source_port: 1234,
        source_namespace: Some("default".into()),
        dest_pod_id: Some(dest.to_string()),
        dest_ip: "10.0.0.2".into(),
        dest_port: 80,
        dest_namespace: Some("default".into()),
        protocol: Protocol::Tcp,
        flow_type: FlowType::L3L4,
        bytes_sent: bytes,
        packets_sent: 1,
        direction: Direction::Egress,
        is_reply: false,
        verdict: Verdict::Accepted,
        drop_reason: None,
        l7: None,
        timestamp: Utc::now(),
    }
}

#[allow(dead_code)]
fn unused_node_silences_import_warning() -> Node {
    Node { name: "n".into(), roles: vec![], kubelet_version: "v1".into(), internal_ip: None, pod_cidr: None, ready: true }
}
