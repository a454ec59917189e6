//! The analyzer's nine detection rules, evaluated fresh on every tick
//! against the latest cache/probe/graph snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::AnalyzerConfig;
use crate::graph::Topology;
use crate::ids;
use crate::probes::ProbeResult;
use crate::watcher::{Endpoints, NetworkPolicy, Node, Pod, PodPhase, Service};

use super::remediation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueType {
    ConnectivityFailure,
    PolicyComplexity,
    PolicyCoverageGap,
    PodFailed,
    PodPending,
    ContainerRestarts,
    ServiceWithoutEndpoints,
    CidrOverlap,
    HighLatency,
}

impl IssueType {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueType::ConnectivityFailure => "connectivity-failure",
            IssueType::PolicyComplexity => "policy-complexity",
            IssueType::PolicyCoverageGap => "policy-coverage-gap",
            IssueType::PodFailed => "pod-failed",
            IssueType::PodPending => "pod-pending",
            IssueType::ContainerRestarts => "container-restarts",
            IssueType::ServiceWithoutEndpoints => "service-without-endpoints",
            IssueType::CidrOverlap => "cidr-overlap",
            IssueType::HighLatency => "high-latency",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub id: String,
    pub issue_type: IssueType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub affected_resource_ids: Vec<String>,
    pub suggestions: Vec<String>,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

#[allow(clippy::too_many_arguments)]
pub fn evaluate(
    config: &AnalyzerConfig,
    pods: &[Pod],
    services: &[Service],
    endpoints: &[Endpoints],
    nodes: &[Node],
    policies: &[NetworkPolicy],
    probe_results: &[ProbeResult],
    _topology: &Topology,
) -> Vec<Issue> {
    let now = Utc::now();
    let mut issues = Vec::new();

    issues.extend(connectivity_failures(config, probe_results, now));
    issues.extend(policy_complexity(policies, config, now));
    issues.extend(policy_coverage_gaps(pods, policies, now));
    issues.extend(pod_health_issues(pods, config, now));
    issues.extend(service_without_endpoints(services, endpoints, now));
    issues.extend(cidr_overlaps(nodes, now));
    issues.extend(high_latency(probe_results, config, now));

    issues
}

fn connectivity_failures(config: &AnalyzerConfig, probe_results: &[ProbeResult], now: DateTime<Utc>) -> Vec<Issue> {
    let mut failures_by_target: BTreeMap<&str, usize> = BTreeMap::new();
    for result in probe_results.iter().filter(|r| !r.success) {
        *failures_by_target.entry(result.target_ip.as_str()).or_insert(0) += 1;
    }

    failures_by_target
        .into_iter()
        .filter(|(_, count)| *count >= config.failed_probe_threshold)
        .map(|(target, count)| Issue {
            id: format!("{}-{}-{}", IssueType::ConnectivityFailure.as_str(), target, now.timestamp()),
            issue_type: IssueType::ConnectivityFailure,
            severity: Severity::Critical,
            title: format!("Connectivity failure: {target}"),
            description: format!("{count} failed probes to {target} in the current window"),
            affected_resource_ids: vec![target.to_string()],
            suggestions: remediation::for_issue(IssueType::ConnectivityFailure),
            details: format!("failed_probe_count={count}"),
            timestamp: now,
        })
        .collect()
}

fn policy_complexity(policies: &[NetworkPolicy], config: &AnalyzerConfig, now: DateTime<Utc>) -> Vec<Issue> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for policy in policies {
        *counts.entry(policy.namespace.as_str()).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .filter(|(_, count)| *count > config.policy_complexity_threshold)
        .map(|(namespace, count)| Issue {
            id: format!("{}-{}-{}", IssueType::PolicyComplexity.as_str(), namespace, now.timestamp()),
            issue_type: IssueType::PolicyComplexity,
            severity: Severity::Medium,
            title: format!("Policy complexity: {namespace}"),
            description: format!("{namespace} has {count} NetworkPolicies"),
            affected_resource_ids: vec![ids::namespace(namespace)],
            suggestions: remediation::for_issue(IssueType::PolicyComplexity),
            details: format!("policy_count={count}"),
            timestamp: now,
        })
        .collect()
}

fn policy_coverage_gaps(pods: &[Pod], policies: &[NetworkPolicy], now: DateTime<Utc>) -> Vec<Issue> {
    pods.iter()
        .filter(|p| p.phase == PodPhase::Running)
        .filter(|p| {
            !policies
                .iter()
                .any(|np| np.namespace == p.namespace && np.selects(&p.labels))
        })
        .map(|pod| {
            let pod_id = ids::pod(&pod.namespace, &pod.name);
            Issue {
                id: format!("{}-{}-{}", IssueType::PolicyCoverageGap.as_str(), pod_id, now.timestamp()),
                issue_type: IssueType::PolicyCoverageGap,
                severity: Severity::Low,
                title: format!("Policy coverage gap: {pod_id}"),
                description: format!("{pod_id} is not matched by any NetworkPolicy in its namespace"),
                affected_resource_ids: vec![pod_id],
                suggestions: remediation::for_issue(IssueType::PolicyCoverageGap),
                details: String::new(),
                timestamp: now,
            }
        })
        .collect()
}

fn pod_health_issues(pods: &[Pod], config: &AnalyzerConfig, now: DateTime<Utc>) -> Vec<Issue> {
    let mut issues = Vec::new();

    for pod in pods {
        let pod_id = ids::pod(&pod.namespace, &pod.name);

        if pod.phase == PodPhase::Failed {
            issues.push(Issue {
                id: format!("{}-{}-{}", IssueType::PodFailed.as_str(), pod_id, now.timestamp()),
                issue_type: IssueType::PodFailed,
                severity: Severity::High,
                title: format!("Pod failed: {pod_id}"),
                description: pod.phase_reason.clone().unwrap_or_else(|| "no reason reported".to_string()),
                affected_resource_ids: vec![pod_id.clone()],
                suggestions: remediation::for_issue(IssueType::PodFailed),
                details: String::new(),
                timestamp: now,
            });
        }

        if pod.phase == PodPhase::Pending {
            if let Some(created_at) = pod.created_at {
                if now.signed_duration_since(created_at) > chrono::Duration::from_std(config.pod_pending_threshold()).unwrap_or_default() {
                    issues.push(Issue {
                        id: format!("{}-{}-{}", IssueType::PodPending.as_str(), pod_id, now.timestamp()),
                        issue_type: IssueType::PodPending,
                        severity: Severity::Medium,
                        title: format!("Pod pending: {pod_id}"),
                        description: format!("{pod_id} has been pending since {created_at}"),
                        affected_resource_ids: vec![pod_id.clone()],
                        suggestions: remediation::for_issue(IssueType::PodPending),
                        details: String::new(),
                        timestamp: now,
                    });
                }
            }
        }

        let restart_count = pod.restart_count();
        if restart_count > config.restart_count_threshold {
            issues.push(Issue {
                id: format!("{}-{}-{}", IssueType::ContainerRestarts.as_str(), pod_id, now.timestamp()),
                issue_type: IssueType::ContainerRestarts,
                severity: Severity::High,
                title: format!("High restart count: {pod_id}"),
                description: format!("{pod_id} has restarted {restart_count} times"),
                affected_resource_ids: vec![pod_id],
                suggestions: remediation::for_issue(IssueType::ContainerRestarts),
                details: format!("restart_count={restart_count}"),
                timestamp: now,
            });
        }
    }

    issues
}

fn service_without_endpoints(services: &[Service], endpoints: &[Endpoints], now: DateTime<Utc>) -> Vec<Issue> {
    services
        .iter()
        .filter(|s| !s.is_headless() && s.cluster_ip.is_some())
        .filter(|s| {
            !endpoints
                .iter()
                .any(|e| e.namespace == s.namespace && e.name == s.name && e.has_ready_addresses())
        })
        .map(|service| {
            let service_id = ids::service(&service.namespace, &service.name);
            Issue {
                id: format!("{}-{}-{}", IssueType::ServiceWithoutEndpoints.as_str(), service_id, now.timestamp()),
                issue_type: IssueType::ServiceWithoutEndpoints,
                severity: Severity::High,
                title: format!("Service Without Endpoints: {}/{}", service.namespace, service.name),
                description: format!("{service_id} has no ready endpoints"),
                affected_resource_ids: vec![service_id],
                suggestions: remediation::for_issue(IssueType::ServiceWithoutEndpoints),
                details: String::new(),
                timestamp: now,
            }
        })
        .collect()
}

fn cidr_overlaps(nodes: &[Node], now: DateTime<Utc>) -> Vec<Issue> {
    let mut issues = Vec::new();
    let cidrs: Vec<(&Node, ipnet::IpNet)> = nodes
        .iter()
        .filter_map(|n| n.pod_cidr.as_deref().and_then(|c| c.parse().ok()).map(|cidr| (n, cidr)))
        .collect();

    for i in 0..cidrs.len() {
        for j in (i + 1)..cidrs.len() {
            let (node_a, cidr_a) = &cidrs[i];
            let (node_b, cidr_b) = &cidrs[j];
            if cidrs_overlap(cidr_a, cidr_b) {
                let node_a_id = ids::node(&node_a.name);
                let node_b_id = ids::node(&node_b.name);
                issues.push(Issue {
                    id: format!("{}-{}-{}-{}", IssueType::CidrOverlap.as_str(), node_a_id, node_b_id, now.timestamp()),
                    issue_type: IssueType::CidrOverlap,
                    severity: Severity::Critical,
                    title: format!("CIDR overlap: {} / {}", node_a.name, node_b.name),
                    description: format!("{} ({}) overlaps {} ({})", node_a.name, cidr_a, node_b.name, cidr_b),
                    affected_resource_ids: vec![node_a_id, node_b_id],
                    suggestions: remediation::for_issue(IssueType::CidrOverlap),
                    details: String::new(),
                    timestamp: now,
                });
            }
        }
    }

    issues
}

fn cidrs_overlap(a: &ipnet::IpNet, b: &ipnet::IpNet) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

fn high_latency(probe_results: &[ProbeResult], config: &AnalyzerConfig, now: DateTime<Utc>) -> Vec<Issue> {
    let mut latencies: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for result in probe_results.iter().filter(|r| r.success) {
        if let Some(latency) = result.latency_ms {
            latencies.entry(result.target_ip.as_str()).or_default().push(latency);
        }
    }

    latencies
        .into_iter()
        .filter_map(|(target, samples)| {
            let avg = samples.iter().sum::<f64>() / samples.len() as f64;
            (avg > config.latency_threshold_ms).then_some((target, avg))
        })
        .map(|(target, avg)| Issue {
            id: format!("{}-{}-{}", IssueType::HighLatency.as_str(), target, now.timestamp()),
            issue_type: IssueType::HighLatency,
            severity: Severity::Medium,
            title: format!("High latency: {target}"),
            description: format!("average successful probe latency to {target} over the last 5 minutes is {avg:.1}ms"),
            affected_resource_ids: vec![target.to_string()],
            suggestions: remediation::for_issue(IssueType::HighLatency),
            details: format!("avg_latency_ms={avg:.1}"),
            timestamp: now,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    fn sample_service(namespace: &str, name: &str) -> Service {
        Service {
            namespace: namespace.into(),
            name: name.into(),
            service_type: crate::watcher::ServiceType::ClusterIp,
            cluster_ip: Some("10.96.0.1".into()),
            ports: vec![],
            selector: Map::new(),
        }
    }

    #[test]
    fn service_without_endpoints_flagged() {
        let services = vec![sample_service("ns", "s")];
        let issues = service_without_endpoints(&services, &[], Utc::now());
        assert_eq!(issues.len(), 1);
        assert!(issues[0].title.contains("Service Without Endpoints: ns/s"));
        assert_eq!(issues[0].severity, Severity::High);
    }

    #[test]
    fn service_with_ready_endpoints_not_flagged() {
        let services = vec![sample_service("ns", "s")];
        let endpoints = vec![Endpoints {
            namespace: "ns".into(),
            name: "s".into(),
            subsets: vec![crate::watcher::EndpointSubset {
                addresses: vec![crate::watcher::EndpointAddress { ip: "10.0.0.1".into(), target_pod_name: Some("p".into()), node_name: None }],
                not_ready_addresses: vec![],
                ports: vec![],
            }],
        }];
        let issues = service_without_endpoints(&services, &endpoints, Utc::now());
        assert!(issues.is_empty());
    }

    #[test]
    fn cidr_overlap_detected() {
        let nodes = vec![
            Node { name: "n1".into(), roles: vec![], kubelet_version: "v1".into(), internal_ip: None, pod_cidr: Some("10.244.0.0/16".into()), ready: true },
            Node { name: "n2".into(), roles: vec![], kubelet_version: "v1".into(), internal_ip: None, pod_cidr: Some("10.244.0.0/24".into()), ready: true },
        ];
        let issues = cidr_overlaps(&nodes, Utc::now());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Critical);
    }
}
