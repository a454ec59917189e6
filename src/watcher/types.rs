//! Domain types for the five watched Kubernetes kinds.
//!
//! These are deliberately smaller than the upstream `k8s-openapi` types:
//! only the fields the rest of the engine actually reads survive the
//! conversion in [`convert`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Failed,
    Succeeded,
    Unknown,
}

impl PodPhase {
    pub fn from_str(s: &str) -> Self {
        match s {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Failed" => PodPhase::Failed,
            "Succeeded" => PodPhase::Succeeded,
            _ => PodPhase::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ContainerStatus {
    pub name: String,
    pub ready: bool,
    pub restart_count: u32,
}

#[derive(Debug, Clone)]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    pub phase: PodPhase,
    pub phase_reason: Option<String>,
    pub pod_ip: Option<String>,
    pub node_name: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub container_statuses: Vec<ContainerStatus>,
    pub owner_reference: Option<OwnerReference>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Pod {
    pub fn restart_count(&self) -> u32 {
        self.container_statuses.iter().map(|c| c.restart_count).sum()
    }

    pub fn is_ready(&self) -> bool {
        !self.container_statuses.is_empty() && self.container_statuses.iter().all(|c| c.ready)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    ClusterIp,
    NodePort,
    LoadBalancer,
    Headless,
}

#[derive(Debug, Clone)]
pub struct ServicePort {
    pub name: Option<String>,
    pub port: u16,
    pub target_port: Option<String>,
    pub protocol: String,
}

#[derive(Debug, Clone)]
pub struct Service {
    pub namespace: String,
    pub name: String,
    pub service_type: ServiceType,
    pub cluster_ip: Option<String>,
    pub ports: Vec<ServicePort>,
    pub selector: BTreeMap<String, String>,
}

impl Service {
    pub fn is_headless(&self) -> bool {
        matches!(self.service_type, ServiceType::Headless)
            || self.cluster_ip.as_deref() == Some("None")
    }
}

#[derive(Debug, Clone)]
pub struct EndpointAddress {
    pub ip: String,
    pub target_pod_name: Option<String>,
    pub node_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EndpointPort {
    pub name: Option<String>,
    pub port: u16,
    pub protocol: String,
}

#[derive(Debug, Clone)]
pub struct EndpointSubset {
    pub addresses: Vec<EndpointAddress>,
    pub not_ready_addresses: Vec<EndpointAddress>,
    pub ports: Vec<EndpointPort>,
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub namespace: String,
    pub name: String,
    pub subsets: Vec<EndpointSubset>,
}

impl Endpoints {
    pub fn has_ready_addresses(&self) -> bool {
        self.subsets.iter().any(|s| !s.addresses.is_empty())
    }

    pub fn ready_pod_names(&self) -> Vec<&str> {
        self.subsets
            .iter()
            .flat_map(|s| s.addresses.iter())
            .filter_map(|a| a.target_pod_name.as_deref())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub roles: Vec<String>,
    pub kubelet_version: String,
    pub internal_ip: Option<String>,
    pub pod_cidr: Option<String>,
    pub ready: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyType {
    Ingress,
    Egress,
}

/// A simplified peer rule: which pods may reach/be reached, identified
/// by an optional label selector (`None` selector means "any peer",
/// matching NetworkPolicy semantics for an empty `from`/`to` rule).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub peer_selector: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkPolicy {
    pub namespace: String,
    pub name: String,
    pub pod_selector: BTreeMap<String, String>,
    pub policy_types: Vec<PolicyType>,
    pub ingress_rules: Vec<PolicyRule>,
    pub egress_rules: Vec<PolicyRule>,
}

impl NetworkPolicy {
    pub fn selects(&self, labels: &BTreeMap<String, String>) -> bool {
        self.pod_selector
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}
