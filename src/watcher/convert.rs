//! Conversions from `k8s-openapi` API objects to our domain types.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Endpoints as ApiEndpoints, Node as ApiNode, Pod as ApiPod, Service as ApiService,
};
use k8s_openapi::api::networking::v1::NetworkPolicy as ApiNetworkPolicy;

use super::types::*;

fn labels_of(labels: &Option<BTreeMap<String, String>>) -> BTreeMap<String, String> {
    labels.clone().unwrap_or_default()
}

pub fn convert_pod(pod: &ApiPod) -> Option<Pod> {
    let namespace = pod.metadata.namespace.clone()?;
    let name = pod.metadata.name.clone()?;

    let status = pod.status.as_ref();
    let phase = status
        .and_then(|s| s.phase.as_deref())
        .map(PodPhase::from_str)
        .unwrap_or(PodPhase::Unknown);
    let phase_reason = status.and_then(|s| s.reason.clone());

    let pod_ip = status.and_then(|s| s.pod_ip.clone());
    let node_name = pod.spec.as_ref().and_then(|s| s.node_name.clone());

    let container_statuses = status
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .map(|cs| ContainerStatus {
                    name: cs.name.clone(),
                    ready: cs.ready,
                    restart_count: cs.restart_count.max(0) as u32,
                })
                .collect()
        })
        .unwrap_or_default();

    let owner_reference = pod
        .metadata
        .owner_references
        .as_ref()
        .and_then(|refs| refs.first())
        .map(|r| OwnerReference {
            kind: r.kind.clone(),
            name: r.name.clone(),
        });

    let created_at = pod
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| t.0.with_timezone(&chrono::Utc));

    Some(Pod {
        namespace,
        name,
        phase,
        phase_reason,
        pod_ip,
        node_name,
        labels: labels_of(&pod.metadata.labels),
        container_statuses,
        owner_reference,
        created_at,
    })
}

pub fn convert_service(svc: &ApiService) -> Option<Service> {
    let namespace = svc.metadata.namespace.clone()?;
    let name = svc.metadata.name.clone()?;
    let spec = svc.spec.as_ref();

    let cluster_ip = spec.and_then(|s| s.cluster_ip.clone());
    let is_headless = cluster_ip.as_deref() == Some("None");

    let service_type = if is_headless {
        ServiceType::Headless
    } else {
        match spec.and_then(|s| s.type_.as_deref()) {
            Some("NodePort") => ServiceType::NodePort,
            Some("LoadBalancer") => ServiceType::LoadBalancer,
            _ => ServiceType::ClusterIp,
        }
    };

    let ports = spec
        .and_then(|s| s.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .map(|p| ServicePort {
                    name: p.name.clone(),
                    port: p.port.max(0) as u16,
                    target_port: p.target_port.as_ref().map(|tp| match tp {
                        k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(i) => {
                            i.to_string()
                        }
                        k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::String(s) => {
                            s.clone()
                        }
                    }),
                    protocol: p.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
                })
                .collect()
        })
        .unwrap_or_default();

    let selector = spec
        .and_then(|s| s.selector.clone())
        .unwrap_or_default()
        .into_iter()
        .collect();

    Some(Service {
        namespace,
        name,
        service_type,
        cluster_ip,
        ports,
        selector,
    })
}

pub fn convert_endpoints(ep: &ApiEndpoints) -> Option<Endpoints> {
    let namespace = ep.metadata.namespace.clone()?;
    let name = ep.metadata.name.clone()?;

    let subsets = ep
        .subsets
        .as_ref()
        .map(|subsets| {
            subsets
                .iter()
                .map(|s| EndpointSubset {
                    addresses: s
                        .addresses
                        .as_ref()
                        .map(|addrs| addrs.iter().map(convert_endpoint_address).collect())
                        .unwrap_or_default(),
                    not_ready_addresses: s
                        .not_ready_addresses
                        .as_ref()
                        .map(|addrs| addrs.iter().map(convert_endpoint_address).collect())
                        .unwrap_or_default(),
                    ports: s
                        .ports
                        .as_ref()
                        .map(|ports| {
                            ports
                                .iter()
                                .map(|p| EndpointPort {
                                    name: p.name.clone(),
                                    port: p.port.max(0) as u16,
                                    protocol: p.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
                                })
                                .collect()
                        })
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(Endpoints {
        namespace,
        name,
        subsets,
    })
}

fn convert_endpoint_address(
    addr: &k8s_openapi::api::core::v1::EndpointAddress,
) -> EndpointAddress {
    EndpointAddress {
        ip: addr.ip.clone(),
        target_pod_name: addr
            .target_ref
            .as_ref()
            .filter(|r| r.kind.as_deref() == Some("Pod"))
            .and_then(|r| r.name.clone()),
        node_name: addr.node_name.clone(),
    }
}

pub fn convert_node(node: &ApiNode) -> Option<Node> {
    let name = node.metadata.name.clone()?;

    let roles = node
        .metadata
        .labels
        .as_ref()
        .map(|labels| {
            labels
                .keys()
                .filter_map(|k| k.strip_prefix("node-role.kubernetes.io/"))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    let status = node.status.as_ref();
    let kubelet_version = status
        .and_then(|s| s.node_info.as_ref())
        .map(|i| i.kubelet_version.clone())
        .unwrap_or_default();

    let internal_ip = status
        .and_then(|s| s.addresses.as_ref())
        .and_then(|addrs| addrs.iter().find(|a| a.type_ == "InternalIP"))
        .map(|a| a.address.clone());

    let pod_cidr = node.spec.as_ref().and_then(|s| s.pod_cidr.clone());

    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conds| conds.iter().find(|c| c.type_ == "Ready"))
        .map(|c| c.status == "True")
        .unwrap_or(false);

    Some(Node {
        name,
        roles,
        kubelet_version,
        internal_ip,
        pod_cidr,
        ready,
    })
}

pub fn convert_network_policy(np: &ApiNetworkPolicy) -> Option<NetworkPolicy> {
    let namespace = np.metadata.namespace.clone()?;
    let name = np.metadata.name.clone()?;
    let spec = np.spec.as_ref()?;

    let pod_selector = spec.pod_selector.match_labels.clone().unwrap_or_default();

    let policy_types = spec
        .policy_types
        .as_ref()
        .map(|types| {
            types
                .iter()
                .filter_map(|t| match t.as_str() {
                    "Ingress" => Some(PolicyType::Ingress),
                    "Egress" => Some(PolicyType::Egress),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    let ingress_rules = spec
        .ingress
        .as_ref()
        .map(|rules| {
            rules
                .iter()
                .flat_map(|r| r.from.as_ref().into_iter().flatten())
                .map(|peer| PolicyRule {
                    peer_selector: peer
                        .pod_selector
                        .as_ref()
                        .and_then(|s| s.match_labels.clone()),
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let egress_rules = spec
        .egress
        .as_ref()
        .map(|rules| {
            rules
                .iter()
                .flat_map(|r| r.to.as_ref().into_iter().flatten())
                .map(|peer| PolicyRule {
                    peer_selector: peer
                        .pod_selector
                        .as_ref()
                        .and_then(|s| s.match_labels.clone()),
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    Some(NetworkPolicy {
        namespace,
        name,
        pod_selector,
        policy_types,
        ingress_rules,
        egress_rules,
    })
}
