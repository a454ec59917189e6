//! Stable entity identifiers.
//!
//! Every entity in the system (cache object, graph node, graph edge) is
//! addressed by a string of the form `kind/namespace/name`, or
//! `kind/name` for cluster-scoped kinds, or `external/<ip-or-host>` for
//! peers outside the cluster. This module is the single place that
//! builds and parses those strings so every subsystem agrees on the
//! format.

use std::fmt;

/// The kind half of an entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Pod,
    Service,
    Endpoints,
    Node,
    NetworkPolicy,
    Namespace,
    External,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Pod => "pod",
            Kind::Service => "service",
            Kind::Endpoints => "endpoints",
            Kind::Node => "node",
            Kind::NetworkPolicy => "networkpolicy",
            Kind::Namespace => "namespace",
            Kind::External => "external",
        }
    }

    /// Cluster-scoped kinds use `kind/name` instead of `kind/namespace/name`.
    pub fn is_cluster_scoped(self) -> bool {
        matches!(self, Kind::Node | Kind::Namespace | Kind::External)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build a namespaced entity id: `kind/namespace/name`.
pub fn namespaced(kind: Kind, namespace: &str, name: &str) -> String {
    debug_assert!(!kind.is_cluster_scoped(), "{kind} is cluster-scoped");
    format!("{kind}/{namespace}/{name}")
}

/// Build a cluster-scoped entity id: `kind/name`.
pub fn cluster_scoped(kind: Kind, name: &str) -> String {
    debug_assert!(kind.is_cluster_scoped(), "{kind} is namespace-scoped");
    format!("{kind}/{name}")
}

/// Build the id for an off-cluster peer: `external/<ip-or-host>`.
pub fn external(ip_or_host: &str) -> String {
    format!("{}/{}", Kind::External, ip_or_host)
}

/// Convenience constructors for the five watched kinds.
pub fn pod(namespace: &str, name: &str) -> String {
    namespaced(Kind::Pod, namespace, name)
}

pub fn service(namespace: &str, name: &str) -> String {
    namespaced(Kind::Service, namespace, name)
}

pub fn endpoints(namespace: &str, name: &str) -> String {
    namespaced(Kind::Endpoints, namespace, name)
}

pub fn node(name: &str) -> String {
    cluster_scoped(Kind::Node, name)
}

pub fn network_policy(namespace: &str, name: &str) -> String {
    namespaced(Kind::NetworkPolicy, namespace, name)
}

pub fn namespace(name: &str) -> String {
    cluster_scoped(Kind::Namespace, name)
}

/// Split a `namespace/name` key (the watcher's cache key format) back
/// into its parts. Cluster-scoped kinds are stored under `name` alone.
pub fn split_key(key: &str) -> (Option<&str>, &str) {
    match key.split_once('/') {
        Some((ns, name)) => (Some(ns), name),
        None => (None, key),
    }
}

/// Build the watcher's cache key for a namespaced object.
pub fn cache_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_id_format() {
        assert_eq!(pod("default", "nginx-abc"), "pod/default/nginx-abc");
    }

    #[test]
    fn node_id_is_cluster_scoped() {
        assert_eq!(node("worker-1"), "node/worker-1");
    }

    #[test]
    fn external_id_format() {
        assert_eq!(external("8.8.8.8"), "external/8.8.8.8");
    }

    #[test]
    fn split_key_namespaced() {
        assert_eq!(split_key("default/nginx"), (Some("default"), "nginx"));
    }

    #[test]
    fn split_key_cluster_scoped() {
        assert_eq!(split_key("worker-1"), (None, "worker-1"));
    }
}
