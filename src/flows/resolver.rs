//! Resolves source/dest IPs observed in flow records to pod identities,
//! backed by the cluster watcher's pod cache.

use std::sync::Arc;

use crate::ids;
use crate::watcher::ClusterWatcher;

#[derive(Debug, Clone)]
pub struct Resolved {
    pub pod_id: Option<String>,
    pub namespace: Option<String>,
}

pub struct IpResolver {
    watcher: Arc<ClusterWatcher>,
    /// CIDRs considered "inside the cluster" for addresses that don't
    /// resolve to a known pod (still internal, just stale/unknown).
    pod_cidrs: Vec<ipnet::IpNet>,
}

impl IpResolver {
    pub fn new(watcher: Arc<ClusterWatcher>, pod_cidrs: Vec<ipnet::IpNet>) -> Self {
        Self { watcher, pod_cidrs }
    }

    /// Resolve an IP to a pod id, or `external/<ip>` when it falls
    /// outside every known pod CIDR, or `unknown` namespace + no pod id
    /// when inside the cluster but not currently tracked.
    pub async fn resolve(&self, ip: &str) -> Resolved {
        if let Some(pod) = self.watcher.find_pod_by_ip(ip).await {
            return Resolved {
                pod_id: Some(ids::pod(&pod.namespace, &pod.name)),
                namespace: Some(pod.namespace),
            };
        }

        if self.is_in_cluster(ip) {
            return Resolved {
                pod_id: None,
                namespace: Some("unknown".to_string()),
            };
        }

        Resolved {
            pod_id: Some(ids::external(ip)),
            namespace: None,
        }
    }

    fn is_in_cluster(&self, ip: &str) -> bool {
        let Ok(addr) = ip.parse::<std::net::IpAddr>() else {
            return false;
        };
        self.pod_cidrs.iter().any(|cidr| cidr.contains(&addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_ip_outside_pod_cidrs() {
        let cidrs: Vec<ipnet::IpNet> = vec!["10.244.0.0/16".parse().unwrap()];
        assert!(!cidrs.iter().any(|c| c.contains(&"8.8.8.8".parse::<std::net::IpAddr>().unwrap())));
        assert!(cidrs.iter().any(|c| c.contains(&"10.244.0.5".parse::<std::net::IpAddr>().unwrap())));
    }
}
