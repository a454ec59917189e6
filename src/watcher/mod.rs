//! The Cluster Watcher: a watch-based informer layer that maintains a
//! consistent in-memory cache of pods, services, endpoints, nodes, and
//! network policies.
//!
//! Each kind owns its own `RwLock<HashMap<...>>`; readers take a shared
//! read lock and clone out a snapshot rather than exposing the lock or a
//! live reference. `Start` blocks only until every kind's initial list
//! sync is complete (mirroring [`super::discovery`]'s watch-then-cache
//! shape in the original service discovery code) — the watches
//! themselves keep running as detached tasks until the cancellation
//! token fires.

pub mod convert;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use futures::TryStreamExt;
use k8s_openapi::api::core::v1::{Endpoints as ApiEndpoints, Node as ApiNode, Pod as ApiPod, Service as ApiService};
use k8s_openapi::api::networking::v1::NetworkPolicy as ApiNetworkPolicy;
use kube::{
    api::Api,
    runtime::watcher::{self, Event},
    Client,
};
use tokio::sync::{oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ids;
use crate::utils::retry::RetryConfig;
#[cfg(feature = "otel")]
use crate::utils::metrics;

pub use types::*;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("setup failed: {0}")]
    Setup(String),
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

type Cache<T> = Arc<RwLock<HashMap<String, T>>>;

fn empty_cache<T>() -> Cache<T> {
    Arc::new(RwLock::new(HashMap::new()))
}

/// Maintains cached views of the five watched kinds.
pub struct ClusterWatcher {
    client: Client,
    namespace: Option<String>,
    pods: Cache<Pod>,
    services: Cache<Service>,
    endpoints: Cache<Endpoints>,
    nodes: Cache<Node>,
    network_policies: Cache<NetworkPolicy>,
}

impl ClusterWatcher {
    /// Build a client from `kubeconfig` (or in-cluster config when
    /// `None`) and construct an (unstarted) watcher scoped to
    /// `namespace`, or cluster-wide when `None`.
    pub async fn new(kubeconfig: Option<&str>, namespace: Option<String>) -> Result<Self, WatchError> {
        let client = match kubeconfig {
            Some(path) => {
                let kubeconfig = kube::config::Kubeconfig::read_from(path)
                    .map_err(|e| WatchError::Setup(format!("reading kubeconfig {path}: {e}")))?;
                let config = kube::Config::from_custom_kubeconfig(kubeconfig, &Default::default())
                    .await
                    .map_err(|e| WatchError::Setup(format!("building config from {path}: {e}")))?;
                Client::try_from(config)
                    .map_err(|e| WatchError::Setup(format!("building client: {e}")))?
            }
            None => Client::try_default()
                .await
                .map_err(|e| WatchError::Setup(format!("in-cluster client: {e}")))?,
        };

        Ok(Self {
            client,
            namespace,
            pods: empty_cache(),
            services: empty_cache(),
            endpoints: empty_cache(),
            nodes: empty_cache(),
            network_policies: empty_cache(),
        })
    }

    /// Build a watcher directly from an existing client, bypassing
    /// kubeconfig discovery. Used by tests and by callers embedding
    /// this crate that already hold a configured `kube::Client`.
    pub fn from_client(client: Client, namespace: Option<String>) -> Self {
        Self {
            client,
            namespace,
            pods: empty_cache(),
            services: empty_cache(),
            endpoints: empty_cache(),
            nodes: empty_cache(),
            network_policies: empty_cache(),
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: k8s_openapi::Resource<Scope = k8s_openapi::ClusterResourceScope>
            + Clone
            + std::fmt::Debug
            + serde::de::DeserializeOwned,
    {
        Api::all(self.client.clone())
    }

    fn namespaced_api<K>(&self) -> Api<K>
    where
        K: k8s_openapi::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + std::fmt::Debug
            + serde::de::DeserializeOwned,
    {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    /// Establish all five watches and block until each has completed its
    /// initial list sync. Watch tasks then run detached until `token` is
    /// cancelled.
    pub async fn start(&self, token: CancellationToken) -> Result<(), WatchError> {
        let (pods_tx, pods_rx) = oneshot::channel();
        let (svc_tx, svc_rx) = oneshot::channel();
        let (ep_tx, ep_rx) = oneshot::channel();
        let (nodes_tx, nodes_rx) = oneshot::channel();
        let (np_tx, np_rx) = oneshot::channel();

        spawn_watch_loop(
            "pod",
            self.namespaced_api::<ApiPod>(),
            self.pods.clone(),
            token.clone(),
            pods_tx,
            |p| convert::convert_pod(p).map(|v| (ids::cache_key(&v.namespace, &v.name), v)),
        );
        spawn_watch_loop(
            "service",
            self.namespaced_api::<ApiService>(),
            self.services.clone(),
            token.clone(),
            svc_tx,
            |s| convert::convert_service(s).map(|v| (ids::cache_key(&v.namespace, &v.name), v)),
        );
        spawn_watch_loop(
            "endpoints",
            self.namespaced_api::<ApiEndpoints>(),
            self.endpoints.clone(),
            token.clone(),
            ep_tx,
            |e| convert::convert_endpoints(e).map(|v| (ids::cache_key(&v.namespace, &v.name), v)),
        );
        spawn_watch_loop(
            "node",
            self.api::<ApiNode>(),
            self.nodes.clone(),
            token.clone(),
            nodes_tx,
            |n| convert::convert_node(n).map(|v| (v.name.clone(), v)),
        );
        spawn_watch_loop(
            "networkpolicy",
            self.namespaced_api::<ApiNetworkPolicy>(),
            self.network_policies.clone(),
            token.clone(),
            np_tx,
            |np| {
                convert::convert_network_policy(np).map(|v| (ids::cache_key(&v.namespace, &v.name), v))
            },
        );

        for (kind, rx) in [
            ("pod", pods_rx),
            ("service", svc_rx),
            ("endpoints", ep_rx),
            ("node", nodes_rx),
            ("networkpolicy", np_rx),
        ] {
            rx.await
                .map_err(|_| WatchError::Setup(format!("{kind} watcher exited before initial sync")))?;
        }

        info!("cluster watcher initial sync complete");
        Ok(())
    }

    pub async fn get_pods(&self) -> Vec<Pod> {
        self.pods.read().await.values().cloned().collect()
    }

    pub async fn get_services(&self) -> Vec<Service> {
        self.services.read().await.values().cloned().collect()
    }

    pub async fn get_endpoints(&self) -> Vec<Endpoints> {
        self.endpoints.read().await.values().cloned().collect()
    }

    pub async fn get_nodes(&self) -> Vec<Node> {
        self.nodes.read().await.values().cloned().collect()
    }

    pub async fn get_network_policies(&self) -> Vec<NetworkPolicy> {
        self.network_policies.read().await.values().cloned().collect()
    }

    /// Look up a single pod by namespace/name, used by the flow
    /// resolver and probe scheduler.
    pub async fn get_pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.pods.read().await.get(&ids::cache_key(namespace, name)).cloned()
    }

    /// Resolve a pod IP to its owning pod, used by the flow resolver.
    pub async fn find_pod_by_ip(&self, ip: &str) -> Option<Pod> {
        self.pods
            .read()
            .await
            .values()
            .find(|p| p.pod_ip.as_deref() == Some(ip))
            .cloned()
    }
}

/// Spawn a detached task that runs a kube watcher for one kind,
/// applying events to `cache`. Sends on `ready` exactly once, after the
/// first `InitDone`. Reconnects with [`RetryConfig::for_upstream_reconnect`]
/// on stream termination, until `token` is cancelled.
fn spawn_watch_loop<K, T, F>(
    kind: &'static str,
    api: Api<K>,
    cache: Cache<T>,
    token: CancellationToken,
    ready: oneshot::Sender<()>,
    extract: F,
) where
    K: kube::Resource + Clone + std::fmt::Debug + Send + Sync + serde::de::DeserializeOwned + 'static,
    K::DynamicType: Default,
    T: Send + Sync + 'static,
    F: Fn(&K) -> Option<(String, T)> + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ready = Some(ready);
        let retry = RetryConfig::for_upstream_reconnect();
        let mut attempt = 0u32;

        loop {
            if token.is_cancelled() {
                return;
            }

            let stream = watcher::watcher(api.clone(), watcher::Config::default());
            tokio::pin!(stream);

            let run = async {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return Ok(()),
                        next = stream.try_next() => {
                            match next {
                                Ok(Some(event)) => {
                                    attempt = 0;
                                    handle_event(kind, &cache, event, &extract, &mut ready).await;
                                }
                                Ok(None) => return Ok(()),
                                Err(e) => return Err(e),
                            }
                        }
                    }
                }
            };

            match run.await {
                Ok(()) => return,
                Err(e) => {
                    #[cfg(feature = "otel")]
                    metrics::WATCHER_RECONNECT_TOTAL.add(1, &[metrics::kind_attr(kind)]);
                    let delay = retry.delay_for_attempt(attempt);
                    attempt += 1;
                    warn!(kind, error = %e, delay_ms = delay.as_millis() as u64, "watch stream error, reconnecting");
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    });
}

async fn handle_event<K, T, F>(
    kind: &str,
    cache: &Cache<T>,
    event: Event<K>,
    extract: &F,
    ready: &mut Option<oneshot::Sender<()>>,
) where
    K: kube::Resource + std::fmt::Debug,
    F: Fn(&K) -> Option<(String, T)>,
{
    match event {
        Event::Apply(obj) | Event::InitApply(obj) => {
            if let Some((key, value)) = extract(&obj) {
                debug!(kind, key = %key, "upsert");
                cache.write().await.insert(key, value);
            }
        }
        Event::Delete(obj) => {
            if let Some((key, _)) = extract(&obj) {
                debug!(kind, key = %key, "delete");
                cache.write().await.remove(&key);
            }
        }
        Event::Init => {
            debug!(kind, "watch init");
        }
        Event::InitDone => {
            debug!(kind, "watch init done");
            if let Some(tx) = ready.take() {
                let _ = tx.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::types::*;
    use std::collections::BTreeMap;

    #[test]
    fn pod_restart_count_sums_containers() {
        let pod = Pod {
            namespace: "default".into(),
            name: "p".into(),
            phase: PodPhase::Running,
            phase_reason: None,
            pod_ip: Some("10.0.0.1".into()),
            node_name: None,
            labels: BTreeMap::new(),
            container_statuses: vec![
                ContainerStatus { name: "a".into(), ready: true, restart_count: 2 },
                ContainerStatus { name: "b".into(), ready: true, restart_count: 3 },
            ],
            owner_reference: None,
            created_at: None,
        };
        assert_eq!(pod.restart_count(), 5);
        assert!(pod.is_ready());
    }

    #[test]
    fn network_policy_selects_matching_labels() {
        let mut selector = BTreeMap::new();
        selector.insert("app".to_string(), "web".to_string());
        let np = NetworkPolicy {
            namespace: "default".into(),
            name: "np".into(),
            pod_selector: selector,
            policy_types: vec![PolicyType::Ingress],
            ingress_rules: vec![],
            egress_rules: vec![],
        };

        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "web".to_string());
        assert!(np.selects(&labels));

        labels.insert("app".to_string(), "db".to_string());
        assert!(!np.selects(&labels));
    }

    #[test]
    fn service_is_headless_when_cluster_ip_none() {
        let svc = Service {
            namespace: "default".into(),
            name: "s".into(),
            service_type: ServiceType::ClusterIp,
            cluster_ip: Some("None".into()),
            ports: vec![],
            selector: BTreeMap::new(),
        };
        assert!(svc.is_headless());
    }
}
