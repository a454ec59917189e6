//! The Probe Scheduler: periodic TCP/HTTP/gRPC reachability probing,
//! bounded to avoid quadratic growth on large clusters.

pub mod grpc;
pub mod http;
pub mod tcp;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ProbesConfig;
use crate::ids;
use crate::utils::ring_buffer::RingBuffer;
use crate::watcher::ClusterWatcher;
#[cfg(feature = "otel")]
use crate::utils::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeType {
    Tcp,
    Http,
    Grpc,
}

impl ProbeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProbeType::Tcp => "tcp",
            ProbeType::Http => "http",
            ProbeType::Grpc => "grpc",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub timestamp: DateTime<Utc>,
    pub source_pod_id: String,
    /// The pod or service id being probed.
    pub target_id: Option<String>,
    pub target_ip: String,
    pub target_port: u16,
    pub probe_type: ProbeType,
    pub success: bool,
    pub latency_ms: Option<f64>,
    pub error: Option<String>,
    pub http_status: Option<u16>,
}

/// Pick a probe protocol from a Kubernetes `ServicePort.name`, following
/// the same naming convention Istio and other service meshes use for
/// protocol sniffing (`http`, `http2`, `grpc`, ... prefixes). Falls back
/// to TCP when the name is absent or unrecognized.
fn probe_type_for_port(port_name: Option<&str>) -> ProbeType {
    match port_name.map(|n| n.split('-').next().unwrap_or(n)) {
        Some("http") | Some("http2") | Some("https") => ProbeType::Http,
        Some("grpc") | Some("grpc-web") => ProbeType::Grpc,
        _ => ProbeType::Tcp,
    }
}

pub struct ProbeScheduler {
    config: ProbesConfig,
    watcher: Arc<ClusterWatcher>,
    results: RwLock<RingBuffer<ProbeResult>>,
}

impl ProbeScheduler {
    pub fn new(config: ProbesConfig, watcher: Arc<ClusterWatcher>) -> Arc<Self> {
        Arc::new(Self {
            results: RwLock::new(RingBuffer::new(config.capacity)),
            config,
            watcher,
        })
    }

    /// Run the probe tick loop until `token` is cancelled.
    pub async fn run(self: Arc<Self>, interval: std::time::Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    async fn tick(&self) {
        let pods = self.watcher.get_pods().await;
        let services = self.watcher.get_services().await;

        let running_pods: Vec<_> = pods.iter().filter(|p| p.phase == crate::watcher::PodPhase::Running && p.pod_ip.is_some()).collect();

        let mut tasks = Vec::new();

        // Pod -> service port probes: every running pod against every
        // non-headless service's ClusterIP ports.
        for service in services.iter().filter(|s| !s.is_headless() && s.cluster_ip.is_some()) {
            let target_ip = service.cluster_ip.clone().unwrap();
            let target_id = ids::service(&service.namespace, &service.name);
            for pod in &running_pods {
                let source_id = ids::pod(&pod.namespace, &pod.name);
                for port in &service.ports {
                    let probe_type = probe_type_for_port(port.name.as_deref());
                    tasks.push(self.probe_one(probe_type, source_id.clone(), Some(target_id.clone()), target_ip.clone(), port.port, self.config.timeout()));
                }
            }
        }

        // Bounded pod-to-pod sample: shuffle candidate pairs and take
        // at most `max_pod_to_pod_samples`.
        let mut pairs: Vec<(&crate::watcher::Pod, &crate::watcher::Pod)> = Vec::new();
        for source in &running_pods {
            for target in &running_pods {
                if source.name != target.name || source.namespace != target.namespace {
                    pairs.push((source, target));
                }
            }
        }
        pairs.shuffle(&mut rand::rng());
        for (source, target) in pairs.into_iter().take(self.config.max_pod_to_pod_samples) {
            let source_id = ids::pod(&source.namespace, &source.name);
            let target_id = ids::pod(&target.namespace, &target.name);
            let target_ip = target.pod_ip.clone().unwrap();
            tasks.push(self.probe_one(ProbeType::Tcp, source_id, Some(target_id), target_ip, 80, self.config.pod_to_pod_timeout()));
        }

        debug!(count = tasks.len(), "probe tick scheduled");
        let results = futures::future::join_all(tasks).await;
        let mut store = self.results.write().await;
        for result in results {
            #[cfg(feature = "otel")]
            metrics::PROBES_TOTAL.add(1, &[metrics::probe_type_attr(result.probe_type.as_str()), metrics::outcome_attr(if result.success { "success" } else { "failure" })]);
            #[cfg(feature = "otel")]
            if let Some(latency) = result.latency_ms {
                metrics::PROBE_LATENCY.record(latency, &[metrics::probe_type_attr(result.probe_type.as_str())]);
            }
            store.push(result);
        }
    }

    async fn probe_one(&self, probe_type: ProbeType, source_pod_id: String, target_id: Option<String>, target_ip: String, port: u16, timeout: std::time::Duration) -> ProbeResult {
        match probe_type {
            ProbeType::Tcp => tcp::probe(source_pod_id, target_id, target_ip, port, timeout).await,
            ProbeType::Http => http::probe(source_pod_id, target_id, target_ip, port, timeout).await,
            ProbeType::Grpc => grpc::probe(source_pod_id, target_id, target_ip, port, timeout).await,
        }
    }

    pub async fn get_recent_results(&self, window: std::time::Duration) -> Vec<ProbeResult> {
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_default();
        self.results.read().await.iter().filter(|r| r.timestamp >= cutoff).cloned().collect()
    }

    pub async fn get_failed_probes(&self) -> Vec<ProbeResult> {
        self.results.read().await.iter().filter(|r| !r.success).cloned().collect()
    }

    /// Percentage (0-100) of probes to `target_ip` within `window` that
    /// failed.
    pub async fn calculate_packet_loss(&self, target_ip: &str, window: std::time::Duration) -> f64 {
        let recent = self.get_recent_results(window).await;
        let to_target: Vec<_> = recent.iter().filter(|r| r.target_ip == target_ip).collect();
        if to_target.is_empty() {
            return 0.0;
        }
        let failed = to_target.iter().filter(|r| !r.success).count();
        100.0 * failed as f64 / to_target.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result(target_ip: &str, success: bool) -> ProbeResult {
        ProbeResult {
            timestamp: Utc::now(),
            source_pod_id: "pod/default/a".into(),
            target_id: Some("pod/default/b".into()),
            target_ip: target_ip.into(),
            target_port: 80,
            probe_type: ProbeType::Tcp,
            success,
            latency_ms: if success { Some(1.0) } else { None },
            error: if success { None } else { Some("connection refused".into()) },
            http_status: None,
        }
    }

    #[tokio::test]
    async fn packet_loss_percentage() {
        let watcher_config = ProbesConfig::default();
        let client = kube::Client::try_from(kube::Config::new("https://localhost".parse().unwrap())).unwrap();
        let watcher = Arc::new(ClusterWatcher::from_client(client, None));
        let scheduler = ProbeScheduler::new(watcher_config, watcher);

        {
            let mut store = scheduler.results.write().await;
            store.push(sample_result("10.0.0.5", true));
            store.push(sample_result("10.0.0.5", false));
            store.push(sample_result("10.0.0.5", false));
            store.push(sample_result("10.0.0.9", true));
        }

        let loss = scheduler.calculate_packet_loss("10.0.0.5", std::time::Duration::from_secs(3600)).await;
        assert!((loss - 66.66666666666667).abs() < 1e-6);
    }
}
