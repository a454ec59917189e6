//! The Analyzer: a pure function from cache + probe + graph state to
//! the current set of issues. Runs on a fixed ticker; each pass
//! replaces the prior issue set wholesale.

pub mod remediation;
pub mod rules;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AnalyzerConfig;
use crate::graph::TopologyGraphEngine;
use crate::probes::ProbeScheduler;
use crate::watcher::ClusterWatcher;
#[cfg(feature = "otel")]
use crate::utils::metrics;

pub use rules::{Issue, IssueType, Severity};

pub struct Analyzer {
    config: AnalyzerConfig,
    watcher: Arc<ClusterWatcher>,
    probes: Arc<ProbeScheduler>,
    graph: Arc<TopologyGraphEngine>,
    issues: RwLock<Vec<Issue>>,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig, watcher: Arc<ClusterWatcher>, probes: Arc<ProbeScheduler>, graph: Arc<TopologyGraphEngine>) -> Arc<Self> {
        Arc::new(Self {
            config,
            watcher,
            probes,
            graph,
            issues: RwLock::new(Vec::new()),
        })
    }

    /// Run the analyzer ticker until `token` is cancelled.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
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
        let endpoints = self.watcher.get_endpoints().await;
        let nodes = self.watcher.get_nodes().await;
        let policies = self.watcher.get_network_policies().await;
        let probe_results = self.probes.get_recent_results(std::time::Duration::from_secs(5 * 60)).await;
        let topology = self.graph.get_topology();

        let issues = rules::evaluate(&self.config, &pods, &services, &endpoints, &nodes, &policies, &probe_results, &topology);

        #[cfg(feature = "otel")]
        metrics::ANALYZER_ISSUES_OPEN.add(issues.len() as i64 - self.issues.read().await.len() as i64, &[]);

        info!(count = issues.len(), "analyzer pass complete");
        *self.issues.write().await = issues;
    }

    pub async fn get_issues(&self) -> Vec<Issue> {
        self.issues.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_analyzer_has_no_issues() {
        let client = kube::Client::try_from(kube::Config::new("https://localhost".parse().unwrap())).unwrap();
        let watcher = Arc::new(ClusterWatcher::from_client(client, None));
        let probes = ProbeScheduler::new(crate::config::ProbesConfig::default(), watcher.clone());
        let graph = Arc::new(TopologyGraphEngine::new());
        let analyzer = Analyzer::new(AnalyzerConfig::default(), watcher, probes, graph);
        assert!(analyzer.get_issues().await.is_empty());
    }
}
