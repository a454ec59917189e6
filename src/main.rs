//! Process entry point: load configuration, stand up every subsystem,
//! wire the HTTP/WS adapter surface on top, and shut down cleanly on
//! signal.

use std::sync::Arc;
use std::time::Duration;

use netobserve::analyzer::Analyzer;
use netobserve::anomaly::AnomalyDetector;
use netobserve::api::{self, AppState};
use netobserve::config::Config;
use netobserve::flows::FlowCollector;
use netobserve::graph::{SynthInputs, TopologyGraphEngine};
use netobserve::probes::ProbeScheduler;
use netobserve::utils::bootstrap;
use netobserve::watcher::ClusterWatcher;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// How long graceful shutdown waits for in-flight requests before the
/// process exits regardless.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How often the graph is resynthesized from the latest watcher, flow
/// and probe snapshots.
const GRAPH_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> netobserve::Result<()> {
    bootstrap::init_tracing();

    let config = Config::load().map_err(|e| netobserve::NetobserveError::Setup(e.to_string()))?;
    let token = CancellationToken::new();

    let watcher = Arc::new(
        ClusterWatcher::new(config.kubeconfig.as_deref(), config.namespace.clone())
            .await
            .map_err(|e| netobserve::NetobserveError::Setup(e.to_string()))?,
    );
    watcher
        .start(token.clone())
        .await
        .map_err(|e| netobserve::NetobserveError::Setup(e.to_string()))?;

    let probes = ProbeScheduler::new(config.probes.clone(), watcher.clone());
    tokio::spawn(probes.clone().run(config.probe_interval(), token.clone()));

    let graph = Arc::new(TopologyGraphEngine::new());

    let flows = if config.enable_flows {
        let pod_cidrs = watcher
            .get_nodes()
            .await
            .iter()
            .filter_map(|n| n.pod_cidr.as_deref())
            .filter_map(|cidr| cidr.parse().ok())
            .collect::<Vec<_>>();
        let collector = Arc::new(
            FlowCollector::new(
                config.flows.clone(),
                watcher.clone(),
                pod_cidrs,
                config.hubble_addr.clone(),
            )
            .await,
        );
        collector.start(token.clone());
        Some(collector)
    } else {
        info!("flow collection disabled by configuration");
        None
    };

    let anomaly = AnomalyDetector::new(config.anomaly.clone());
    if let Some(flows) = &flows {
        tokio::spawn(anomaly.clone().run_tick_loop(flows.aggregator.clone(), config.flows.recompute_interval(), token.clone()));
    }

    let analyzer = Analyzer::new(config.analyzer.clone(), watcher.clone(), probes.clone(), graph.clone());
    tokio::spawn(analyzer.clone().run(token.clone()));

    tokio::spawn(run_graph_refresh_loop(
        graph.clone(),
        watcher.clone(),
        probes.clone(),
        flows.clone(),
        token.clone(),
    ));

    let addr = config.addr.clone();
    let state = Arc::new(AppState {
        config,
        watcher,
        flows,
        anomaly,
        probes,
        graph,
        analyzer,
    });

    let shutdown_token = token.clone();
    let shutdown = async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
        };
        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }

        info!("shutdown signal received, draining for up to {:?}", SHUTDOWN_GRACE);
        shutdown_token.cancel();
        tokio::time::sleep(SHUTDOWN_GRACE).await;
    };

    if let Err(e) = api::serve(&addr, state, shutdown).await {
        error!(error = %e, "HTTP server exited with error");
        return Err(e);
    }

    Ok(())
}

/// Periodically gather a fresh [`SynthInputs`] snapshot from the
/// watcher, flow aggregator and probe scheduler, and hand it to the
/// graph engine for resynthesis.
async fn run_graph_refresh_loop(
    graph: Arc<TopologyGraphEngine>,
    watcher: Arc<ClusterWatcher>,
    probes: Arc<ProbeScheduler>,
    flows: Option<Arc<FlowCollector>>,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(GRAPH_REFRESH_INTERVAL);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {
                let flow_metrics = match &flows {
                    Some(flows) => flows.get_flow_metrics().await.into_iter().collect(),
                    None => Default::default(),
                };
                let inputs = SynthInputs {
                    pods: watcher.get_pods().await,
                    services: watcher.get_services().await,
                    endpoints: watcher.get_endpoints().await,
                    nodes: watcher.get_nodes().await,
                    network_policies: watcher.get_network_policies().await,
                    flow_metrics,
                    probe_results: probes.get_recent_results(Duration::from_secs(5 * 60)).await,
                };
                graph.refresh(inputs);
            }
        }
    }
}
