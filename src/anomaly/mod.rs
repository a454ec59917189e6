//! The Anomaly Detector: baseline maintenance plus rule-based
//! detection, run on each aggregation tick.

pub mod baseline;
pub mod rules;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::AnomalyConfig;
use crate::flows::{Flow, FlowAggregator};
use crate::utils::ring_buffer::RingBuffer;
#[cfg(feature = "otel")]
use crate::utils::metrics;

pub use baseline::BaselineStore;
pub use rules::{Anomaly, AnomalyType, Severity};

pub struct AnomalyDetector {
    config: AnomalyConfig,
    baselines: RwLock<BaselineStore>,
    anomalies: RwLock<RingBuffer<Anomaly>>,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Arc<Self> {
        let baselines = BaselineStore::new(config.ema_alpha);
        Arc::new(Self {
            anomalies: RwLock::new(RingBuffer::new(config.capacity)),
            baselines: RwLock::new(baselines),
            config,
        })
    }

    /// Invoked by the aggregator after each rate recomputation tick:
    /// updates baselines from `metrics`, evaluates the per-pair traffic
    /// rules, then the per-flow and windowed rules over `recent_flows`.
    pub async fn analyze(&self, metrics: &std::collections::HashMap<crate::flows::PairKey, crate::flows::FlowMetric>, recent_flows: &[Arc<Flow>]) {
        let now = Utc::now();
        let mut found = Vec::new();

        {
            let mut baselines = self.baselines.write().await;
            for (pair, metric) in metrics {
                baselines.update_traffic(pair.clone(), metric.bytes_per_sec, metric.packets_per_sec, metric.error_rate, now);
            }
            for (pair, metric) in metrics {
                found.extend(rules::detect_traffic_rules(pair, metric, &baselines, now));
            }
            for flow in recent_flows {
                found.extend(rules::detect_per_flow_rules(flow, &mut baselines, now));
            }
        }

        found.extend(rules::detect_windowed_rules(recent_flows, now));

        if found.is_empty() {
            return;
        }

        #[cfg(feature = "otel")]
        for anomaly in &found {
            metrics::ANOMALIES_TOTAL.add(1, &[metrics::rule_attr(anomaly.anomaly_type.as_str())]);
        }

        info!(count = found.len(), "anomalies detected");
        let mut anomalies = self.anomalies.write().await;
        for anomaly in found {
            anomalies.push(anomaly);
        }
    }

    pub async fn get_anomalies(&self, limit: usize) -> Vec<Anomaly> {
        self.anomalies.read().await.recent(limit).cloned().collect()
    }

    pub async fn get_anomalies_by_severity(&self, severity: Severity) -> Vec<Anomaly> {
        self.anomalies
            .read()
            .await
            .iter()
            .filter(|a| a.severity == severity)
            .cloned()
            .collect()
    }

    /// Run the detector against `aggregator`'s state on every `interval`
    /// until `token` is cancelled. Pass the same interval as
    /// [`FlowAggregator::run_recompute_loop`] so analysis sees freshly
    /// recomputed rates.
    pub async fn run_tick_loop(
        self: Arc<Self>,
        aggregator: Arc<FlowAggregator>,
        interval: std::time::Duration,
        token: tokio_util::sync::CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {
                    let metrics = aggregator.get_flow_metrics().await;
                    let recent = aggregator.get_flows(self.config.capacity).await;
                    self.analyze(&metrics, &recent).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn analyze_with_no_metrics_is_a_no_op() {
        let detector = AnomalyDetector::new(AnomalyConfig::default());
        detector.analyze(&std::collections::HashMap::new(), &[]).await;
        assert!(detector.get_anomalies(10).await.is_empty());
    }
}
