//! The flow aggregator: common to every flow source. Maintains the
//! recent-flow ring buffer and the per-pair `FlowMetric` map, runs the
//! periodic rate-recomputation job, and fans new flows out to
//! subscribers with dropped-oldest backpressure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::FlowsConfig;
use crate::utils::ring_buffer::RingBuffer;
#[cfg(feature = "otel")]
use crate::utils::metrics;

use super::metric::{FlowMetric, PairKey};
use super::record::Flow;

#[derive(Debug, Default, Clone)]
pub struct AggregatorStats {
    pub records_processed: u64,
    pub parse_errors: u64,
    pub active_pairs: usize,
    pub subscriber_drops: u64,
}

pub struct FlowAggregator {
    config: FlowsConfig,
    recent: RwLock<RingBuffer<Arc<Flow>>>,
    metrics: RwLock<HashMap<PairKey, FlowMetric>>,
    sender: broadcast::Sender<Arc<Flow>>,
    records_processed: AtomicU64,
    parse_errors: AtomicU64,
    subscriber_drops: AtomicU64,
}

impl FlowAggregator {
    pub fn new(config: FlowsConfig) -> Arc<Self> {
        let (sender, _) = broadcast::channel(config.subscriber_queue_depth);
        Arc::new(Self {
            recent: RwLock::new(RingBuffer::new(config.recent_flows_capacity)),
            metrics: RwLock::new(HashMap::new()),
            sender,
            records_processed: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            subscriber_drops: AtomicU64::new(0),
            config,
        })
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Ingest one flow: append to the ring buffer, upsert its pair's
    /// `FlowMetric` (if both endpoints resolved to pods), then publish
    /// to subscribers.
    pub async fn ingest(&self, flow: Flow) {
        self.records_processed.fetch_add(1, Ordering::Relaxed);
        let flow = Arc::new(flow);

        self.recent.write().await.push(flow.clone());

        if let Some(pair) = flow.pair_key() {
            let mut metrics = self.metrics.write().await;
            let entry = metrics.entry(pair.clone()).or_insert_with(|| {
                FlowMetric::new(pair.0.clone(), pair.1.clone(), flow.timestamp, flow.protocol, flow.direction)
            });
            entry.record_flow(flow.is_drop_or_error(), flow.protocol, flow.timestamp);
        }

        #[cfg(feature = "otel")]
        metrics::FLOWS_INGESTED_TOTAL.add(1, &[]);

        // `send` errors only when there are no receivers; that's fine,
        // it just means nobody is subscribed yet.
        let _ = self.sender.send(flow);
    }

    /// Register a callback invoked once per subscribed flow, on a
    /// dedicated task. A slow subscriber falls behind the broadcast
    /// channel's bounded capacity and has its oldest pending flows
    /// dropped (never the aggregator itself).
    pub fn subscribe_callback<F>(self: &Arc<Self>, callback: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(Arc<Flow>) + Send + Sync + 'static,
    {
        let mut receiver = self.sender.subscribe();
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(flow) => callback(flow),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        this.subscriber_drops.fetch_add(n, Ordering::Relaxed);
                        #[cfg(feature = "otel")]
                        metrics::FLOWS_SUBSCRIBER_BACKPRESSURE_TOTAL.add(n, &[]);
                        warn!(dropped = n, "subscriber fell behind, dropped oldest flows");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }

    /// Run the periodic rate-recomputation job until `token` is
    /// cancelled. Spawn this once alongside the flow source.
    pub async fn run_recompute_loop(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.recompute_interval());
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => self.recompute_rates().await,
            }
        }
    }

    /// Sum `bytes_sent`/`packets_sent` over flows newer than
    /// `now - window` per pair, divide by window seconds, and mark
    /// activity based on `last_seen`.
    pub async fn recompute_rates(&self) {
        #[cfg(feature = "otel")]
        let started = std::time::Instant::now();

        let now = Utc::now();
        let window = self.config.window();
        let inactivity_threshold = window * self.config.inactivity_multiplier;
        let cutoff = now - chrono::Duration::from_std(window).unwrap_or_default();

        let mut sums: HashMap<PairKey, (u64, u64)> = HashMap::new();
        {
            let recent = self.recent.read().await;
            for flow in recent.iter() {
                if flow.timestamp < cutoff {
                    continue;
                }
                if let Some(pair) = flow.pair_key() {
                    let entry = sums.entry(pair).or_insert((0, 0));
                    entry.0 += flow.bytes_sent;
                    entry.1 += flow.packets_sent;
                }
            }
        }

        let window_secs = window.as_secs_f64().max(1e-9);
        let mut metrics = self.metrics.write().await;
        for (pair, metric) in metrics.iter_mut() {
            let (bytes, packets) = sums.get(pair).copied().unwrap_or((0, 0));
            metric.bytes_per_sec = bytes as f64 / window_secs;
            metric.packets_per_sec = packets as f64 / window_secs;
            metric.is_active = now.signed_duration_since(metric.last_seen)
                < chrono::Duration::from_std(inactivity_threshold).unwrap_or_default();
        }

        #[cfg(feature = "otel")]
        metrics::FLOWS_RECOMPUTE_DURATION.record(started.elapsed().as_secs_f64(), &[]);
    }

    pub async fn get_flows(&self, limit: usize) -> Vec<Arc<Flow>> {
        self.recent.read().await.recent(limit).cloned().collect()
    }

    pub async fn get_flow_metrics(&self) -> HashMap<PairKey, FlowMetric> {
        self.metrics.read().await.clone()
    }

    pub async fn get_stats(&self) -> AggregatorStats {
        AggregatorStats {
            records_processed: self.records_processed.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            active_pairs: self.metrics.read().await.values().filter(|m| m.is_active).count(),
            subscriber_drops: self.subscriber_drops.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::record::{Direction, FlowType, Protocol, Verdict};
    use std::sync::atomic::AtomicUsize;

    fn sample_flow(source: &str, dest: &str, bytes: u64) -> Flow {
        Flow {
            id: format!("{source}-{dest}"),
            source_pod_id: Some(source.to_string()),
            source_ip: "10.0.0.1".into(),
            source_port: 1234,
            source_namespace: Some("default".into()),
            dest_pod_id: Some(dest.to_string()),
            dest_ip: "10.0.0.2".into(),
            dest_port: 80,
            dest_namespace: Some("default".into()),
            protocol: Protocol::Tcp,
            flow_type: FlowType::L3L4,
            bytes_sent: bytes,
            packets_sent: 1,
            direction: Direction::Egress,
            is_reply: false,
            verdict: Verdict::Accepted,
            drop_reason: None,
            l7: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn ingest_updates_metric_and_ring_buffer() {
        let config = FlowsConfig::default();
        let agg = FlowAggregator::new(config);

        agg.ingest(sample_flow("pod/default/a", "pod/default/b", 100)).await;
        agg.ingest(sample_flow("pod/default/a", "pod/default/b", 200)).await;

        let flows = agg.get_flows(10).await;
        assert_eq!(flows.len(), 2);

        let metrics = agg.get_flow_metrics().await;
        let metric = metrics.get(&("pod/default/a".to_string(), "pod/default/b".to_string())).unwrap();
        assert_eq!(metric.connection_count, 2);
    }

    #[tokio::test]
    async fn recompute_rates_sums_window() {
        let config = FlowsConfig::default();
        let agg = FlowAggregator::new(config);
        agg.ingest(sample_flow("pod/default/a", "pod/default/b", 6000)).await;
        agg.recompute_rates().await;

        let metrics = agg.get_flow_metrics().await;
        let metric = metrics.get(&("pod/default/a".to_string(), "pod/default/b".to_string())).unwrap();
        assert!(metric.bytes_per_sec > 0.0);
        assert!(metric.is_active);
    }

    #[tokio::test]
    async fn subscriber_receives_every_flow_when_not_lagging() {
        let config = FlowsConfig::default();
        let agg = FlowAggregator::new(config);
        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = received.clone();

        let handle = agg.subscribe_callback(move |_flow| {
            received_clone.fetch_add(1, Ordering::Relaxed);
        });

        for i in 0..5 {
            agg.ingest(sample_flow("pod/default/a", "pod/default/b", i)).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.abort();

        assert_eq!(received.load(Ordering::Relaxed), 5);
    }
}
