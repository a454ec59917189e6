//! Baseline stores: exponential moving averages and running standard
//! deviations the detection rules compare fresh samples against.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::flows::record::Protocol;

pub const EMA_ALPHA_DEFAULT: f64 = 0.3;

/// Per-pair traffic baseline: EMA + running stddev of bytes/sec and
/// packets/sec, plus EMA of error_rate.
#[derive(Debug, Clone)]
pub struct TrafficBaseline {
    pub bytes_avg: f64,
    pub bytes_stddev: f64,
    pub packets_avg: f64,
    pub packets_stddev: f64,
    pub error_rate_avg: f64,
    pub sample_count: u64,
    pub last_updated: DateTime<Utc>,
}

impl TrafficBaseline {
    fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            bytes_avg: 0.0,
            bytes_stddev: 0.0,
            packets_avg: 0.0,
            packets_stddev: 0.0,
            error_rate_avg: 0.0,
            sample_count: 0,
            last_updated: timestamp,
        }
    }

    /// Fold in one fresh sample: EMA update for the three averages,
    /// running stddev update against the (post-update) mean for bytes
    /// and packets.
    fn update(&mut self, alpha: f64, bytes_per_sec: f64, packets_per_sec: f64, error_rate: f64, timestamp: DateTime<Utc>) {
        self.bytes_stddev = running_stddev(self.bytes_stddev, self.bytes_avg, bytes_per_sec, self.sample_count);
        self.packets_stddev = running_stddev(self.packets_stddev, self.packets_avg, packets_per_sec, self.sample_count);

        self.bytes_avg = alpha * bytes_per_sec + (1.0 - alpha) * self.bytes_avg;
        self.packets_avg = alpha * packets_per_sec + (1.0 - alpha) * self.packets_avg;
        self.error_rate_avg = alpha * error_rate + (1.0 - alpha) * self.error_rate_avg;

        self.sample_count += 1;
        self.last_updated = timestamp;
    }
}

/// Smoothed running stddev: blends the prior stddev with the new
/// sample's deviation from the prior mean, same EMA weighting the
/// averages use. Not a textbook Welford update, but stable and cheap,
/// matching the exact "deviation against the current mean" wording.
fn running_stddev(prev_stddev: f64, prev_mean: f64, sample: f64, sample_count: u64) -> f64 {
    if sample_count == 0 {
        return 0.0;
    }
    let deviation = (sample - prev_mean).abs();
    let weight = 1.0 / (sample_count as f64 + 1.0);
    ((prev_stddev * prev_stddev) * (1.0 - weight) + (deviation * deviation) * weight).sqrt()
}

/// Per-pod protocol baseline: which protocols this pod has
/// historically originated, with observed counts.
#[derive(Debug, Clone, Default)]
pub struct ProtocolBaseline {
    pub counts: BTreeMap<Protocol, u64>,
}

/// Per-pod connection baseline: the set of destination pod/external
/// ids this pod has historically connected to.
#[derive(Debug, Clone, Default)]
pub struct ConnectionBaseline {
    pub known_destinations: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct BaselineStore {
    pub traffic: BTreeMap<(String, String), TrafficBaseline>,
    pub protocol: BTreeMap<String, ProtocolBaseline>,
    pub connection: BTreeMap<String, ConnectionBaseline>,
    pub ema_alpha: f64,
}

impl BaselineStore {
    pub fn new(ema_alpha: f64) -> Self {
        Self {
            traffic: BTreeMap::new(),
            protocol: BTreeMap::new(),
            connection: BTreeMap::new(),
            ema_alpha,
        }
    }

    pub fn update_traffic(
        &mut self,
        pair: (String, String),
        bytes_per_sec: f64,
        packets_per_sec: f64,
        error_rate: f64,
        timestamp: DateTime<Utc>,
    ) -> &TrafficBaseline {
        let baseline = self.traffic.entry(pair).or_insert_with(|| TrafficBaseline::new(timestamp));
        baseline.update(self.ema_alpha, bytes_per_sec, packets_per_sec, error_rate, timestamp);
        baseline
    }

    pub fn traffic_baseline(&self, pair: &(String, String)) -> Option<&TrafficBaseline> {
        self.traffic.get(pair)
    }

    /// Returns `true` if `protocol` is new for `source_id` (and records
    /// it either way).
    pub fn observe_protocol(&mut self, source_id: &str, protocol: Protocol) -> bool {
        let baseline = self.protocol.entry(source_id.to_string()).or_default();
        let is_new = !baseline.counts.contains_key(&protocol);
        *baseline.counts.entry(protocol).or_insert(0) += 1;
        is_new
    }

    /// Returns `true` if `dest_id` is new for `source_id` (and records
    /// it either way).
    pub fn observe_connection(&mut self, source_id: &str, dest_id: &str) -> bool {
        let baseline = self.connection.entry(source_id.to_string()).or_default();
        baseline.known_destinations.insert(dest_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traffic_baseline_ema_moves_toward_sample() {
        let mut store = BaselineStore::new(0.3);
        let now = Utc::now();
        store.update_traffic(("a".into(), "b".into()), 1000.0, 10.0, 0.0, now);
        let baseline = store.update_traffic(("a".into(), "b".into()), 1000.0, 10.0, 0.0, now);
        assert!(baseline.bytes_avg > 0.0 && baseline.bytes_avg <= 1000.0);
        assert_eq!(baseline.sample_count, 2);
    }

    #[test]
    fn observe_protocol_reports_novelty_once() {
        let mut store = BaselineStore::new(0.3);
        assert!(store.observe_protocol("pod/default/a", Protocol::Tcp));
        assert!(!store.observe_protocol("pod/default/a", Protocol::Tcp));
    }

    #[test]
    fn observe_connection_reports_novelty_once() {
        let mut store = BaselineStore::new(0.3);
        assert!(store.observe_connection("pod/default/a", "pod/default/b"));
        assert!(!store.observe_connection("pod/default/a", "pod/default/b"));
    }
}
