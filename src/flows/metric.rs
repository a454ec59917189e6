//! `FlowMetric`: the per-pair aggregate the rate-recomputation job
//! maintains and the anomaly detector reads baselines from.

use chrono::{DateTime, Utc};

use super::record::{Direction, Protocol};

pub type PairKey = (String, String);

#[derive(Debug, Clone)]
pub struct FlowMetric {
    pub source_id: String,
    pub dest_id: String,
    pub bytes_per_sec: f64,
    pub packets_per_sec: f64,
    pub connection_count: u64,
    pub error_rate: f64,
    pub protocol: Protocol,
    pub last_seen: DateTime<Utc>,
    pub is_active: bool,
    pub direction: Direction,
}

impl FlowMetric {
    pub fn new(source_id: String, dest_id: String, timestamp: DateTime<Utc>, protocol: Protocol, direction: Direction) -> Self {
        Self {
            source_id,
            dest_id,
            bytes_per_sec: 0.0,
            packets_per_sec: 0.0,
            connection_count: 0,
            error_rate: 0.0,
            protocol,
            last_seen: timestamp,
            is_active: true,
            direction,
        }
    }

    pub fn pair_key(&self) -> PairKey {
        (self.source_id.clone(), self.dest_id.clone())
    }

    /// Fold in one newly observed flow: bump `connection_count`, move
    /// `error_rate` towards this flow's outcome (1 for drop/error, 0
    /// otherwise) weighted by `1/connection_count`, and refresh the
    /// bookkeeping fields.
    pub fn record_flow(&mut self, is_error: bool, protocol: Protocol, timestamp: DateTime<Utc>) {
        self.connection_count += 1;
        let outcome = if is_error { 1.0 } else { 0.0 };
        let weight = 1.0 / self.connection_count as f64;
        self.error_rate = (self.error_rate * (1.0 - weight) + outcome * weight).clamp(0.0, 1.0);
        self.protocol = protocol;
        if timestamp > self.last_seen {
            self.last_seen = timestamp;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_rate_running_average() {
        let now = Utc::now();
        let mut metric = FlowMetric::new("a".into(), "b".into(), now, Protocol::Tcp, Direction::Egress);
        metric.record_flow(false, Protocol::Tcp, now);
        metric.record_flow(true, Protocol::Tcp, now);
        // connection 1: error_rate = 0; connection 2: (0*(1-0.5) + 1*0.5) = 0.5
        assert!((metric.error_rate - 0.5).abs() < 1e-9);
        assert_eq!(metric.connection_count, 2);
    }

    #[test]
    fn error_rate_stays_in_bounds() {
        let now = Utc::now();
        let mut metric = FlowMetric::new("a".into(), "b".into(), now, Protocol::Tcp, Direction::Egress);
        for _ in 0..10 {
            metric.record_flow(true, Protocol::Tcp, now);
        }
        assert!(metric.error_rate <= 1.0 && metric.error_rate >= 0.0);
    }
}
