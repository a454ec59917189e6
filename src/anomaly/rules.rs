//! The eight detection rules, each a pure function from current state
//! (flows, metrics, baselines) to zero or one [`Anomaly`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::flows::record::{Flow, Protocol};
use crate::flows::FlowMetric;

use super::baseline::BaselineStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyType {
    TrafficSpike,
    TrafficDrop,
    HighErrorRate,
    PortScan,
    DataExfiltration,
    UnusualProtocol,
    UnexpectedConnection,
    DnsFlood,
}

impl AnomalyType {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyType::TrafficSpike => "traffic-spike",
            AnomalyType::TrafficDrop => "traffic-drop",
            AnomalyType::HighErrorRate => "high-error-rate",
            AnomalyType::PortScan => "port-scan",
            AnomalyType::DataExfiltration => "data-exfiltration",
            AnomalyType::UnusualProtocol => "unusual-protocol",
            AnomalyType::UnexpectedConnection => "unexpected-connection",
            AnomalyType::DnsFlood => "dns-flood",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Evidence {
    pub current: f64,
    pub baseline: f64,
    pub threshold: f64,
    pub details: String,
}

#[derive(Debug, Clone)]
pub struct Anomaly {
    pub id: String,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub source_pod_id: String,
    pub dest_pod_id: Option<String>,
    pub evidence: Evidence,
    pub detected_at: DateTime<Utc>,
    pub score: f64,
}

const PORT_SCAN_WINDOW_SECS: i64 = 60;
const PORT_SCAN_THRESHOLD: usize = 20;
const DATA_EXFIL_BYTES_PER_SEC: f64 = 10_000_000.0;
const DNS_FLOOD_WINDOW_SECS: i64 = 60;
const DNS_FLOOD_THRESHOLD: usize = 100;
const SPIKE_STDDEV_MULTIPLIER: f64 = 3.0;

fn anomaly_id(anomaly_type: AnomalyType, key: &str, now: DateTime<Utc>) -> String {
    format!("{}-{}-{}", anomaly_type.as_str(), key, now.timestamp())
}

/// Traffic spike / drop / high error rate: evaluated per pair against
/// its traffic baseline.
pub fn detect_traffic_rules(pair: &(String, String), metric: &FlowMetric, baselines: &BaselineStore, now: DateTime<Utc>) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    let Some(baseline) = baselines.traffic_baseline(pair) else {
        return anomalies;
    };

    let key = format!("{}-{}", pair.0, pair.1);

    if baseline.sample_count >= 10 && baseline.bytes_avg > 0.0 {
        let threshold = baseline.bytes_avg + SPIKE_STDDEV_MULTIPLIER * baseline.bytes_stddev;
        if metric.bytes_per_sec > threshold {
            let score = (metric.bytes_per_sec - baseline.bytes_avg) / baseline.bytes_avg;
            let severity = if score >= 5.0 {
                Severity::Critical
            } else if score >= 3.0 {
                Severity::High
            } else if score >= 1.5 {
                Severity::Medium
            } else {
                Severity::Low
            };
            anomalies.push(Anomaly {
                id: anomaly_id(AnomalyType::TrafficSpike, &key, now),
                anomaly_type: AnomalyType::TrafficSpike,
                severity,
                title: "Traffic spike".to_string(),
                description: format!("{} -> {} traffic spiked to {:.0} B/s", pair.0, pair.1, metric.bytes_per_sec),
                source_pod_id: pair.0.clone(),
                dest_pod_id: Some(pair.1.clone()),
                evidence: Evidence {
                    current: metric.bytes_per_sec,
                    baseline: baseline.bytes_avg,
                    threshold,
                    details: format!("stddev={:.1}", baseline.bytes_stddev),
                },
                detected_at: now,
                score: score.clamp(0.0, 1.0),
            });
        }
    }

    if baseline.bytes_avg > 1000.0 && metric.bytes_per_sec < 0.2 * baseline.bytes_avg {
        anomalies.push(Anomaly {
            id: anomaly_id(AnomalyType::TrafficDrop, &key, now),
            anomaly_type: AnomalyType::TrafficDrop,
            severity: Severity::Medium,
            title: "Traffic drop".to_string(),
            description: format!("{} -> {} traffic dropped to {:.0} B/s", pair.0, pair.1, metric.bytes_per_sec),
            source_pod_id: pair.0.clone(),
            dest_pod_id: Some(pair.1.clone()),
            evidence: Evidence {
                current: metric.bytes_per_sec,
                baseline: baseline.bytes_avg,
                threshold: 0.2 * baseline.bytes_avg,
                details: String::new(),
            },
            detected_at: now,
            score: 0.5,
        });
    }

    if metric.error_rate > 0.05 {
        let severity = if metric.error_rate > 0.25 {
            Severity::Critical
        } else if metric.error_rate > 0.10 {
            Severity::High
        } else {
            Severity::Medium
        };
        anomalies.push(Anomaly {
            id: anomaly_id(AnomalyType::HighErrorRate, &key, now),
            anomaly_type: AnomalyType::HighErrorRate,
            severity,
            title: "High error rate".to_string(),
            description: format!("{} -> {} error rate is {:.1}%", pair.0, pair.1, metric.error_rate * 100.0),
            source_pod_id: pair.0.clone(),
            dest_pod_id: Some(pair.1.clone()),
            evidence: Evidence {
                current: metric.error_rate,
                baseline: baseline.error_rate_avg,
                threshold: 0.05,
                details: String::new(),
            },
            detected_at: now,
            score: metric.error_rate,
        });
    }

    if metric.bytes_per_sec > DATA_EXFIL_BYTES_PER_SEC {
        anomalies.push(Anomaly {
            id: anomaly_id(AnomalyType::DataExfiltration, &key, now),
            anomaly_type: AnomalyType::DataExfiltration,
            severity: Severity::Critical,
            title: "Possible data exfiltration".to_string(),
            description: format!("{} -> {} sustained {:.0} B/s outbound", pair.0, pair.1, metric.bytes_per_sec),
            source_pod_id: pair.0.clone(),
            dest_pod_id: Some(pair.1.clone()),
            evidence: Evidence {
                current: metric.bytes_per_sec,
                baseline: baseline.bytes_avg,
                threshold: DATA_EXFIL_BYTES_PER_SEC,
                details: String::new(),
            },
            detected_at: now,
            score: 1.0,
        });
    }

    anomalies
}

/// Unusual protocol / unexpected connection: evaluated per incoming
/// flow, extending the relevant baseline when new.
pub fn detect_per_flow_rules(flow: &Flow, baselines: &mut BaselineStore, now: DateTime<Utc>) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    let Some(source_id) = &flow.source_pod_id else {
        return anomalies;
    };

    if baselines.observe_protocol(source_id, flow.protocol) {
        anomalies.push(Anomaly {
            id: anomaly_id(AnomalyType::UnusualProtocol, source_id, now),
            anomaly_type: AnomalyType::UnusualProtocol,
            severity: Severity::Medium,
            title: "Unusual protocol".to_string(),
            description: format!("{source_id} originated {} for the first time", flow.protocol.as_str()),
            source_pod_id: source_id.clone(),
            dest_pod_id: flow.dest_pod_id.clone(),
            evidence: Evidence { current: 1.0, baseline: 0.0, threshold: 0.0, details: flow.protocol.as_str().to_string() },
            detected_at: now,
            score: 0.4,
        });
    }

    if let Some(dest_id) = &flow.dest_pod_id {
        if baselines.observe_connection(source_id, dest_id) {
            anomalies.push(Anomaly {
                id: anomaly_id(AnomalyType::UnexpectedConnection, &format!("{source_id}-{dest_id}"), now),
                anomaly_type: AnomalyType::UnexpectedConnection,
                severity: Severity::Low,
                title: "Unexpected connection".to_string(),
                description: format!("{source_id} connected to {dest_id} for the first time"),
                source_pod_id: source_id.clone(),
                dest_pod_id: Some(dest_id.clone()),
                evidence: Evidence { current: 1.0, baseline: 0.0, threshold: 0.0, details: String::new() },
                detected_at: now,
                score: 0.2,
            });
        }
    }

    anomalies
}

/// Port scan / DNS flood: evaluated over the recent-flow window,
/// grouped by source pod.
pub fn detect_windowed_rules(recent_flows: &[std::sync::Arc<Flow>], now: DateTime<Utc>) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    let cutoff = now - chrono::Duration::seconds(PORT_SCAN_WINDOW_SECS.max(DNS_FLOOD_WINDOW_SECS));

    let mut ports_by_source: BTreeMap<&str, std::collections::BTreeSet<(&str, u16)>> = BTreeMap::new();
    let mut dns_by_source: BTreeMap<&str, u64> = BTreeMap::new();

    for flow in recent_flows.iter().filter(|f| f.timestamp >= cutoff) {
        let Some(source_id) = flow.source_pod_id.as_deref() else { continue };
        ports_by_source.entry(source_id).or_default().insert((flow.dest_ip.as_str(), flow.dest_port));
        if flow.protocol == Protocol::Dns {
            *dns_by_source.entry(source_id).or_insert(0) += 1;
        }
    }

    for (source_id, ports) in &ports_by_source {
        if ports.len() > PORT_SCAN_THRESHOLD {
            anomalies.push(Anomaly {
                id: anomaly_id(AnomalyType::PortScan, source_id, now),
                anomaly_type: AnomalyType::PortScan,
                severity: Severity::High,
                title: "Possible port scan".to_string(),
                description: format!("{source_id} connected to {} distinct destination ports in the last {PORT_SCAN_WINDOW_SECS}s", ports.len()),
                source_pod_id: source_id.to_string(),
                dest_pod_id: None,
                evidence: Evidence {
                    current: ports.len() as f64,
                    baseline: 0.0,
                    threshold: PORT_SCAN_THRESHOLD as f64,
                    details: String::new(),
                },
                detected_at: now,
                score: 0.7,
            });
        }
    }

    for (source_id, count) in &dns_by_source {
        if *count > DNS_FLOOD_THRESHOLD as u64 {
            anomalies.push(Anomaly {
                id: anomaly_id(AnomalyType::DnsFlood, source_id, now),
                anomaly_type: AnomalyType::DnsFlood,
                severity: Severity::Medium,
                title: "DNS flood".to_string(),
                description: format!("{source_id} issued {count} DNS queries in the last {DNS_FLOOD_WINDOW_SECS}s"),
                source_pod_id: source_id.to_string(),
                dest_pod_id: None,
                evidence: Evidence {
                    current: *count as f64,
                    baseline: 0.0,
                    threshold: DNS_FLOOD_THRESHOLD as f64,
                    details: String::new(),
                },
                detected_at: now,
                score: 0.5,
            });
        }
    }

    anomalies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::record::Direction;

    #[test]
    fn traffic_spike_severity_bands() {
        let mut baselines = BaselineStore::new(0.3);
        let now = Utc::now();
        for _ in 0..10 {
            baselines.update_traffic(("a".into(), "b".into()), 100.0, 10.0, 0.0, now);
        }
        let metric = FlowMetric::new("a".into(), "b".into(), now, Protocol::Tcp, Direction::Egress);
        let mut metric = metric;
        metric.bytes_per_sec = 10_000.0;

        let anomalies = detect_traffic_rules(&("a".to_string(), "b".to_string()), &metric, &baselines, now);
        assert!(anomalies.iter().any(|a| a.anomaly_type == AnomalyType::TrafficSpike));
    }

    #[test]
    fn high_error_rate_severity_band() {
        let baselines = BaselineStore::new(0.3);
        let now = Utc::now();
        let mut metric = FlowMetric::new("a".into(), "b".into(), now, Protocol::Tcp, Direction::Egress);
        metric.error_rate = 0.3;
        let anomalies = detect_traffic_rules(&("a".to_string(), "b".to_string()), &metric, &baselines, now);
        let err_anomaly = anomalies.iter().find(|a| a.anomaly_type == AnomalyType::HighErrorRate).unwrap();
        assert_eq!(err_anomaly.severity, Severity::Critical);
    }

    #[test]
    fn port_scan_detected_past_threshold() {
        let now = Utc::now();
        let flows: Vec<_> = (0..25)
            .map(|i| {
                std::sync::Arc::new(Flow {
                    id: format!("f{i}"),
                    source_pod_id: Some("pod/default/scanner".into()),
                    source_ip: "10.0.0.1".into(),
                    source_port: 1234,
                    source_namespace: Some("default".into()),
                    dest_pod_id: Some("pod/default/target".into()),
                    dest_ip: "10.0.0.2".into(),
                    dest_port: 1000 + i,
                    dest_namespace: Some("default".into()),
                    protocol: Protocol::Tcp,
                    flow_type: crate::flows::record::FlowType::L3L4,
                    bytes_sent: 10,
                    packets_sent: 1,
                    direction: Direction::Egress,
                    is_reply: false,
                    verdict: crate::flows::record::Verdict::Accepted,
                    drop_reason: None,
                    l7: None,
                    timestamp: now,
                })
            })
            .collect();

        let anomalies = detect_windowed_rules(&flows, now);
        assert!(anomalies.iter().any(|a| a.anomaly_type == AnomalyType::PortScan));
    }
}
