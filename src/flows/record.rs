//! The `Flow` record and its constituent enums.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Http,
    Https,
    Grpc,
    Dns,
    Unknown,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Icmp => "ICMP",
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
            Protocol::Grpc => "gRPC",
            Protocol::Dns => "DNS",
            Protocol::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Protocol::Tcp,
            "UDP" => Protocol::Udp,
            "ICMP" => Protocol::Icmp,
            "HTTP" => Protocol::Http,
            "HTTPS" => Protocol::Https,
            "GRPC" => Protocol::Grpc,
            "DNS" => Protocol::Dns,
            _ => Protocol::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    L3L4,
    L7,
    Drop,
    PolicyDeny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ingress,
    Egress,
    Bidirectional,
}

/// The connection's outcome.
///
/// `Accepted` is the universal (conntrack) source's verdict for an
/// `ESTABLISHED` connection — conntrack has no concept of an
/// application-level "forward", only kernel-level accept. `Forwarded`
/// is used by the observer source, which speaks in those terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Forwarded,
    Dropped,
    Error,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Accepted => "ACCEPTED",
            Verdict::Forwarded => "FORWARDED",
            Verdict::Dropped => "DROPPED",
            Verdict::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct L7Details {
    pub http_method: Option<String>,
    pub http_url: Option<String>,
    pub http_status_code: Option<u32>,
    pub dns_query: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Flow {
    pub id: String,

    pub source_pod_id: Option<String>,
    pub source_ip: String,
    pub source_port: u16,
    pub source_namespace: Option<String>,

    pub dest_pod_id: Option<String>,
    pub dest_ip: String,
    pub dest_port: u16,
    pub dest_namespace: Option<String>,

    pub protocol: Protocol,
    pub flow_type: FlowType,
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub direction: Direction,
    pub is_reply: bool,
    pub verdict: Verdict,
    pub drop_reason: Option<String>,
    pub l7: Option<L7Details>,
    pub timestamp: DateTime<Utc>,
}

impl Flow {
    /// A flow with an empty source or dest pod id is discarded from
    /// aggregation (spec invariant) but may still appear in the recent
    /// flow buffer.
    pub fn is_aggregatable(&self) -> bool {
        self.source_pod_id.is_some() && self.dest_pod_id.is_some()
    }

    pub fn pair_key(&self) -> Option<(String, String)> {
        match (&self.source_pod_id, &self.dest_pod_id) {
            (Some(s), Some(d)) => Some((s.clone(), d.clone())),
            _ => None,
        }
    }

    pub fn is_drop_or_error(&self) -> bool {
        matches!(self.verdict, Verdict::Dropped | Verdict::Error)
    }
}

/// Build the universal source's flow id: `src_ip:src_port->dst_ip:dst_port-PROTOCOL`.
pub fn universal_flow_id(src_ip: &str, src_port: u16, dst_ip: &str, dst_port: u16, protocol: Protocol) -> String {
    format!("{src_ip}:{src_port}->{dst_ip}:{dst_port}-{}", protocol.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unaggregatable_without_both_pod_ids() {
        let mut flow = sample_flow();
        flow.source_pod_id = None;
        assert!(!flow.is_aggregatable());
    }

    fn sample_flow() -> Flow {
        Flow {
            id: "x".into(),
            source_pod_id: Some("pod/default/a".into()),
            source_ip: "10.0.0.1".into(),
            source_port: 1234,
            source_namespace: Some("default".into()),
            dest_pod_id: Some("pod/default/b".into()),
            dest_ip: "10.0.0.2".into(),
            dest_port: 80,
            dest_namespace: Some("default".into()),
            protocol: Protocol::Tcp,
            flow_type: FlowType::L3L4,
            bytes_sent: 100,
            packets_sent: 1,
            direction: Direction::Egress,
            is_reply: false,
            verdict: Verdict::Accepted,
            drop_reason: None,
            l7: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn universal_flow_id_format() {
        assert_eq!(
            universal_flow_id("10.244.0.5", 45678, "10.244.0.6", 8080, Protocol::Tcp),
            "10.244.0.5:45678->10.244.0.6:8080-TCP"
        );
    }
}
