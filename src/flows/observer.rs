//! The observer flow source: streams flow records from an external
//! gRPC-speaking collector (e.g. a Cilium Hubble relay) over the
//! `flowobserver` contract. Reconnects with exponential backoff on
//! stream loss.

#![cfg(feature = "observer")]

use chrono::{DateTime, Utc};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tracing::{info, warn};

use crate::proto::flow_observer_client::FlowObserverClient;
use crate::proto::{Endpoint as ProtoEndpoint, GetFlowsRequest, ObservedFlow, ObservedVerdict};
use crate::utils::retry::RetryConfig;
#[cfg(feature = "otel")]
use crate::utils::metrics;

use super::record::{Direction, Flow, FlowType, L7Details, Protocol, Verdict};
use super::resolver::IpResolver;

pub struct ObserverSource {
    addr: String,
    resolver: std::sync::Arc<IpResolver>,
}

impl ObserverSource {
    pub fn new(addr: String, resolver: std::sync::Arc<IpResolver>) -> Self {
        Self { addr, resolver }
    }

    /// Probe whether the observer endpoint is reachable, used by the
    /// flow collector factory to decide source priority.
    pub async fn is_reachable(addr: &str) -> bool {
        let Ok(endpoint) = Channel::from_shared(format!("http://{addr}")) else {
            return false;
        };
        endpoint
            .connect_timeout(std::time::Duration::from_secs(2))
            .connect()
            .await
            .is_ok()
    }

    /// Run the reconnect loop until `token` is cancelled, feeding
    /// translated flows to `on_flow`.
    pub async fn run<F>(&self, token: CancellationToken, mut on_flow: F)
    where
        F: FnMut(Flow),
    {
        let retry = RetryConfig::for_upstream_reconnect();
        let mut attempt = 0u32;

        loop {
            if token.is_cancelled() {
                return;
            }

            match self.stream_once(&token, &mut on_flow).await {
                Ok(()) => return,
                Err(e) => {
                    #[cfg(feature = "otel")]
                    metrics::WATCHER_RECONNECT_TOTAL.add(1, &[metrics::source_attr("observer")]);
                    let delay = retry.delay_for_attempt(attempt);
                    attempt += 1;
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "observer stream error, reconnecting");
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn stream_once<F>(&self, token: &CancellationToken, on_flow: &mut F) -> Result<(), tonic::Status>
    where
        F: FnMut(Flow),
    {
        let channel = Channel::from_shared(format!("http://{}", self.addr))
            .map_err(|e| tonic::Status::internal(e.to_string()))?
            .connect()
            .await
            .map_err(|e| tonic::Status::unavailable(e.to_string()))?;

        let mut client = FlowObserverClient::new(channel);
        info!(addr = %self.addr, "connected to flow observer");

        let mut stream = client
            .get_flows(GetFlowsRequest { filter: String::new() })
            .await?
            .into_inner();

        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                next = stream.next() => {
                    match next {
                        Some(Ok(observed)) => {
                            let flow = self.translate(observed).await;
                            on_flow(flow);
                        }
                        Some(Err(status)) => return Err(status),
                        None => return Err(tonic::Status::unavailable("stream closed")),
                    }
                }
            }
        }
    }

    async fn translate(&self, observed: ObservedFlow) -> Flow {
        let source = observed.source.unwrap_or_default();
        let dest = observed.destination.unwrap_or_default();

        let source_resolved = resolve_endpoint(&self.resolver, &source).await;
        let dest_resolved = resolve_endpoint(&self.resolver, &dest).await;

        let protocol = Protocol::from_str(&observed.protocol);
        let verdict = match ObservedVerdict::try_from(observed.verdict).unwrap_or(ObservedVerdict::Unknown) {
            ObservedVerdict::Forwarded => Verdict::Forwarded,
            ObservedVerdict::Dropped => Verdict::Dropped,
            ObservedVerdict::Error => Verdict::Error,
            ObservedVerdict::Unknown => Verdict::Forwarded,
        };

        let l7 = match observed.l7 {
            Some(crate::proto::observed_flow::L7::Http(h)) => Some(L7Details {
                http_method: Some(h.method),
                http_url: Some(h.url),
                http_status_code: Some(h.code),
                dns_query: None,
            }),
            Some(crate::proto::observed_flow::L7::Dns(d)) => Some(L7Details {
                http_method: None,
                http_url: None,
                http_status_code: None,
                dns_query: Some(d.query),
            }),
            None => None,
        };

        let flow_type = if l7.is_some() { FlowType::L7 } else { FlowType::L3L4 };
        let timestamp = DateTime::from_timestamp_nanos(observed.timestamp_unix_nanos).with_timezone(&Utc);

        Flow {
            id: super::record::universal_flow_id(&source.ip, source.port as u16, &dest.ip, dest.port as u16, protocol),
            source_pod_id: source_resolved.pod_id,
            source_ip: source.ip,
            source_port: source.port as u16,
            source_namespace: Some(source.namespace).filter(|s| !s.is_empty()).or(source_resolved.namespace),
            dest_pod_id: dest_resolved.pod_id,
            dest_ip: dest.ip,
            dest_port: dest.port as u16,
            dest_namespace: Some(dest.namespace).filter(|s| !s.is_empty()).or(dest_resolved.namespace),
            protocol,
            flow_type,
            // bytes_sent from the observer is frequently zero in
            // practice; rate computation then reports zero bytes/sec
            // even under load. Prefer the universal source when both
            // are available (documented limitation, see SPEC_FULL.md).
            bytes_sent: observed.bytes_sent,
            packets_sent: observed.packets_sent,
            direction: Direction::Egress,
            is_reply: observed.is_reply,
            verdict,
            drop_reason: Some(observed.drop_reason).filter(|s| !s.is_empty()),
            l7,
            timestamp,
        }
    }
}

async fn resolve_endpoint(resolver: &IpResolver, endpoint: &ProtoEndpoint) -> super::resolver::Resolved {
    if !endpoint.pod_name.is_empty() && !endpoint.namespace.is_empty() {
        return super::resolver::Resolved {
            pod_id: Some(crate::ids::pod(&endpoint.namespace, &endpoint.pod_name)),
            namespace: Some(endpoint.namespace.clone()),
        };
    }
    resolver.resolve(&endpoint.ip).await
}
