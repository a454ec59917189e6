//! gRPC reachability probe: a standard gRPC health-check RPC, success
//! iff the response reports `SERVING`.

use std::time::{Duration, Instant};

use chrono::Utc;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tonic_health::ServingStatus;

use super::{ProbeResult, ProbeType};

pub async fn probe(source_pod_id: String, target_id: Option<String>, target_ip: String, port: u16, timeout: Duration) -> ProbeResult {
    let started = Instant::now();
    let addr = format!("http://{target_ip}:{port}");

    let outcome = tokio::time::timeout(timeout, run(&addr)).await;
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

    let (success, error) = match outcome {
        Ok(Ok(true)) => (true, None),
        Ok(Ok(false)) => (false, Some("not serving".to_string())),
        Ok(Err(e)) => (false, Some(e.to_string())),
        Err(_) => (false, Some(format!("timed out after {}ms", timeout.as_millis()))),
    };

    ProbeResult {
        timestamp: Utc::now(),
        source_pod_id,
        target_id,
        target_ip,
        target_port: port,
        probe_type: ProbeType::Grpc,
        success,
        latency_ms: success.then_some(latency_ms),
        error,
        http_status: None,
    }
}

async fn run(addr: &str) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let channel = tonic::transport::Channel::from_shared(addr.to_string())?.connect().await?;
    let mut client = HealthClient::new(channel);
    let response = client.check(HealthCheckRequest { service: String::new() }).await?;
    Ok(response.into_inner().status == ServingStatus::Serving as i32)
}
