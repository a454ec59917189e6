//! HTTP reachability probe: GET `/healthz` with a timeout.

use std::time::{Duration, Instant};

use chrono::Utc;

use super::{ProbeResult, ProbeType};

pub async fn probe(source_pod_id: String, target_id: Option<String>, target_ip: String, port: u16, timeout: Duration) -> ProbeResult {
    let started = Instant::now();
    let url = format!("http://{target_ip}:{port}/healthz");

    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(c) => c,
        Err(e) => {
            return ProbeResult {
                timestamp: Utc::now(),
                source_pod_id,
                target_id,
                target_ip,
                target_port: port,
                probe_type: ProbeType::Http,
                success: false,
                latency_ms: None,
                error: Some(e.to_string()),
                http_status: None,
            }
        }
    };

    let outcome = client.get(&url).send().await;
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

    match outcome {
        Ok(response) => {
            let status = response.status();
            ProbeResult {
                timestamp: Utc::now(),
                source_pod_id,
                target_id,
                target_ip,
                target_port: port,
                probe_type: ProbeType::Http,
                success: status.is_success(),
                latency_ms: Some(latency_ms),
                error: (!status.is_success()).then(|| format!("status {status}")),
                http_status: Some(status.as_u16()),
            }
        }
        Err(e) => ProbeResult {
            timestamp: Utc::now(),
            source_pod_id,
            target_id,
            target_ip,
            target_port: port,
            probe_type: ProbeType::Http,
            success: false,
            latency_ms: None,
            error: Some(e.to_string()),
            http_status: None,
        },
    }
}
