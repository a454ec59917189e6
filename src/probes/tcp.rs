//! TCP reachability probe: a bare dial with a timeout.

use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::net::TcpStream;

use super::{ProbeResult, ProbeType};

pub async fn probe(source_pod_id: String, target_id: Option<String>, target_ip: String, port: u16, timeout: Duration) -> ProbeResult {
    let started = Instant::now();
    let addr = format!("{target_ip}:{port}");

    let outcome = tokio::time::timeout(timeout, TcpStream::connect(&addr)).await;

    let (success, error) = match outcome {
        Ok(Ok(_)) => (true, None),
        Ok(Err(e)) => (false, Some(e.to_string())),
        Err(_) => (false, Some(format!("timed out after {}ms", timeout.as_millis()))),
    };

    ProbeResult {
        timestamp: Utc::now(),
        source_pod_id,
        target_id,
        target_ip,
        target_port: port,
        probe_type: ProbeType::Tcp,
        success,
        latency_ms: success.then(|| started.elapsed().as_secs_f64() * 1000.0),
        error,
        http_status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connection_refused_is_a_failure() {
        // Port 1 is reserved and should refuse connections immediately.
        let result = probe("pod/default/a".into(), None, "127.0.0.1".into(), 1, Duration::from_millis(500)).await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}
