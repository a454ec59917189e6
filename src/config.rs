//! Configuration for the netobserve engine.
//!
//! Supports a YAML file plus environment variable overrides, in that
//! priority order (environment wins).

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Environment variable holding the path to the YAML config file.
pub const CONFIG_ENV_VAR: &str = "NETOBSERVE_CONFIG";
/// Environment variable controlling the `tracing` filter.
pub const LOG_ENV_VAR: &str = "NETOBSERVE_LOG";

/// Top-level configuration, corresponding to spec.md §6's option table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to kubeconfig; `None` means in-cluster config.
    pub kubeconfig: Option<String>,
    /// HTTP listen address for the adapter surface.
    pub addr: String,
    /// Restrict watchers to one namespace; `None` means cluster-wide.
    pub namespace: Option<String>,
    /// Probe tick period, in seconds.
    pub probe_interval_secs: u64,
    /// Enable the flow collection subsystem.
    pub enable_flows: bool,
    /// Preferred gRPC flow-observer endpoint (`host:port`).
    pub hubble_addr: Option<String>,
    /// Endpoint used by the optional metrics-correlator add-on.
    pub prometheus_url: Option<String>,
    /// Credential for the optional LLM narrator.
    pub ai_api_key: Option<String>,

    pub flows: FlowsConfig,
    pub anomaly: AnomalyConfig,
    pub probes: ProbesConfig,
    pub analyzer: AnalyzerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            addr: ":8080".to_string(),
            namespace: None,
            probe_interval_secs: 30,
            enable_flows: true,
            hubble_addr: None,
            prometheus_url: None,
            ai_api_key: None,
            flows: FlowsConfig::default(),
            anomaly: AnomalyConfig::default(),
            probes: ProbesConfig::default(),
            analyzer: AnalyzerConfig::default(),
        }
    }
}

impl Config {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlowsConfig {
    /// Capacity of the recent-flows ring buffer.
    pub recent_flows_capacity: usize,
    /// Aggregation window, in seconds, for rate computation.
    pub window_secs: u64,
    /// How often, in seconds, the rate-recomputation job runs.
    pub recompute_interval_secs: u64,
    /// A pair is considered inactive once `last_seen` is older than
    /// `window * inactivity_multiplier`.
    pub inactivity_multiplier: u32,
    /// How often the universal source reads the conntrack table.
    pub conntrack_poll_interval_secs: u64,
    /// How often the universal source reads packet-filter counters.
    pub counters_poll_interval_secs: u64,
    /// Per-subscriber bounded queue depth for the aggregator's fan-out.
    pub subscriber_queue_depth: usize,
}

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            recent_flows_capacity: 10_000,
            window_secs: 60,
            recompute_interval_secs: 5,
            inactivity_multiplier: 2,
            conntrack_poll_interval_secs: 5,
            counters_poll_interval_secs: 10,
            subscriber_queue_depth: 1_024,
        }
    }
}

impl FlowsConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn recompute_interval(&self) -> Duration {
        Duration::from_secs(self.recompute_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Bounded anomaly ring buffer capacity.
    pub capacity: usize,
    /// EMA smoothing factor.
    pub ema_alpha: f64,
    /// Minimum samples before spike/drop detection is eligible.
    pub min_samples_for_baseline: u64,
    /// Spike detection stddev multiplier.
    pub spike_stddev_multiplier: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            ema_alpha: 0.3,
            min_samples_for_baseline: 10,
            spike_stddev_multiplier: 3.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbesConfig {
    /// Bounded probe-result ring buffer capacity.
    pub capacity: usize,
    /// Max pod-to-pod probes sampled per tick, bounded to avoid O(n^2).
    pub max_pod_to_pod_samples: usize,
    pub timeout_secs: u64,
    pub pod_to_pod_timeout_secs: u64,
}

impl Default for ProbesConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            max_pod_to_pod_samples: 10,
            timeout_secs: 5,
            pod_to_pod_timeout_secs: 2,
        }
    }
}

impl ProbesConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn pod_to_pod_timeout(&self) -> Duration {
        Duration::from_secs(self.pod_to_pod_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub tick_interval_secs: u64,
    pub policy_complexity_threshold: usize,
    pub pod_pending_threshold_secs: u64,
    pub restart_count_threshold: u32,
    pub failed_probe_threshold: usize,
    pub latency_threshold_ms: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            policy_complexity_threshold: 3,
            pod_pending_threshold_secs: 5 * 60,
            restart_count_threshold: 5,
            failed_probe_threshold: 3,
            latency_threshold_ms: 100.0,
        }
    }
}

impl AnalyzerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn pod_pending_threshold(&self) -> Duration {
        Duration::from_secs(self.pod_pending_threshold_secs)
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Config file (path from `NETOBSERVE_CONFIG`, default `config.yaml`)
    /// 3. Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_string(), e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("KUBECONFIG_PATH") {
            self.kubeconfig = Some(v);
        }
        if let Ok(v) = std::env::var("ADDR") {
            self.addr = v;
        }
        if let Ok(v) = std::env::var("NAMESPACE") {
            self.namespace = Some(v);
        }
        if let Ok(v) = std::env::var("PROBE_INTERVAL_SECS") {
            if let Ok(secs) = v.parse() {
                self.probe_interval_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("ENABLE_FLOWS") {
            self.enable_flows = v.eq_ignore_ascii_case("true") || v == "1";
        }
        if let Ok(v) = std::env::var("HUBBLE_ADDR") {
            self.hubble_addr = Some(v);
        }
        if let Ok(v) = std::env::var("PROMETHEUS_URL") {
            self.prometheus_url = Some(v);
        }
        if let Ok(v) = std::env::var("NETOBSERVE_AI_API_KEY") {
            self.ai_api_key = Some(v);
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    FileRead(String, String),

    #[error("failed to parse config: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.addr, ":8080");
        assert_eq!(config.probe_interval_secs, 30);
        assert_eq!(config.flows.recent_flows_capacity, 10_000);
        assert_eq!(config.probes.capacity, 1_000);
        assert_eq!(config.anomaly.capacity, 1_000);
        assert_eq!(config.probes.max_pod_to_pod_samples, 10);
    }

    #[test]
    fn parses_partial_yaml_with_defaults() {
        let yaml = "namespace: kube-system\nenable_flows: false\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.namespace.as_deref(), Some("kube-system"));
        assert!(!config.enable_flows);
        assert_eq!(config.probes.capacity, 1_000);
    }

    #[test]
    fn from_file_not_found() {
        let result = Config::from_file("/nonexistent/path/config.yaml");
        assert!(result.is_err());
        match result.unwrap_err() {
            ConfigError::FileRead(path, _) => assert_eq!(path, "/nonexistent/path/config.yaml"),
            other => panic!("expected FileRead, got {other:?}"),
        }
    }

    #[test]
    fn from_file_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"not: valid: yaml: content: [[[").unwrap();

        let result = Config::from_file(file.path().to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn env_override_probe_interval() {
        let mut config = Config::default();
        std::env::set_var("PROBE_INTERVAL_SECS", "45");
        config.apply_env_overrides();
        assert_eq!(config.probe_interval_secs, 45);
        std::env::remove_var("PROBE_INTERVAL_SECS");
    }

    #[test]
    fn env_override_invalid_probe_interval_ignored() {
        let mut config = Config::default();
        std::env::set_var("PROBE_INTERVAL_SECS", "not_a_number");
        config.apply_env_overrides();
        assert_eq!(config.probe_interval_secs, 30);
        std::env::remove_var("PROBE_INTERVAL_SECS");
    }
}
