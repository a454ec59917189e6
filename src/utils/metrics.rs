//! OTel-native metrics instruments.
//!
//! Centralized metric definitions using OpenTelemetry meters. All
//! instruments are lazily initialized and feature-gated behind `otel`.
//!
//! Naming follows OTel semantic conventions (dot-separated). The OTel
//! Collector / Prometheus exporter converts dots to underscores.

use std::sync::LazyLock;

use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
use opentelemetry::{global, KeyValue};

static METER: LazyLock<Meter> = LazyLock::new(|| global::meter("netobserve"));

// ============================================================================
// Cluster watcher
// ============================================================================

/// Current number of cached objects, by kind.
pub static WATCHER_CACHE_SIZE: LazyLock<UpDownCounter<i64>> = LazyLock::new(|| {
    METER
        .i64_up_down_counter("netobserve.watcher.cache.size")
        .with_description("Current number of cached Kubernetes objects")
        .build()
});

/// Total watch stream reconnects.
pub static WATCHER_RECONNECT_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("netobserve.watcher.reconnect.total")
        .with_description("Total watch stream reconnects")
        .build()
});

// ============================================================================
// Flow pipeline
// ============================================================================

/// Total flow records ingested, by source.
pub static FLOWS_INGESTED_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("netobserve.flows.ingested.total")
        .with_description("Total flow records ingested")
        .build()
});

/// Total flow records dropped because they could not be parsed or resolved.
pub static FLOWS_DROPPED_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("netobserve.flows.dropped.total")
        .with_description("Total flow records dropped")
        .build()
});

/// Total events dropped from a subscriber's bounded queue under backpressure.
pub static FLOWS_SUBSCRIBER_BACKPRESSURE_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("netobserve.flows.subscriber.backpressure.total")
        .with_description("Total flow events dropped under subscriber backpressure")
        .build()
});

/// Duration of a single aggregation rate-recompute pass.
pub static FLOWS_RECOMPUTE_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("netobserve.flows.recompute.duration")
        .with_description("Flow rate recomputation duration")
        .with_unit("s")
        .build()
});

// ============================================================================
// Anomaly detection
// ============================================================================

/// Total anomalies emitted, by rule.
pub static ANOMALIES_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("netobserve.anomalies.total")
        .with_description("Total anomalies detected")
        .build()
});

// ============================================================================
// Probe scheduler
// ============================================================================

/// Total probes executed, by type and outcome.
pub static PROBES_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("netobserve.probes.total")
        .with_description("Total reachability probes executed")
        .build()
});

/// Probe round-trip latency.
pub static PROBE_LATENCY: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("netobserve.probes.latency")
        .with_description("Probe round-trip latency")
        .with_unit("ms")
        .build()
});

// ============================================================================
// Analyzer
// ============================================================================

/// Total issues currently open, by severity.
pub static ANALYZER_ISSUES_OPEN: LazyLock<UpDownCounter<i64>> = LazyLock::new(|| {
    METER
        .i64_up_down_counter("netobserve.analyzer.issues.open")
        .with_description("Currently open issues")
        .build()
});

/// Duration of a single analyzer tick.
pub static ANALYZER_TICK_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("netobserve.analyzer.tick.duration")
        .with_description("Analyzer tick duration")
        .with_unit("s")
        .build()
});

// ============================================================================
// Helpers
// ============================================================================

/// Create a `kind` label (pod, service, endpoints, node, networkpolicy).
pub fn kind_attr(kind: &str) -> KeyValue {
    KeyValue::new("kind", kind.to_string())
}

/// Create a `source` label (universal, observer).
pub fn source_attr(source: &str) -> KeyValue {
    KeyValue::new("source", source.to_string())
}

/// Create a `rule` label naming the anomaly/issue rule that fired.
pub fn rule_attr(rule: &str) -> KeyValue {
    KeyValue::new("rule", rule.to_string())
}

/// Create a `severity` label.
pub fn severity_attr(severity: &str) -> KeyValue {
    KeyValue::new("severity", severity.to_string())
}

/// Create a `probe_type` label (tcp, http, grpc).
pub fn probe_type_attr(probe_type: &str) -> KeyValue {
    KeyValue::new("probe_type", probe_type.to_string())
}

/// Create an `outcome` label.
pub fn outcome_attr(outcome: &str) -> KeyValue {
    KeyValue::new("outcome", outcome.to_string())
}
