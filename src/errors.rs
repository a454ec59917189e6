//! Crate-wide error taxonomy.
//!
//! Mirrors the kinds a subsystem can raise, not Rust type hierarchies:
//! a `SetupError` is fatal at startup, everything else is absorbed
//! locally by the subsystem that produced it (see each module's retry
//! and backpressure handling) and never propagates as a panic.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NetobserveError>;

/// Top-level error type. Subsystems mostly work with their own local
/// error enum (`watcher::WatchError`, `flows::FlowError`, ...) and only
/// convert into this one at the boundary where it matters (startup,
/// public API return values).
#[derive(Debug, Error)]
pub enum NetobserveError {
    /// A subsystem could not start: bad kubeconfig, missing capabilities,
    /// invalid configuration. Fatal — the process should exit non-zero.
    #[error("setup failed: {0}")]
    Setup(String),

    /// A transient failure talking to an upstream: a watch disconnected,
    /// a gRPC stream hit EOF, a probe dial failed. Never fatal; the
    /// subsystem retries with backoff and continues.
    #[error("transient upstream error: {0}")]
    TransientUpstream(String),

    /// A record could not be parsed (malformed flow record or conntrack
    /// line). The record is dropped and a counter incremented.
    #[error("parse error: {0}")]
    Parse(String),

    /// A request violated its contract (e.g. an unknown simulation
    /// type). The caller gets a client-error response.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// A subscriber could not keep up with its queue; the oldest
    /// pending item was dropped.
    #[error("backpressure: dropped for {0}")]
    Backpressure(String),

    /// A bounded store (ring buffer) was full; the oldest entry was
    /// evicted to make room.
    #[error("resource exhausted: {0}")]
    ResourceExhaustion(String),

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "observer")]
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),
}
