//! netobserve — live Kubernetes network topology, flow and anomaly
//! observation engine.
//!
//! Five cooperating subsystems, each owning its own store behind a
//! single reader-writer lock (or a lock-free atomic snapshot):
//!
//! - [`watcher`]: cached views of pods/services/endpoints/nodes/policies.
//! - [`graph`]: the typed topology graph synthesized from the watcher,
//!   flow metrics and probe results.
//! - [`flows`]: the pluggable flow source + aggregator pipeline.
//! - [`anomaly`]: baselines and rule-based anomaly detection.
//! - [`probes`]: periodic reachability probing.
//!
//! [`analyzer`] and [`simulator`] are pure functions over the graph and
//! the other subsystems' snapshots.

pub mod analyzer;
pub mod anomaly;
pub mod api;
pub mod config;
pub mod errors;
pub mod flows;
pub mod graph;
pub mod ids;
pub mod probes;
pub mod simulator;
pub mod utils;
pub mod watcher;

#[cfg(feature = "observer")]
pub mod proto {
    tonic::include_proto!("flowobserver");
}

pub use errors::{NetobserveError, Result};
