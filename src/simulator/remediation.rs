//! Fixed remediation catalog for simulations, keyed by (simulation
//! type, risk).

use super::{Risk, SimulationKind};

pub fn for_simulation(kind: SimulationKind, risk: Risk) -> Vec<String> {
    match (kind, risk) {
        (SimulationKind::NetworkPolicy, Risk::Critical) => vec![
            "A critical-path destination would be blocked; stage this change behind a canary before applying cluster-wide".to_string(),
            "Add an explicit allow rule for the affected critical-path destinations".to_string(),
        ],
        (SimulationKind::NetworkPolicy, Risk::High) => vec![
            "Review the blocked connection list for unintended denials before applying".to_string(),
        ],
        (SimulationKind::NetworkPolicy, _) => vec!["Apply during a low-traffic window and monitor for new connectivity issues".to_string()],

        (SimulationKind::PodFailure, Risk::Critical) => vec![
            "This pod is its only replica; add a second replica or a PodDisruptionBudget before depending on this further".to_string(),
        ],
        (SimulationKind::PodFailure, Risk::High) => vec!["Consider increasing replica count beyond two for this workload".to_string()],
        (SimulationKind::PodFailure, _) => vec!["No action required; sufficient replicas remain".to_string()],

        (SimulationKind::NodeFailure, Risk::Critical) => vec![
            "One or more workloads have no replicas outside this node; spread them across nodes with anti-affinity or topology spread constraints".to_string(),
        ],
        (SimulationKind::NodeFailure, Risk::High) => vec!["A large number of pods would be rescheduled; verify cluster capacity can absorb them".to_string()],
        (SimulationKind::NodeFailure, _) => vec!["Remaining replicas on other nodes should absorb the load".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_combination_has_a_recommendation() {
        for kind in [SimulationKind::NetworkPolicy, SimulationKind::PodFailure, SimulationKind::NodeFailure] {
            for risk in [Risk::Low, Risk::Medium, Risk::High, Risk::Critical] {
                assert!(!for_simulation(kind, risk).is_empty());
            }
        }
    }
}
