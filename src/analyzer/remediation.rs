//! Fixed remediation catalog, one entry per issue type. These are
//! static suggestions, not derived from cluster state — the analyzer
//! attaches them verbatim to every issue of a given type.

use super::rules::IssueType;

pub fn for_issue(issue_type: IssueType) -> Vec<String> {
    match issue_type {
        IssueType::ConnectivityFailure => vec![
            "Check that the target pod or service is running and its port is listening".to_string(),
            "Inspect NetworkPolicies that might be dropping traffic between these endpoints".to_string(),
        ],
        IssueType::PolicyComplexity => vec![
            "Consolidate overlapping NetworkPolicies in this namespace".to_string(),
            "Review whether all policies are still required".to_string(),
        ],
        IssueType::PolicyCoverageGap => vec![
            "Add a NetworkPolicy selecting this pod's labels to make its allowed traffic explicit".to_string(),
        ],
        IssueType::PodFailed => vec![
            "Check the pod's events and container logs for the failure cause".to_string(),
            "Verify the pod's resource requests fit available node capacity".to_string(),
        ],
        IssueType::PodPending => vec![
            "Check for insufficient cluster resources or an unsatisfiable scheduling constraint".to_string(),
            "Check that referenced images, volumes, and secrets exist".to_string(),
        ],
        IssueType::ContainerRestarts => vec![
            "Check container logs for crash loops".to_string(),
            "Verify liveness probe thresholds aren't too aggressive".to_string(),
        ],
        IssueType::ServiceWithoutEndpoints => vec![
            "Verify the service's selector matches labels on at least one running pod".to_string(),
            "Check that matching pods are passing readiness probes".to_string(),
        ],
        IssueType::CidrOverlap => vec![
            "Reassign one node's pod CIDR to a non-overlapping range".to_string(),
            "Audit the CNI's IPAM configuration for the cluster".to_string(),
        ],
        IssueType::HighLatency => vec![
            "Check for resource contention or throttling on the target pod's node".to_string(),
            "Check for saturation on the network path between source and target".to_string(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_issue_type_has_at_least_one_suggestion() {
        let all = [
            IssueType::ConnectivityFailure,
            IssueType::PolicyComplexity,
            IssueType::PolicyCoverageGap,
            IssueType::PodFailed,
            IssueType::PodPending,
            IssueType::ContainerRestarts,
            IssueType::ServiceWithoutEndpoints,
            IssueType::CidrOverlap,
            IssueType::HighLatency,
        ];
        for issue_type in all {
            assert!(!for_issue(issue_type).is_empty());
        }
    }
}
