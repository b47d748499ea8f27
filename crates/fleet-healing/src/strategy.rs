//! Static strategy table keyed on (prediction kind, severity)

use fleet_common::{HealingAction, PredictionKind, Severity};

/// A selected remediation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    pub action: HealingAction,
    pub priority: Severity,
    pub timeout_ms: u64,
    pub policy_name: &'static str,
}

/// Confidence floor below which no strategy is considered (strict `>`)
pub const CONFIDENCE_FLOOR: f64 = 0.6;

/// Look up the strategy for a prediction; pairs outside the table heal
/// nothing.
pub fn strategy_for(kind: PredictionKind, severity: Severity) -> Option<Strategy> {
    use HealingAction::*;
    use PredictionKind::*;
    use Severity::*;

    let strategy = match (kind, severity) {
        (NodeFailure, Critical) => Strategy {
            action: RestartNode,
            priority: Critical,
            timeout_ms: 120_000,
            policy_name: "node_restart",
        },
        (NodeFailure, High) => Strategy {
            action: RestartServices,
            priority: High,
            timeout_ms: 30_000,
            policy_name: "service_restart",
        },
        (NodeFailure, Medium) => Strategy {
            action: ScaleResources,
            priority: Medium,
            timeout_ms: 300_000,
            policy_name: "resource_scaling",
        },
        (FleetFailure, Critical) => Strategy {
            action: EmergencyScaling,
            priority: Critical,
            timeout_ms: 300_000,
            policy_name: "resource_scaling",
        },
        (FleetFailure, High) => Strategy {
            action: IsolateAffectedNodes,
            priority: High,
            timeout_ms: 60_000,
            policy_name: "node_isolation",
        },
        (PerformanceAnomaly, High) => Strategy {
            action: RestartServices,
            priority: High,
            timeout_ms: 30_000,
            policy_name: "service_restart",
        },
        (PerformanceDegradation, High) => Strategy {
            action: ScaleResources,
            priority: High,
            timeout_ms: 300_000,
            policy_name: "resource_scaling",
        },
        _ => return None,
    };
    Some(strategy)
}
