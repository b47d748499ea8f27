//! Common types for the fleet control plane

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Stable identifier for a monitored node
pub type NodeId = String;

/// Unique identifier for events, predictions, workflows, and alerts
pub type EventId = Uuid;

/// Health status reported by a node
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Healthy,
    Degraded,
    Critical,
    Unhealthy,
    Failed,
}

impl NodeStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, NodeStatus::Healthy)
    }
}

/// Performance measurements for one node at one instant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceBlock {
    pub latency_ms: f64,
    pub throughput_ops_s: f64,
    pub error_rate_pct: f64,
    pub cpu_pct: f64,
    pub memory_pct: f64,
    pub disk_pct: f64,
    pub operations_total: u64,
}

/// Health measurements for one node at one instant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthBlock {
    pub status: NodeStatus,
    pub availability_pct: f64,
    pub uptime_ms: u64,
}

/// Resource utilization breakdown
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UtilizationBlock {
    pub overall_pct: f64,
    #[serde(default)]
    pub per_resource: HashMap<String, f64>,
}

/// Cost attribution for one node
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CostBlock {
    pub hourly: f64,
    pub daily: f64,
}

/// One time-stamped performance, health, and utilization record for one node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub node_id: NodeId,
    pub performance: PerformanceBlock,
    pub health: HealthBlock,
    pub utilization: UtilizationBlock,
    pub cost: Option<CostBlock>,
    pub recorded_at: DateTime<Utc>,
}

impl Sample {
    /// Validate the sample against the data-model invariants.
    ///
    /// Percentages must be in [0, 100]; rates and counters must be
    /// non-negative. Violations are invariant errors and the offending
    /// sample is never stored.
    pub fn validate(&self) -> Result<()> {
        let pct_fields = [
            ("cpu_pct", self.performance.cpu_pct),
            ("memory_pct", self.performance.memory_pct),
            ("disk_pct", self.performance.disk_pct),
            ("error_rate_pct", self.performance.error_rate_pct),
            ("availability_pct", self.health.availability_pct),
            ("utilization.overall_pct", self.utilization.overall_pct),
        ];
        for (name, value) in pct_fields {
            if !(0.0..=100.0).contains(&value) || value.is_nan() {
                return Err(Error::Invariant(format!(
                    "sample for {}: {} = {} outside [0, 100]",
                    self.node_id, name, value
                )));
            }
        }
        let rate_fields = [
            ("latency_ms", self.performance.latency_ms),
            ("throughput_ops_s", self.performance.throughput_ops_s),
        ];
        for (name, value) in rate_fields {
            if value < 0.0 || value.is_nan() {
                return Err(Error::Invariant(format!(
                    "sample for {}: {} = {} negative",
                    self.node_id, name, value
                )));
            }
        }
        if let Some(cost) = &self.cost {
            if cost.hourly < 0.0 || cost.daily < 0.0 {
                return Err(Error::Invariant(format!(
                    "sample for {}: negative cost",
                    self.node_id
                )));
            }
        }
        Ok(())
    }
}

/// Cross-node rollup for one telemetry tick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetSnapshot {
    pub taken_at: DateTime<Utc>,
    pub total: usize,
    pub healthy_count: usize,
    pub average_latency_ms: f64,
    pub total_throughput_ops_s: f64,
    pub availability_pct: f64,
    pub utilization_pct: f64,
    pub hourly_cost: f64,
    pub nodes: Vec<NodeId>,
    #[serde(default)]
    pub stale_count: usize,
}

/// Per-node exponential moving averages of the key performance fields
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Baseline {
    pub node_id: NodeId,
    pub latency_ms: f64,
    pub throughput_ops_s: f64,
    pub error_rate_pct: f64,
    pub cpu_pct: f64,
    pub memory_pct: f64,
    pub samples: u64,
    pub updated_at: DateTime<Utc>,
}

impl Baseline {
    /// Number of folded samples after which a baseline is usable
    pub const ESTABLISHED_AFTER: u64 = 10;

    pub fn is_established(&self) -> bool {
        self.samples >= Self::ESTABLISHED_AFTER
    }
}

/// Severity grading shared by predictions and recommendations
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// The sealed set of prediction kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PredictionKind {
    NodeFailure,
    FleetFailure,
    PerformanceAnomaly,
    PerformanceDegradation,
    FleetAnomaly,
}

/// The entity a prediction, workflow, or alert refers to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Node(NodeId),
    Fleet,
}

impl EntityRef {
    /// Stable key for cooldown and dedup tables
    pub fn key(&self) -> &str {
        match self {
            EntityRef::Node(id) => id.as_str(),
            EntityRef::Fleet => "fleet",
        }
    }

    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            EntityRef::Node(id) => Some(id),
            EntityRef::Fleet => None,
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Actionable direction pairing a priority with an effector capability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub priority: Severity,
    pub action_label: String,
    pub description: String,
    pub effector_tag: String,
}

/// Derived future-risk record emitted by the analyzer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub id: EventId,
    pub kind: PredictionKind,
    pub severity: Severity,
    pub entity: EntityRef,
    pub score: f64,
    pub factors: HashMap<String, f64>,
    pub predicted_timeframe: String,
    pub confidence: f64,
    pub recommendations: Vec<Recommendation>,
    pub created_at: DateTime<Utc>,
}

/// Prediction-like request routed between control-plane replicas
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealingRequest {
    pub prediction: Prediction,
    pub requested_by: Option<String>,
}

/// Remediation capabilities the orchestrator can drive
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HealingAction {
    RestartNode,
    RestartServices,
    ScaleResources,
    EmergencyScaling,
    IsolateAffectedNodes,
    PerformanceTuning,
    OptimizeResources,
}

impl HealingAction {
    /// Canonical effector tag for this action
    pub fn tag(&self) -> &'static str {
        match self {
            HealingAction::RestartNode => "restart_node",
            HealingAction::RestartServices => "restart_services",
            HealingAction::ScaleResources => "scale_resources",
            HealingAction::EmergencyScaling => "emergency_scaling",
            HealingAction::IsolateAffectedNodes => "isolate_affected_nodes",
            HealingAction::PerformanceTuning => "performance_tuning",
            HealingAction::OptimizeResources => "optimize_resources",
        }
    }

    /// Ordered step sequence the workflow engine executes for this action
    pub fn steps(&self) -> &'static [&'static str] {
        match self {
            HealingAction::RestartNode => &[
                "validate",
                "drain_traffic",
                "restart",
                "verify_health",
                "restore_traffic",
            ],
            HealingAction::RestartServices => {
                &["identify_services", "restart_each", "verify_each"]
            }
            HealingAction::ScaleResources => &[
                "analyze_usage",
                "compute_plan",
                "execute_scaling",
                "verify_scaling",
            ],
            HealingAction::EmergencyScaling => {
                &["assess_fleet", "execute_scaling", "verify_stability"]
            }
            HealingAction::IsolateAffectedNodes => {
                &["identify_nodes", "isolate_each", "rebalance_fleet"]
            }
            HealingAction::PerformanceTuning => {
                &["analyze", "apply_optimizations", "verify_improvement"]
            }
            HealingAction::OptimizeResources => &[
                "audit_allocation",
                "apply_optimizations",
                "verify_optimization",
            ],
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "restart_node" => Some(HealingAction::RestartNode),
            "restart_services" => Some(HealingAction::RestartServices),
            "scale_resources" => Some(HealingAction::ScaleResources),
            "emergency_scaling" => Some(HealingAction::EmergencyScaling),
            "isolate_affected_nodes" => Some(HealingAction::IsolateAffectedNodes),
            "performance_tuning" => Some(HealingAction::PerformanceTuning),
            "optimize_resources" => Some(HealingAction::OptimizeResources),
            _ => None,
        }
    }
}

/// Workflow lifecycle states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed
                | WorkflowStatus::Failed
                | WorkflowStatus::Timeout
                | WorkflowStatus::Cancelled
        )
    }
}

/// Step execution states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Started,
    Completed,
    Failed,
}

/// One recorded step of a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStep {
    pub name: String,
    pub status: StepStatus,
    pub at: DateTime<Utc>,
    pub error: Option<String>,
}

/// A bounded, timed, step-sequenced remediation attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub id: EventId,
    pub entity: EntityRef,
    pub action: HealingAction,
    pub priority: Severity,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub timeout_ms: u64,
    pub steps: Vec<WorkflowStep>,
    pub ended_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl Workflow {
    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|end| end.signed_duration_since(self.started_at).num_milliseconds())
    }
}

/// Healing counters, updated on workflow terminal transitions
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HealingMetrics {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub avg_duration_ms: f64,
}

impl HealingMetrics {
    /// Fold one terminal workflow into the counters
    pub fn record(&mut self, status: WorkflowStatus, duration_ms: f64) {
        self.total += 1;
        match status {
            WorkflowStatus::Completed => self.successful += 1,
            WorkflowStatus::Failed => self.failed += 1,
            WorkflowStatus::Timeout => self.timed_out += 1,
            WorkflowStatus::Cancelled => self.cancelled += 1,
            WorkflowStatus::Pending | WorkflowStatus::Running => {}
        }
        let n = self.total as f64;
        self.avg_duration_ms += (duration_ms - self.avg_duration_ms) / n;
    }
}

/// Alert severity tiers
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    /// One tier up; Critical saturates
    pub fn escalated(&self) -> Self {
        match self {
            AlertSeverity::Info => AlertSeverity::Warning,
            AlertSeverity::Warning => AlertSeverity::Error,
            AlertSeverity::Error => AlertSeverity::Critical,
            AlertSeverity::Critical => AlertSeverity::Critical,
        }
    }
}

/// Metric kinds the alert manager evaluates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Latency,
    Cpu,
    Memory,
    Disk,
    ErrorRate,
    Availability,
    Cost,
}

/// One acknowledgment on an alert
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Acknowledgment {
    pub user: String,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

/// Severity-graded alert with an ack/resolve lifecycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: EventId,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub entity: Option<NodeId>,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub acknowledgments: Vec<Acknowledgment>,
}

/// Per-node telemetry update published on the bus
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeUpdate {
    pub sample: Sample,
    #[serde(default)]
    pub stale: bool,
}

/// Baseline/current throughput ratio, reported but never acted upon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImprovementReport {
    pub baseline_throughput: f64,
    pub current_throughput: f64,
    pub ratio: f64,
    pub at: DateTime<Utc>,
}

/// Non-fatal component failure surfaced as a bus event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentError {
    pub component: String,
    pub category: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Session totals persisted on shutdown
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub started_at: DateTime<Utc>,
    pub uptime_ms: i64,
    pub samples_ingested: u64,
    pub predictions_emitted: u64,
    pub workflows_run: u64,
    pub alerts_fired: u64,
    pub last_improvement_ratio: Option<f64>,
}
