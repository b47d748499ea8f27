//! End-to-end scenarios against the assembled control plane

use fleet_alerts::AlertFilter;
use fleet_bus::{topics, AlertEvent, BusPayload};
use fleet_common::{
    Config, EntityRef, HealingAction, NodeStatus, Prediction, PredictionKind, Severity,
    WorkflowStatus,
};
use fleet_control::ControlPlane;
use fleet_healing::{Effector, ScriptedEffector, StepScript};
use fleet_telemetry::{SampleSource, SourceProfile, SyntheticSource};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Ticks are driven manually; the background ticker stays effectively idle
fn test_config() -> Config {
    let mut config = Config::default();
    config.update_interval_ms = 100_000;
    config
}

fn healthy_fleet(count: usize) -> Vec<SourceProfile> {
    (1..=count)
        .map(|i| SourceProfile::healthy(&format!("n-{:02}", i)))
        .collect()
}

async fn plane_with(
    config: Config,
    profiles: Vec<SourceProfile>,
    effector: Option<Arc<dyn Effector>>,
) -> (Arc<ControlPlane>, Arc<SyntheticSource>) {
    let clock = fleet_common::Clock::new();
    let source = Arc::new(SyntheticSource::new("synthetic", profiles, clock));
    let sources: Vec<Arc<dyn SampleSource>> = vec![source.clone()];
    let plane = ControlPlane::init(config, sources, effector)
        .await
        .expect("init");
    plane.start();
    (plane, source)
}

async fn drive_ticks(plane: &Arc<ControlPlane>, count: usize) {
    for _ in 0..count {
        let _ = plane.telemetry().tick().await;
    }
}

/// Let bus delivery tasks drain
async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

fn degraded_profile(node: &str) -> SourceProfile {
    let mut p = SourceProfile::healthy(node);
    p.latency_ms = 220.0;
    p.error_rate_pct = 15.0;
    p.cpu_pct = 96.0;
    p.memory_pct = 92.0;
    p.disk_pct = 96.0;
    p.status = NodeStatus::Degraded;
    p
}

fn node_failure_prediction(node: &str, confidence: f64) -> Prediction {
    Prediction {
        id: Uuid::new_v4(),
        kind: PredictionKind::NodeFailure,
        severity: Severity::Critical,
        entity: EntityRef::Node(node.to_string()),
        score: 0.85,
        factors: HashMap::new(),
        predicted_timeframe: "30 minutes".to_string(),
        confidence,
        recommendations: Vec::new(),
        created_at: chrono::Utc::now(),
    }
}

// S1 — healthy steady state
#[tokio::test]
async fn healthy_steady_state_is_quiet() {
    let (plane, _source) = plane_with(test_config(), healthy_fleet(10), None).await;
    drive_ticks(&plane, 60).await;
    settle().await;

    assert!(plane.recent_predictions().is_empty());
    assert!(plane.recent_alerts(&AlertFilter::default()).is_empty());
    assert!(plane.workflow_history().is_empty());

    let snapshot = plane.fleet_snapshot().expect("snapshot");
    assert_eq!(snapshot.total, 10);
    assert_eq!(snapshot.healthy_count, 10);
    assert!(snapshot.availability_pct >= 99.0);

    let improvement = plane.improvement_metrics();
    assert!((improvement.ratio.expect("ratio") - 1.0).abs() < 0.05);

    plane.stop().await;
}

// S2 — critical node degradation heals with a node restart
#[tokio::test]
async fn critical_degradation_triggers_node_restart() {
    let effector = Arc::new(ScriptedEffector::new());
    let (plane, source) = plane_with(
        test_config(),
        healthy_fleet(10),
        Some(effector.clone() as Arc<dyn Effector>),
    )
    .await;

    source.set_profile(degraded_profile("n-01"));
    drive_ticks(&plane, 40).await;
    settle().await;

    let failure = plane
        .recent_predictions()
        .into_iter()
        .find(|p| {
            p.kind == PredictionKind::NodeFailure
                && p.entity == EntityRef::Node("n-01".to_string())
        })
        .expect("node failure prediction");
    assert_eq!(failure.severity, Severity::Critical);
    assert!(failure.score > 0.8);

    let restart = plane
        .workflow_history()
        .into_iter()
        .chain(plane.active_workflows())
        .find(|w| w.action == HealingAction::RestartNode)
        .expect("restart_node workflow");
    assert_eq!(restart.entity, EntityRef::Node("n-01".to_string()));

    let step_names: Vec<&str> = restart.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        step_names,
        vec![
            "validate",
            "drain_traffic",
            "restart",
            "verify_health",
            "restore_traffic"
        ]
    );

    plane.stop().await;
}

// S3 — cooldown gate blocks the fourth attempt and reopens after cooldown
#[tokio::test]
async fn cooldown_gate_blocks_then_reopens() {
    let mut config = test_config();
    config.policies.node_restart.max_retries = 3;
    config.policies.node_restart.failure_threshold = 3;
    config.policies.node_restart.cooldown_ms = 300;

    let effector = Arc::new(ScriptedEffector::new());
    effector.script("restart", StepScript::Fail("node stuck".to_string()));
    let (plane, _source) = plane_with(
        config,
        healthy_fleet(1),
        Some(effector.clone() as Arc<dyn Effector>),
    )
    .await;

    let orchestrator = plane.orchestrator();
    for attempt in 0..3 {
        let id = orchestrator
            .handle_prediction(&node_failure_prediction("n-01", 0.9))
            .unwrap_or_else(|| panic!("attempt {} should start", attempt));
        let workflow = orchestrator.engine().wait_terminal(id).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Failed);
    }

    // Fourth request: blocked, reported on the bus, no new workflow
    let (_handle, mut rx) = plane.bus().subscribe_channel(topics::HEALING_WORKFLOWS);
    assert!(orchestrator
        .handle_prediction(&node_failure_prediction("n-01", 0.9))
        .is_none());
    let event = rx.recv().await.unwrap();
    match event.payload {
        BusPayload::Workflow(fleet_bus::WorkflowEvent::PolicyBlocked { action, .. }) => {
            assert_eq!(action, "restart_node");
        }
        other => panic!("expected policy block, got {:?}", other),
    }
    assert_eq!(plane.workflow_history().len(), 3);

    // After the cooldown elapses a new request starts a workflow
    tokio::time::sleep(Duration::from_millis(350)).await;
    effector.clear();
    let id = orchestrator
        .handle_prediction(&node_failure_prediction("n-01", 0.9))
        .expect("post-cooldown workflow");
    let workflow = orchestrator.engine().wait_terminal(id).await.unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Completed);

    plane.stop().await;
}

// S4 — fleet stress escalates to emergency scaling
#[tokio::test]
async fn fleet_stress_triggers_emergency_scaling() {
    let (plane, source) = plane_with(test_config(), healthy_fleet(10), None).await;

    drive_ticks(&plane, 5).await;
    for i in 1..=8 {
        let mut p = SourceProfile::healthy(&format!("n-{:02}", i));
        p.cpu_pct = 92.0;
        p.memory_pct = 88.0;
        p.latency_ms = 150.0;
        p.throughput_ops_s = 60.0;
        p.availability_pct = 92.0;
        p.status = NodeStatus::Degraded;
        source.set_profile(p);
    }
    drive_ticks(&plane, 12).await;
    settle().await;

    let fleet_failure = plane
        .recent_predictions()
        .into_iter()
        .find(|p| p.kind == PredictionKind::FleetFailure)
        .expect("fleet failure prediction");
    assert!(fleet_failure.score > 0.7);
    assert!(fleet_failure.severity >= Severity::High);

    let scaling = plane
        .workflow_history()
        .into_iter()
        .chain(plane.active_workflows())
        .find(|w| w.action == HealingAction::EmergencyScaling)
        .expect("emergency_scaling workflow");
    assert_eq!(scaling.entity, EntityRef::Fleet);
    let step_names: Vec<&str> = scaling.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        step_names,
        vec!["assess_fleet", "execute_scaling", "verify_stability"]
    );

    plane.stop().await;
}

// S5 — alert lifecycle: fire, acknowledge, resolve, re-fire
#[tokio::test]
async fn alert_lifecycle_round_trip() {
    let (plane, source) = plane_with(test_config(), healthy_fleet(3), None).await;
    let (_handle, mut alert_rx) = plane.bus().subscribe_channel(topics::ALERTS);

    let mut hot = SourceProfile::healthy("n-01");
    hot.cpu_pct = 95.0;
    source.set_profile(hot);
    drive_ticks(&plane, 1).await;
    settle().await;

    let alerts = plane.recent_alerts(&AlertFilter::default());
    let alert = alerts
        .iter()
        .find(|a| a.entity.as_deref() == Some("n-01"))
        .expect("cpu alert");
    assert_eq!(alert.severity, fleet_common::AlertSeverity::Critical);

    let acked = plane
        .acknowledge_alert(alert.id, "op", None)
        .expect("acknowledge");
    assert_eq!(acked.acknowledgments.len(), 1);
    assert!(!acked.resolved);

    // Conditions recover, operator resolves
    source.set_profile(SourceProfile::healthy("n-01"));
    drive_ticks(&plane, 3).await;
    let resolved = plane.resolve_alert(alert.id).expect("resolve");
    assert!(resolved.resolved);
    assert!(resolved.acknowledgments[0].at <= resolved.resolved_at.unwrap());

    // Resolution event observable on the bus
    let mut saw_resolution = false;
    while let Ok(event) = alert_rx.try_recv() {
        if let BusPayload::Alert(AlertEvent::Resolved { alert_id, .. }) = event.payload {
            if alert_id == alert.id {
                saw_resolution = true;
            }
        }
    }
    assert!(saw_resolution);

    // Second resolve has no further effect
    let again = plane.resolve_alert(alert.id).expect("idempotent resolve");
    assert_eq!(again.resolved_at, resolved.resolved_at);

    // An identical crossing now produces a new, distinct alert
    let mut hot = SourceProfile::healthy("n-01");
    hot.cpu_pct = 95.0;
    source.set_profile(hot);
    drive_ticks(&plane, 1).await;
    settle().await;

    let alerts = plane.recent_alerts(&AlertFilter::default());
    let fresh = alerts
        .iter()
        .filter(|a| a.entity.as_deref() == Some("n-01"))
        .filter(|a| !a.resolved)
        .count();
    assert!(fresh >= 1);
    assert!(alerts.iter().any(|a| a.id != alert.id));

    plane.stop().await;
}

// S6 — a single latency spike is an anomaly, not a failure
#[tokio::test]
async fn latency_spike_is_an_anomaly_not_a_failure() {
    let (plane, source) = plane_with(test_config(), healthy_fleet(3), None).await;

    drive_ticks(&plane, 15).await;

    let mut spike = SourceProfile::healthy("n-02");
    spike.latency_ms = 500.0;
    source.set_profile(spike);
    drive_ticks(&plane, 1).await;
    settle().await;

    let predictions = plane.recent_predictions();
    let anomaly = predictions
        .iter()
        .find(|p| {
            p.kind == PredictionKind::PerformanceAnomaly
                && p.entity == EntityRef::Node("n-02".to_string())
        })
        .expect("anomaly prediction");
    assert_eq!(anomaly.severity, Severity::High);
    assert!(anomaly.factors["latency_ms"] > 0.8);

    assert!(predictions
        .iter()
        .all(|p| p.kind != PredictionKind::NodeFailure));

    plane.stop().await;
}

// Snapshot save then load reproduces the persisted state
#[tokio::test]
async fn persisted_state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.data_dir = Some(dir.path().to_path_buf());

    let (plane, source) = plane_with(config.clone(), healthy_fleet(5), None).await;
    source.set_profile(degraded_profile("n-01"));
    drive_ticks(&plane, 40).await;
    settle().await;

    // State is snapshotted during stop; capture afterwards so the
    // comparison sees exactly what was written
    plane.stop().await;
    let predictions_before = plane.recent_predictions();
    let history_before = plane.workflow_history();
    let improvement_before = plane.improvement_metrics();
    assert!(!predictions_before.is_empty());

    let restarted = ControlPlane::init(config, Vec::new(), None).await.unwrap();
    assert_eq!(restarted.recent_predictions(), predictions_before);
    assert_eq!(restarted.workflow_history(), history_before);
    assert_eq!(
        restarted.improvement_metrics().baseline_throughput,
        improvement_before.baseline_throughput
    );
    let detail = restarted.node("n-01").expect("persisted node");
    assert_eq!(detail.sample.node_id, "n-01");
    assert!(detail.baseline.is_some());
}

// Healing requests dispatched on the bus reach the orchestrator
#[tokio::test]
async fn dispatched_healing_requests_start_workflows() {
    let (plane, _source) = plane_with(test_config(), healthy_fleet(1), None).await;

    plane.dispatch_healing(fleet_common::HealingRequest {
        prediction: node_failure_prediction("n-09", 0.9),
        requested_by: Some("replica-2".to_string()),
    });
    settle().await;

    let found = plane
        .workflow_history()
        .into_iter()
        .chain(plane.active_workflows())
        .any(|w| w.entity == EntityRef::Node("n-09".to_string()));
    assert!(found);

    plane.stop().await;
}
