//! The predictive analyzer: explicit rule methods, no model objects

use crate::trend::{self, sample_variance, Trend};
use async_trait::async_trait;
use fleet_bus::{topics, BusEvent, BusHandler, BusPayload, MessageBus};
use fleet_common::{
    Clock, Config, EntityRef, FleetSnapshot, NodeUpdate, Prediction, PredictionKind,
    Recommendation, Severity,
};
use fleet_store::{BaselineLearner, SampleStore};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Retained predictions
const PREDICTION_RING: usize = 1_000;
/// Fleet snapshots kept for fleet-level trend factors
const FLEET_HISTORY: usize = 120;
/// Minimum snapshots before fleet trends are evaluated
const MIN_FLEET_HISTORY: usize = 5;
/// Minimum samples before degradation trends are evaluated
const MIN_DEGRADATION_SAMPLES: usize = 10;

/// Latency variance above this counts as unstable
const VARIABILITY_LIMIT: f64 = 1_000.0;
/// Per-node resource level that counts toward fleet exhaustion
const EXHAUSTION_PCT: f64 = 85.0;
/// Fraction of the fleet at which cascade/exhaustion factors saturate
const FLEET_FRACTION_SATURATION: f64 = 0.5;

/// Evaluates telemetry updates and emits predictions.
///
/// Driven by bus subscription: per-node updates run risk scoring, anomaly
/// detection, and degradation analysis in that order; fleet updates run the
/// fleet-level factors. Scoring is purely in-memory and never suspends.
pub struct PredictiveAnalyzer {
    config: Arc<Config>,
    store: Arc<SampleStore>,
    baselines: Arc<BaselineLearner>,
    bus: MessageBus,
    clock: Clock,
    predictions: Mutex<VecDeque<Prediction>>,
    fleet_history: Mutex<VecDeque<FleetSnapshot>>,
    emitted: AtomicU64,
}

impl PredictiveAnalyzer {
    pub fn new(
        config: Arc<Config>,
        store: Arc<SampleStore>,
        baselines: Arc<BaselineLearner>,
        bus: MessageBus,
        clock: Clock,
    ) -> Self {
        Self {
            config,
            store,
            baselines,
            bus,
            clock,
            predictions: Mutex::new(VecDeque::with_capacity(64)),
            fleet_history: Mutex::new(VecDeque::with_capacity(FLEET_HISTORY)),
            emitted: AtomicU64::new(0),
        }
    }

    /// Evaluate one node after a telemetry update
    pub fn evaluate_node(&self, node_id: &str) -> Vec<Prediction> {
        let mut out = Vec::new();
        if let Some(p) = self.node_failure_risk(node_id) {
            out.push(p);
        }
        if let Some(p) = self.performance_anomaly(node_id) {
            out.push(p);
        }
        if let Some(p) = self.performance_degradation(node_id) {
            out.push(p);
        }
        out
    }

    /// Evaluate the fleet after a rollup
    pub fn evaluate_fleet(&self, snapshot: &FleetSnapshot) -> Option<Prediction> {
        {
            let mut history = self.fleet_history.lock();
            if history.len() >= FLEET_HISTORY {
                history.pop_front();
            }
            history.push_back(snapshot.clone());
            if history.len() < MIN_FLEET_HISTORY {
                return None;
            }
        }
        self.fleet_failure_risk(snapshot)
    }

    /// Last emitted predictions, oldest first
    pub fn recent_predictions(&self) -> Vec<Prediction> {
        self.predictions.lock().iter().cloned().collect()
    }

    pub fn predictions_emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Ring contents for persistence
    pub fn export(&self) -> Vec<Prediction> {
        self.recent_predictions()
    }

    /// Restore the ring from a persisted export
    pub fn import(&self, predictions: Vec<Prediction>) {
        let mut ring = self.predictions.lock();
        ring.clear();
        for prediction in predictions.into_iter().rev().take(PREDICTION_RING).rev() {
            ring.push_back(prediction);
        }
    }

    // --- NodeFailure -----------------------------------------------------

    /// Weighted risk scoring over the recent window.
    ///
    /// Only factors whose rule fired participate; the score is the weighted
    /// mean over those factors. Emission is strict (`>` threshold).
    fn node_failure_risk(&self, node_id: &str) -> Option<Prediction> {
        let model = &self.config.models.failure_prediction;
        let window = self.store.recent(node_id, model.lookback);
        if window.len() < model.lookback {
            return None;
        }
        let latest = window.last().expect("non-empty window");

        let mut factors: Vec<(&'static str, f64, f64)> = Vec::new();

        let latency = latest.performance.latency_ms;
        if latency > 150.0 {
            factors.push(("latency_risk", 0.8, 0.15));
        } else if latency > 100.0 {
            factors.push(("latency_risk", 0.6, 0.15));
        }

        let latencies: Vec<f64> = window.iter().map(|s| s.performance.latency_ms).collect();
        if trend::classify(&latencies) == Trend::Rising {
            factors.push(("latency_trend", 0.7, 0.10));
        }

        let error_rate = latest.performance.error_rate_pct;
        if error_rate > 10.0 {
            factors.push(("error_rate_risk", 0.9, 0.20));
        } else if error_rate > 5.0 {
            factors.push(("error_rate_risk", 0.7, 0.20));
        }

        let cpu = latest.performance.cpu_pct;
        if cpu > 90.0 {
            factors.push(("cpu_risk", 0.8, 0.15));
        } else if cpu > 80.0 {
            factors.push(("cpu_risk", 0.6, 0.15));
        }

        let memory = latest.performance.memory_pct;
        if memory > 90.0 {
            factors.push(("memory_risk", 0.8, 0.15));
        } else if memory > 80.0 {
            factors.push(("memory_risk", 0.6, 0.15));
        }

        let disk = latest.performance.disk_pct;
        if disk > 95.0 {
            factors.push(("disk_risk", 0.9, 0.10));
        } else if disk > 85.0 {
            factors.push(("disk_risk", 0.7, 0.10));
        }

        match latest.health.status {
            fleet_common::NodeStatus::Healthy => {}
            fleet_common::NodeStatus::Degraded => factors.push(("health_risk", 0.6, 0.10)),
            _ => factors.push(("health_risk", 0.9, 0.10)),
        }

        if sample_variance(&latencies) > VARIABILITY_LIMIT {
            factors.push(("variability_risk", 0.7, 0.05));
        }

        if factors.is_empty() {
            return None;
        }
        let weight_sum: f64 = factors.iter().map(|(_, _, w)| w).sum();
        let risk: f64 = factors.iter().map(|(_, f, w)| f * w).sum::<f64>() / weight_sum;
        if risk <= model.threshold {
            return None;
        }

        let severity = severity_for(risk);
        let window_fill = (window.len() as f64 / model.lookback as f64).min(1.0);
        let confidence = (0.6 * risk + 0.4 * window_fill).min(0.95);
        let recommendations = node_recommendations(&factors, severity);
        let factor_map: HashMap<String, f64> = factors
            .iter()
            .map(|(name, score, _)| (name.to_string(), *score))
            .collect();

        debug!(node = node_id, risk, ?severity, "node failure risk emitted");
        Some(Prediction {
            id: Uuid::new_v4(),
            kind: PredictionKind::NodeFailure,
            severity,
            entity: EntityRef::Node(node_id.to_string()),
            score: risk,
            factors: factor_map,
            predicted_timeframe: timeframe_for(risk).to_string(),
            confidence,
            recommendations,
            created_at: self.clock.now(),
        })
    }

    // --- PerformanceAnomaly ----------------------------------------------

    /// Max relative deviation from the established baseline over the key
    /// fields; no baseline, no anomaly.
    fn performance_anomaly(&self, node_id: &str) -> Option<Prediction> {
        let baseline = self.baselines.established(node_id)?;
        let latest = self.store.latest(node_id)?;

        let pairs = [
            ("latency_ms", latest.performance.latency_ms, baseline.latency_ms),
            (
                "throughput_ops_s",
                latest.performance.throughput_ops_s,
                baseline.throughput_ops_s,
            ),
            (
                "error_rate_pct",
                latest.performance.error_rate_pct,
                baseline.error_rate_pct,
            ),
            ("cpu_pct", latest.performance.cpu_pct, baseline.cpu_pct),
        ];

        let mut factors = HashMap::new();
        let mut deviation: f64 = 0.0;
        for (name, observed, reference) in pairs {
            if reference.abs() < f64::EPSILON {
                continue;
            }
            let d = (observed - reference).abs() / reference;
            factors.insert(name.to_string(), d);
            deviation = deviation.max(d);
        }

        let sensitivity = self.config.models.anomaly.sensitivity;
        if deviation <= sensitivity {
            return None;
        }

        let severity = if deviation > 0.8 {
            Severity::High
        } else {
            Severity::Medium
        };
        let confidence = (0.4 + deviation / 2.0).min(0.9);

        debug!(node = node_id, deviation, ?severity, "performance anomaly emitted");
        Some(Prediction {
            id: Uuid::new_v4(),
            kind: PredictionKind::PerformanceAnomaly,
            severity,
            entity: EntityRef::Node(node_id.to_string()),
            score: deviation.min(1.0),
            factors,
            predicted_timeframe: "immediate".to_string(),
            confidence,
            recommendations: vec![Recommendation {
                priority: severity,
                action_label: "investigate deviation".to_string(),
                description: format!(
                    "node {} deviates {:.0}% from its learned baseline",
                    node_id,
                    deviation * 100.0
                ),
                effector_tag: "restart_services".to_string(),
            }],
            created_at: self.clock.now(),
        })
    }

    // --- PerformanceDegradation ------------------------------------------

    /// Independent monotonic trends over the configured window
    fn performance_degradation(&self, node_id: &str) -> Option<Prediction> {
        let model = &self.config.models.degradation;
        let window = self.store.recent(node_id, model.trend_window);
        if window.len() < MIN_DEGRADATION_SAMPLES {
            return None;
        }

        let latencies: Vec<f64> = window.iter().map(|s| s.performance.latency_ms).collect();
        let throughputs: Vec<f64> = window
            .iter()
            .map(|s| s.performance.throughput_ops_s)
            .collect();
        let error_rates: Vec<f64> = window
            .iter()
            .map(|s| s.performance.error_rate_pct)
            .collect();

        let mut score = 0.0;
        let mut factors = HashMap::new();
        if trend::classify(&latencies) == Trend::Rising {
            score += 0.4;
            factors.insert("latency_rising".to_string(), 0.4);
        }
        if trend::classify(&throughputs) == Trend::Falling {
            score += 0.4;
            factors.insert("throughput_falling".to_string(), 0.4);
        }
        if trend::classify(&error_rates) == Trend::Rising {
            score += 0.2;
            factors.insert("error_rate_rising".to_string(), 0.2);
        }

        if score * 100.0 <= model.threshold_pct {
            return None;
        }

        let severity = if score > 0.6 {
            Severity::High
        } else {
            Severity::Medium
        };

        debug!(node = node_id, score, ?severity, "performance degradation emitted");
        Some(Prediction {
            id: Uuid::new_v4(),
            kind: PredictionKind::PerformanceDegradation,
            severity,
            entity: EntityRef::Node(node_id.to_string()),
            score,
            factors,
            predicted_timeframe: "2 hours".to_string(),
            confidence: 0.65,
            recommendations: vec![Recommendation {
                priority: severity,
                action_label: "scale resources".to_string(),
                description: format!("sustained performance decline on node {}", node_id),
                effector_tag: "scale_resources".to_string(),
            }],
            created_at: self.clock.now(),
        })
    }

    // --- Fleet level ------------------------------------------------------

    fn fleet_failure_risk(&self, snapshot: &FleetSnapshot) -> Option<Prediction> {
        let (availability, correlated) = {
            let history = self.fleet_history.lock();
            let availabilities: Vec<f64> =
                history.iter().map(|s| s.availability_pct).collect();
            let latencies: Vec<f64> = history.iter().map(|s| s.average_latency_ms).collect();
            let throughputs: Vec<f64> =
                history.iter().map(|s| s.total_throughput_ops_s).collect();
            (
                self.availability_factor(&availabilities),
                correlated_factor(&latencies, &throughputs),
            )
        };

        let cascade = if snapshot.total == 0 {
            0.0
        } else {
            let unhealthy =
                (snapshot.total - snapshot.healthy_count) as f64 / snapshot.total as f64;
            (unhealthy / FLEET_FRACTION_SATURATION).min(1.0)
        };

        let exhaustion = {
            let latest = self.store.all_latest();
            if latest.is_empty() {
                0.0
            } else {
                let exhausted = latest
                    .values()
                    .filter(|s| {
                        s.performance.cpu_pct > EXHAUSTION_PCT
                            || s.performance.memory_pct > EXHAUSTION_PCT
                    })
                    .count() as f64
                    / latest.len() as f64;
                (exhausted / FLEET_FRACTION_SATURATION).min(1.0)
            }
        };

        let score =
            0.3 * availability + 0.3 * correlated + 0.25 * cascade + 0.15 * exhaustion;
        if score <= 0.5 {
            return None;
        }

        let factors = HashMap::from([
            ("availability_trend".to_string(), availability),
            ("correlated_degradation".to_string(), correlated),
            ("cascade_pressure".to_string(), cascade),
            ("resource_exhaustion".to_string(), exhaustion),
        ]);
        let severity = severity_for(score);
        let confidence = (0.55 + score / 3.0).min(0.95);

        let kind = if score > 0.7 {
            PredictionKind::FleetFailure
        } else {
            PredictionKind::FleetAnomaly
        };

        let mut recommendations = Vec::new();
        if severity == Severity::Critical {
            recommendations.push(Recommendation {
                priority: Severity::Critical,
                action_label: "emergency scaling".to_string(),
                description: "fleet-wide failure risk; add capacity immediately".to_string(),
                effector_tag: "emergency_scaling".to_string(),
            });
        }
        if cascade >= 0.8 {
            recommendations.push(Recommendation {
                priority: Severity::High,
                action_label: "isolate unhealthy nodes".to_string(),
                description: "contain cascade pressure before it spreads".to_string(),
                effector_tag: "isolate_affected_nodes".to_string(),
            });
        }
        if exhaustion >= 0.8 {
            recommendations.push(Recommendation {
                priority: Severity::High,
                action_label: "scale resources".to_string(),
                description: "widespread cpu/memory exhaustion".to_string(),
                effector_tag: "scale_resources".to_string(),
            });
        }
        if recommendations.is_empty() {
            recommendations.push(Recommendation {
                priority: severity,
                action_label: "rebalance cluster".to_string(),
                description: "redistribute load across the fleet".to_string(),
                effector_tag: "rebalance_cluster".to_string(),
            });
        }

        info!(score, ?severity, ?kind, "fleet risk emitted");
        Some(Prediction {
            id: Uuid::new_v4(),
            kind,
            severity,
            entity: EntityRef::Fleet,
            score,
            factors,
            predicted_timeframe: timeframe_for(score).to_string(),
            confidence,
            recommendations,
            created_at: self.clock.now(),
        })
    }

    fn availability_factor(&self, series: &[f64]) -> f64 {
        let thresholds = &self.config.thresholds.availability;
        let (Some(first), Some(last)) = (series.first(), series.last()) else {
            return 0.2;
        };
        let change = trend::relative_change(*first, *last);
        if change < -0.05 {
            0.9
        } else if *last < thresholds.critical {
            0.8
        } else if change < -0.02 {
            0.7
        } else if *last < thresholds.warning {
            0.6
        } else {
            0.2
        }
    }

    fn record(&self, prediction: Prediction) {
        {
            let mut ring = self.predictions.lock();
            if ring.len() >= PREDICTION_RING {
                ring.pop_front();
            }
            ring.push_back(prediction.clone());
        }
        self.emitted.fetch_add(1, Ordering::Relaxed);
        self.bus
            .publish(topics::PREDICTIONS, BusPayload::Prediction(prediction));
    }
}

#[async_trait]
impl BusHandler for PredictiveAnalyzer {
    async fn handle(&self, event: BusEvent) {
        match event.payload {
            BusPayload::NodeUpdate(NodeUpdate { sample, stale }) => {
                if stale {
                    return;
                }
                for prediction in self.evaluate_node(&sample.node_id) {
                    self.record(prediction);
                }
            }
            BusPayload::FleetUpdate(snapshot) => {
                if let Some(prediction) = self.evaluate_fleet(&snapshot) {
                    self.record(prediction);
                }
            }
            _ => {}
        }
    }
}

fn severity_for(score: f64) -> Severity {
    if score > 0.8 {
        Severity::Critical
    } else if score > 0.6 {
        Severity::High
    } else if score > 0.4 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn timeframe_for(score: f64) -> &'static str {
    if score > 0.9 {
        "5 minutes"
    } else if score > 0.7 {
        "30 minutes"
    } else if score > 0.5 {
        "2 hours"
    } else {
        "6+ hours"
    }
}

/// Latency rising while throughput falls is the correlated-degradation
/// signature; one of the two alone scores lower
fn correlated_factor(latencies: &[f64], throughputs: &[f64]) -> f64 {
    let latency_rising = trend::classify(latencies) == Trend::Rising;
    let throughput_falling = trend::classify(throughputs) == Trend::Falling;
    match (latency_rising, throughput_falling) {
        (true, true) => 0.8,
        (true, false) | (false, true) => 0.5,
        (false, false) => 0.2,
    }
}

/// Map fired factors to canonical effector capabilities
fn node_recommendations(
    factors: &[(&'static str, f64, f64)],
    severity: Severity,
) -> Vec<Recommendation> {
    let mut out = Vec::new();
    for (name, score, _) in factors {
        let (label, description, tag) = match *name {
            "latency_risk" => (
                "tune performance",
                "latency above acceptable bounds",
                "performance_tuning",
            ),
            "error_rate_risk" => (
                "restart services",
                "elevated error rate",
                "restart_services",
            ),
            "cpu_risk" => ("scale resources", "cpu pressure", "scale_resources"),
            "memory_risk" => ("scale resources", "memory pressure", "scale_resources"),
            "disk_risk" => (
                "optimize resources",
                "disk nearly full",
                "optimize_resources",
            ),
            _ => continue,
        };
        out.push(Recommendation {
            priority: if *score >= 0.8 {
                Severity::High
            } else {
                Severity::Medium
            },
            action_label: label.to_string(),
            description: description.to_string(),
            effector_tag: tag.to_string(),
        });
    }
    if severity == Severity::Critical {
        out.push(Recommendation {
            priority: Severity::Critical,
            action_label: "restart node".to_string(),
            description: "compound failure risk; full node restart advised".to_string(),
            effector_tag: "restart_node".to_string(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleet_common::{
        HealthBlock, NodeStatus, PerformanceBlock, Sample, UtilizationBlock,
    };

    struct Fixture {
        analyzer: PredictiveAnalyzer,
        store: Arc<SampleStore>,
        baselines: Arc<BaselineLearner>,
    }

    fn fixture() -> Fixture {
        let clock = Clock::new();
        let config = Arc::new(Config::default());
        let bus = MessageBus::new(1024, clock.clone());
        let store = Arc::new(SampleStore::new(1_000, config.retention_ms, clock.clone()));
        let baselines = Arc::new(BaselineLearner::new(0.1, clock.clone()));
        let analyzer =
            PredictiveAnalyzer::new(config, store.clone(), baselines.clone(), bus, clock);
        Fixture {
            analyzer,
            store,
            baselines,
        }
    }

    fn sample(node: &str) -> Sample {
        Sample {
            node_id: node.to_string(),
            performance: PerformanceBlock {
                latency_ms: 40.0,
                throughput_ops_s: 120.0,
                error_rate_pct: 1.0,
                cpu_pct: 30.0,
                memory_pct: 40.0,
                disk_pct: 50.0,
                operations_total: 100,
            },
            health: HealthBlock {
                status: NodeStatus::Healthy,
                availability_pct: 99.9,
                uptime_ms: 1_000,
            },
            utilization: UtilizationBlock {
                overall_pct: 40.0,
                per_resource: HashMap::new(),
            },
            cost: None,
            recorded_at: Utc::now(),
        }
    }

    fn degraded_sample(node: &str) -> Sample {
        let mut s = sample(node);
        s.performance.latency_ms = 220.0;
        s.performance.error_rate_pct = 15.0;
        s.performance.cpu_pct = 96.0;
        s.performance.memory_pct = 92.0;
        s.performance.disk_pct = 96.0;
        s.health.status = NodeStatus::Degraded;
        s
    }

    fn snapshot(availability: f64, healthy: usize, total: usize) -> FleetSnapshot {
        FleetSnapshot {
            taken_at: Utc::now(),
            total,
            healthy_count: healthy,
            average_latency_ms: 40.0,
            total_throughput_ops_s: 1_200.0,
            availability_pct: availability,
            utilization_pct: 40.0,
            hourly_cost: 12.0,
            nodes: (0..total).map(|i| format!("n-{:02}", i)).collect(),
            stale_count: 0,
        }
    }

    #[test]
    fn healthy_steady_state_emits_nothing() {
        let f = fixture();
        for _ in 0..60 {
            f.store.ingest(sample("n-01")).unwrap();
        }
        assert!(f.analyzer.evaluate_node("n-01").is_empty());
    }

    #[test]
    fn sustained_degradation_emits_critical_node_failure() {
        let f = fixture();
        for _ in 0..40 {
            f.store.ingest(degraded_sample("n-01")).unwrap();
        }
        let predictions = f.analyzer.evaluate_node("n-01");
        let failure = predictions
            .iter()
            .find(|p| p.kind == PredictionKind::NodeFailure)
            .expect("node failure prediction");

        assert_eq!(failure.severity, Severity::Critical);
        assert!(failure.score > 0.8);
        assert!(failure.confidence > 0.6);
        assert_eq!(failure.predicted_timeframe, "30 minutes");
        assert!(failure
            .recommendations
            .iter()
            .any(|r| r.effector_tag == "restart_node"));
    }

    #[test]
    fn too_few_samples_skip_risk_scoring() {
        let f = fixture();
        for _ in 0..10 {
            f.store.ingest(degraded_sample("n-01")).unwrap();
        }
        let predictions = f.analyzer.evaluate_node("n-01");
        assert!(predictions
            .iter()
            .all(|p| p.kind != PredictionKind::NodeFailure));
    }

    #[test]
    fn risk_exactly_at_threshold_does_not_emit() {
        // Disk at 90 fires only disk_risk = 0.7, so the weighted mean is
        // exactly the 0.7 threshold
        let f = fixture();
        for _ in 0..30 {
            let mut s = sample("n-01");
            s.performance.disk_pct = 90.0;
            f.store.ingest(s).unwrap();
        }
        let predictions = f.analyzer.evaluate_node("n-01");
        assert!(predictions
            .iter()
            .all(|p| p.kind != PredictionKind::NodeFailure));
    }

    #[test]
    fn anomaly_requires_established_baseline() {
        let f = fixture();
        for _ in 0..5 {
            f.store.ingest(sample("n-02")).unwrap();
            f.baselines.fold(&sample("n-02"));
        }
        let mut spike = sample("n-02");
        spike.performance.latency_ms = 500.0;
        f.store.ingest(spike).unwrap();
        let predictions = f.analyzer.evaluate_node("n-02");
        assert!(predictions
            .iter()
            .all(|p| p.kind != PredictionKind::PerformanceAnomaly));
    }

    #[test]
    fn latency_spike_emits_high_anomaly_without_node_failure() {
        let f = fixture();
        for _ in 0..15 {
            let s = sample("n-02");
            f.store.ingest(s.clone()).unwrap();
            f.baselines.fold(&s);
        }
        let mut spike = sample("n-02");
        spike.performance.latency_ms = 500.0;
        f.store.ingest(spike).unwrap();

        let predictions = f.analyzer.evaluate_node("n-02");
        let anomaly = predictions
            .iter()
            .find(|p| p.kind == PredictionKind::PerformanceAnomaly)
            .expect("anomaly prediction");
        assert_eq!(anomaly.severity, Severity::High);
        assert!(anomaly.factors["latency_ms"] > 0.8);
        assert!(predictions
            .iter()
            .all(|p| p.kind != PredictionKind::NodeFailure));
    }

    #[test]
    fn rising_latency_trend_emits_degradation() {
        let f = fixture();
        for i in 0..60 {
            let mut s = sample("n-03");
            s.performance.latency_ms = 40.0 + i as f64;
            f.store.ingest(s).unwrap();
        }
        let predictions = f.analyzer.evaluate_node("n-03");
        let degradation = predictions
            .iter()
            .find(|p| p.kind == PredictionKind::PerformanceDegradation)
            .expect("degradation prediction");
        assert_eq!(degradation.severity, Severity::Medium);
        assert!(degradation.factors.contains_key("latency_rising"));
    }

    #[test]
    fn fleet_stress_emits_critical_fleet_failure() {
        let f = fixture();
        // Stressed nodes dominate the latest-sample view
        for i in 0..10 {
            let mut s = sample(&format!("n-{:02}", i));
            if i < 8 {
                s.performance.cpu_pct = 92.0;
                s.performance.memory_pct = 88.0;
                s.health.status = NodeStatus::Degraded;
            }
            f.store.ingest(s).unwrap();
        }

        // Availability sliding from healthy to 92 with correlated
        // latency/throughput movement
        let mut emitted = None;
        for i in 0..10 {
            let mut snap = snapshot(99.5 - i as f64, 2, 10);
            snap.average_latency_ms = 40.0 + 15.0 * i as f64;
            snap.total_throughput_ops_s = 1_200.0 - 80.0 * i as f64;
            emitted = f.analyzer.evaluate_fleet(&snap);
        }

        let prediction = emitted.expect("fleet prediction");
        assert_eq!(prediction.kind, PredictionKind::FleetFailure);
        assert!(prediction.score > 0.7);
        assert!(prediction.severity >= Severity::High);
        assert!(prediction
            .recommendations
            .iter()
            .any(|r| r.effector_tag == "emergency_scaling"));
    }

    #[test]
    fn healthy_fleet_emits_nothing() {
        let f = fixture();
        for i in 0..10 {
            f.store.ingest(sample(&format!("n-{:02}", i))).unwrap();
        }
        let mut emitted = None;
        for _ in 0..10 {
            emitted = f.analyzer.evaluate_fleet(&snapshot(99.9, 10, 10));
        }
        assert!(emitted.is_none());
    }

    #[test]
    fn prediction_ring_is_bounded_and_round_trips() {
        let f = fixture();
        for _ in 0..40 {
            f.store.ingest(degraded_sample("n-01")).unwrap();
        }
        for _ in 0..5 {
            for p in f.analyzer.evaluate_node("n-01") {
                f.analyzer.record(p);
            }
        }
        let exported = f.analyzer.export();
        assert!(!exported.is_empty());
        assert!(f.analyzer.predictions_emitted() >= exported.len() as u64);

        let g = fixture();
        g.analyzer.import(exported.clone());
        assert_eq!(g.analyzer.recent_predictions(), exported);
    }
}
