//! Per-node exponential moving averages used as reference vectors

use fleet_common::{Baseline, Clock, NodeId, Sample};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Learns per-node baselines by folding each new sample into EMAs.
///
/// Baselines are overwritten in place on every fold; a baseline is usable
/// once at least [`Baseline::ESTABLISHED_AFTER`] samples have been folded.
/// A single fleet-wide throughput baseline is tracked separately for the
/// improvement ratio.
pub struct BaselineLearner {
    alpha: f64,
    baselines: RwLock<HashMap<NodeId, Baseline>>,
    fleet_throughput: RwLock<Option<f64>>,
    clock: Clock,
}

impl BaselineLearner {
    pub fn new(alpha: f64, clock: Clock) -> Self {
        Self {
            alpha,
            baselines: RwLock::new(HashMap::new()),
            fleet_throughput: RwLock::new(None),
            clock,
        }
    }

    /// Fold one sample into its node's baseline
    pub fn fold(&self, sample: &Sample) {
        let now = self.clock.now();
        let mut baselines = self.baselines.write();
        let entry = baselines
            .entry(sample.node_id.clone())
            .or_insert_with(|| Baseline {
                node_id: sample.node_id.clone(),
                latency_ms: sample.performance.latency_ms,
                throughput_ops_s: sample.performance.throughput_ops_s,
                error_rate_pct: sample.performance.error_rate_pct,
                cpu_pct: sample.performance.cpu_pct,
                memory_pct: sample.performance.memory_pct,
                samples: 0,
                updated_at: now,
            });

        let a = self.alpha;
        entry.latency_ms = a * sample.performance.latency_ms + (1.0 - a) * entry.latency_ms;
        entry.throughput_ops_s =
            a * sample.performance.throughput_ops_s + (1.0 - a) * entry.throughput_ops_s;
        entry.error_rate_pct =
            a * sample.performance.error_rate_pct + (1.0 - a) * entry.error_rate_pct;
        entry.cpu_pct = a * sample.performance.cpu_pct + (1.0 - a) * entry.cpu_pct;
        entry.memory_pct = a * sample.performance.memory_pct + (1.0 - a) * entry.memory_pct;
        entry.samples += 1;
        entry.updated_at = now;
    }

    /// Current baseline for a node, established or not
    pub fn baseline(&self, node_id: &str) -> Option<Baseline> {
        self.baselines.read().get(node_id).cloned()
    }

    /// Baseline for a node, only once established
    pub fn established(&self, node_id: &str) -> Option<Baseline> {
        self.baseline(node_id).filter(Baseline::is_established)
    }

    /// Fleet-wide throughput baseline for the improvement ratio
    pub fn fleet_throughput(&self) -> Option<f64> {
        *self.fleet_throughput.read()
    }

    /// Capture the fleet throughput baseline if none exists yet.
    ///
    /// Returns true when this call captured it. A persisted baseline loaded
    /// at startup wins over first-aggregate capture.
    pub fn capture_fleet_throughput(&self, throughput: f64) -> bool {
        let mut slot = self.fleet_throughput.write();
        if slot.is_some() || throughput <= 0.0 {
            return false;
        }
        debug!(throughput, "fleet throughput baseline captured");
        *slot = Some(throughput);
        true
    }

    pub fn set_fleet_throughput(&self, throughput: f64) {
        *self.fleet_throughput.write() = Some(throughput);
    }

    /// Established baselines for persistence
    pub fn export(&self) -> Vec<Baseline> {
        self.baselines
            .read()
            .values()
            .filter(|b| b.is_established())
            .cloned()
            .collect()
    }

    /// Restore baselines from a persisted export
    pub fn import(&self, baselines: Vec<Baseline>, fleet_throughput: Option<f64>) {
        let mut map = self.baselines.write();
        for baseline in baselines {
            map.insert(baseline.node_id.clone(), baseline);
        }
        if let Some(throughput) = fleet_throughput {
            *self.fleet_throughput.write() = Some(throughput);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleet_common::{HealthBlock, NodeStatus, PerformanceBlock, UtilizationBlock};

    fn sample(node: &str, latency: f64) -> Sample {
        Sample {
            node_id: node.to_string(),
            performance: PerformanceBlock {
                latency_ms: latency,
                throughput_ops_s: 100.0,
                error_rate_pct: 1.0,
                cpu_pct: 30.0,
                memory_pct: 40.0,
                disk_pct: 50.0,
                operations_total: 10,
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

    #[test]
    fn baseline_established_after_ten_samples() {
        let learner = BaselineLearner::new(0.1, Clock::new());
        for _ in 0..9 {
            learner.fold(&sample("n-01", 40.0));
        }
        assert!(learner.established("n-01").is_none());
        learner.fold(&sample("n-01", 40.0));
        assert!(learner.established("n-01").is_some());
    }

    #[test]
    fn ema_moves_toward_observation_without_overshooting() {
        let learner = BaselineLearner::new(0.1, Clock::new());
        for _ in 0..10 {
            learner.fold(&sample("n-01", 40.0));
        }
        let before = learner.baseline("n-01").unwrap();
        learner.fold(&sample("n-01", 500.0));
        let after = learner.baseline("n-01").unwrap();

        let step = (after.latency_ms - before.latency_ms).abs();
        let gap = (500.0 - before.latency_ms).abs();
        assert!(step <= gap);
        assert!(after.latency_ms > before.latency_ms);
    }

    #[test]
    fn fleet_baseline_captured_once() {
        let learner = BaselineLearner::new(0.1, Clock::new());
        assert!(!learner.capture_fleet_throughput(0.0));
        assert!(learner.capture_fleet_throughput(1_000.0));
        assert!(!learner.capture_fleet_throughput(2_000.0));
        assert_eq!(learner.fleet_throughput(), Some(1_000.0));
    }

    #[test]
    fn export_only_contains_established_baselines() {
        let learner = BaselineLearner::new(0.1, Clock::new());
        for _ in 0..10 {
            learner.fold(&sample("n-01", 40.0));
        }
        learner.fold(&sample("n-02", 40.0));
        let exported = learner.export();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].node_id, "n-01");
    }

    #[test]
    fn import_restores_baselines_and_fleet_throughput() {
        let learner = BaselineLearner::new(0.1, Clock::new());
        for _ in 0..10 {
            learner.fold(&sample("n-01", 40.0));
        }
        let exported = learner.export();

        let restored = BaselineLearner::new(0.1, Clock::new());
        restored.import(exported, Some(750.0));
        assert!(restored.established("n-01").is_some());
        assert_eq!(restored.fleet_throughput(), Some(750.0));
        // Persisted baseline wins over later capture
        assert!(!restored.capture_fleet_throughput(999.0));
    }
}
