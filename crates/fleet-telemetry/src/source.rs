//! Sample source adapters

use async_trait::async_trait;
use fleet_common::{
    Clock, CostBlock, HealthBlock, NodeStatus, PerformanceBlock, Result, Sample,
    UtilizationBlock,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A collaborator producing samples for the telemetry engine.
///
/// Production adapters query real infrastructure; test adapters are
/// deterministic generators.
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Stable identifier used in stall reporting
    fn source_id(&self) -> &str;

    /// Collect the samples available this tick
    async fn collect(&self) -> Result<Vec<Sample>>;
}

/// Per-node generation profile for the synthetic source
#[derive(Debug, Clone)]
pub struct SourceProfile {
    pub node_id: String,
    pub latency_ms: f64,
    pub throughput_ops_s: f64,
    pub error_rate_pct: f64,
    pub cpu_pct: f64,
    pub memory_pct: f64,
    pub disk_pct: f64,
    pub status: NodeStatus,
    pub availability_pct: f64,
    pub hourly_cost: Option<f64>,
}

impl SourceProfile {
    /// A nominal healthy node
    pub fn healthy(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            latency_ms: 40.0,
            throughput_ops_s: 120.0,
            error_rate_pct: 1.0,
            cpu_pct: 30.0,
            memory_pct: 40.0,
            disk_pct: 50.0,
            status: NodeStatus::Healthy,
            availability_pct: 99.9,
            hourly_cost: Some(1.2),
        }
    }
}

/// Deterministic sample generator for demos and tests.
///
/// Profiles can be swapped mid-run to drive a node through degradation
/// scenarios; collection itself never fails.
pub struct SyntheticSource {
    id: String,
    profiles: RwLock<Vec<SourceProfile>>,
    ticks: AtomicU64,
    clock: Clock,
}

impl SyntheticSource {
    pub fn new(id: &str, profiles: Vec<SourceProfile>, clock: Clock) -> Self {
        Self {
            id: id.to_string(),
            profiles: RwLock::new(profiles),
            ticks: AtomicU64::new(0),
            clock,
        }
    }

    /// Replace the profile for one node; no-op for unknown nodes
    pub fn set_profile(&self, profile: SourceProfile) {
        let mut profiles = self.profiles.write();
        if let Some(slot) = profiles.iter_mut().find(|p| p.node_id == profile.node_id) {
            *slot = profile;
        }
    }

    /// Stop emitting samples entirely; used to exercise stall handling
    pub fn clear_profiles(&self) {
        self.profiles.write().clear();
    }

    fn jitter(tick: u64, salt: u64) -> f64 {
        // Small deterministic wobble so series are not perfectly flat
        ((tick.wrapping_mul(31).wrapping_add(salt * 17)) % 7) as f64 * 0.1
    }
}

#[async_trait]
impl SampleSource for SyntheticSource {
    fn source_id(&self) -> &str {
        &self.id
    }

    async fn collect(&self) -> Result<Vec<Sample>> {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();
        let profiles = self.profiles.read();
        let samples = profiles
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let jitter = Self::jitter(tick, i as u64);
                let utilization =
                    ((p.cpu_pct + p.memory_pct + p.disk_pct) / 3.0).clamp(0.0, 100.0);
                Sample {
                    node_id: p.node_id.clone(),
                    performance: PerformanceBlock {
                        latency_ms: p.latency_ms + jitter,
                        throughput_ops_s: (p.throughput_ops_s - jitter).max(0.0),
                        error_rate_pct: p.error_rate_pct.clamp(0.0, 100.0),
                        cpu_pct: (p.cpu_pct + jitter).clamp(0.0, 100.0),
                        memory_pct: p.memory_pct.clamp(0.0, 100.0),
                        disk_pct: p.disk_pct.clamp(0.0, 100.0),
                        operations_total: tick * p.throughput_ops_s as u64,
                    },
                    health: HealthBlock {
                        status: p.status,
                        availability_pct: p.availability_pct.clamp(0.0, 100.0),
                        uptime_ms: tick.saturating_mul(1_000),
                    },
                    utilization: UtilizationBlock {
                        overall_pct: utilization,
                        per_resource: HashMap::from([
                            ("cpu".to_string(), p.cpu_pct.clamp(0.0, 100.0)),
                            ("memory".to_string(), p.memory_pct.clamp(0.0, 100.0)),
                            ("disk".to_string(), p.disk_pct.clamp(0.0, 100.0)),
                        ]),
                    },
                    cost: p.hourly_cost.map(|hourly| CostBlock {
                        hourly,
                        daily: hourly * 24.0,
                    }),
                    recorded_at: now,
                }
            })
            .collect();
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_one_sample_per_profile() {
        let source = SyntheticSource::new(
            "synthetic",
            vec![
                SourceProfile::healthy("n-01"),
                SourceProfile::healthy("n-02"),
            ],
            Clock::new(),
        );
        let samples = source.collect().await.unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].node_id, "n-01");
        assert!(samples.iter().all(|s| s.validate().is_ok()));
    }

    #[tokio::test]
    async fn profile_swap_changes_emitted_values() {
        let source = SyntheticSource::new(
            "synthetic",
            vec![SourceProfile::healthy("n-01")],
            Clock::new(),
        );
        let mut degraded = SourceProfile::healthy("n-01");
        degraded.latency_ms = 220.0;
        degraded.status = NodeStatus::Degraded;
        source.set_profile(degraded);

        let samples = source.collect().await.unwrap();
        assert!(samples[0].performance.latency_ms >= 220.0);
        assert_eq!(samples[0].health.status, NodeStatus::Degraded);
    }

    #[tokio::test]
    async fn cleared_profiles_emit_nothing() {
        let source = SyntheticSource::new(
            "synthetic",
            vec![SourceProfile::healthy("n-01")],
            Clock::new(),
        );
        source.clear_profiles();
        assert!(source.collect().await.unwrap().is_empty());
    }
}
