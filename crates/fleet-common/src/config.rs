//! Configuration for the fleet control plane

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Telemetry tick period
    pub update_interval_ms: u64,
    /// Sample Store age bound
    pub retention_ms: u64,
    pub thresholds: ThresholdsConfig,
    pub models: ModelsConfig,
    pub policies: PoliciesConfig,
    pub alerts: AlertsConfig,
    pub bus: BusConfig,
    /// Directory for persisted JSON snapshots; persistence is off when unset
    pub data_dir: Option<PathBuf>,
}

/// Warning/critical tier pair for one metric kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdPair {
    pub warning: f64,
    pub critical: f64,
}

/// Alert manager threshold table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    pub latency: ThresholdPair,
    pub cpu: ThresholdPair,
    pub memory: ThresholdPair,
    pub disk: ThresholdPair,
    pub error_rate: ThresholdPair,
    /// Crossed downward: warning above critical
    pub availability: ThresholdPair,
    pub cost: ThresholdPair,
}

/// Analyzer model parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub failure_prediction: FailurePredictionConfig,
    pub anomaly: AnomalyConfig,
    pub degradation: DegradationConfig,
    pub baseline: BaselineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailurePredictionConfig {
    /// Minimum recent samples before risk scoring runs
    pub lookback: usize,
    /// Horizon used for timeframe reporting
    pub horizon_ms: u64,
    /// Strict emission threshold on the weighted risk score
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Strict emission threshold on max relative deviation from baseline
    pub sensitivity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationConfig {
    pub trend_window: usize,
    /// Emission threshold in percent on the accumulated trend score
    pub threshold_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// EMA smoothing factor
    pub alpha: f64,
}

/// Healing policy knobs, keyed by policy name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoliciesConfig {
    pub node_restart: PolicyConfig,
    pub service_restart: PolicyConfig,
    pub resource_scaling: PolicyConfig,
    pub node_isolation: PolicyConfig,
    pub cluster_rebalancing: PolicyConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub cooldown_ms: u64,
    pub failure_threshold: u32,
}

/// Alert lifecycle knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Dedup window for repeated (kind, entity, severity) crossings
    pub dedup_window_ms: u64,
    /// Unacknowledged alerts escalate one tier after this long
    pub escalation_timeout_ms: u64,
}

/// Message bus and external broker bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Redis URL of the external broker; bridge is off when unset
    pub external_url: Option<String>,
    pub reconnect_ms: u64,
    /// Per-subscriber bounded queue depth
    pub buffer_size: usize,
    /// Topics with this prefix are forwarded over the bridge; empty
    /// forwards everything
    pub topic_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            update_interval_ms: 1_000,
            retention_ms: 7 * 24 * 60 * 60 * 1_000,
            thresholds: ThresholdsConfig::default(),
            models: ModelsConfig::default(),
            policies: PoliciesConfig::default(),
            alerts: AlertsConfig::default(),
            bus: BusConfig::default(),
            data_dir: None,
        }
    }
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            latency: ThresholdPair {
                warning: 100.0,
                critical: 200.0,
            },
            cpu: ThresholdPair {
                warning: 80.0,
                critical: 90.0,
            },
            memory: ThresholdPair {
                warning: 80.0,
                critical: 90.0,
            },
            disk: ThresholdPair {
                warning: 85.0,
                critical: 95.0,
            },
            error_rate: ThresholdPair {
                warning: 5.0,
                critical: 10.0,
            },
            availability: ThresholdPair {
                warning: 95.0,
                critical: 90.0,
            },
            cost: ThresholdPair {
                warning: 100.0,
                critical: 500.0,
            },
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            failure_prediction: FailurePredictionConfig::default(),
            anomaly: AnomalyConfig::default(),
            degradation: DegradationConfig::default(),
            baseline: BaselineConfig::default(),
        }
    }
}

impl Default for FailurePredictionConfig {
    fn default() -> Self {
        Self {
            lookback: 30,
            horizon_ms: 30 * 60 * 1_000,
            threshold: 0.7,
        }
    }
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self { sensitivity: 0.5 }
    }
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            trend_window: 300,
            threshold_pct: 15.0,
        }
    }
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self { alpha: 0.1 }
    }
}

impl Default for PoliciesConfig {
    fn default() -> Self {
        Self {
            node_restart: PolicyConfig {
                enabled: true,
                max_retries: 3,
                cooldown_ms: 300_000,
                failure_threshold: 3,
            },
            service_restart: PolicyConfig {
                enabled: true,
                max_retries: 5,
                cooldown_ms: 60_000,
                failure_threshold: 3,
            },
            resource_scaling: PolicyConfig {
                enabled: true,
                max_retries: 3,
                cooldown_ms: 300_000,
                failure_threshold: 3,
            },
            node_isolation: PolicyConfig {
                enabled: true,
                max_retries: 2,
                cooldown_ms: 600_000,
                failure_threshold: 2,
            },
            cluster_rebalancing: PolicyConfig {
                enabled: true,
                max_retries: 2,
                cooldown_ms: 900_000,
                failure_threshold: 2,
            },
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            cooldown_ms: 300_000,
            failure_threshold: 3,
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: 60_000,
            escalation_timeout_ms: 300_000,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            external_url: None,
            reconnect_ms: 1_000,
            buffer_size: 256,
            topic_prefix: String::new(),
        }
    }
}

impl PoliciesConfig {
    /// Look up a policy by its configured name
    pub fn by_name(&self, name: &str) -> Option<&PolicyConfig> {
        match name {
            "node_restart" => Some(&self.node_restart),
            "service_restart" => Some(&self.service_restart),
            "resource_scaling" => Some(&self.resource_scaling),
            "node_isolation" => Some(&self.node_isolation),
            "cluster_rebalancing" => Some(&self.cluster_rebalancing),
            _ => None,
        }
    }
}

impl Config {
    /// Validate the configuration at init; failures here are fatal.
    pub fn validate(&self) -> Result<()> {
        if self.update_interval_ms == 0 {
            return Err(Error::Config("update_interval_ms must be > 0".to_string()));
        }
        if self.retention_ms == 0 {
            return Err(Error::Config("retention_ms must be > 0".to_string()));
        }
        if self.bus.buffer_size == 0 {
            return Err(Error::Config("bus.buffer_size must be > 0".to_string()));
        }
        let alpha = self.models.baseline.alpha;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(Error::Config(format!(
                "models.baseline.alpha = {} outside (0, 1]",
                alpha
            )));
        }
        if self.models.failure_prediction.lookback == 0 {
            return Err(Error::Config(
                "models.failure_prediction.lookback must be > 0".to_string(),
            ));
        }
        if self.models.degradation.trend_window < 2 {
            return Err(Error::Config(
                "models.degradation.trend_window must be >= 2".to_string(),
            ));
        }
        for (name, pair) in [
            ("latency", self.thresholds.latency),
            ("cpu", self.thresholds.cpu),
            ("memory", self.thresholds.memory),
            ("disk", self.thresholds.disk),
            ("error_rate", self.thresholds.error_rate),
            ("cost", self.thresholds.cost),
        ] {
            if pair.warning > pair.critical {
                return Err(Error::Config(format!(
                    "thresholds.{}: warning {} above critical {}",
                    name, pair.warning, pair.critical
                )));
            }
        }
        // Availability crosses downward
        if self.thresholds.availability.warning < self.thresholds.availability.critical {
            return Err(Error::Config(
                "thresholds.availability: warning below critical".to_string(),
            ));
        }
        Ok(())
    }
}
