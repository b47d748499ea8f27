//! JSON snapshot files persisted across restarts

use fleet_common::{
    Baseline, HealingMetrics, NodeId, Prediction, Result, Sample, SessionSummary, Workflow,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const METRICS_HISTORY: &str = "metrics-history.json";
const PREDICTIONS: &str = "predictions.json";
const BASELINE: &str = "baseline.json";
const HEALING_HISTORY: &str = "healing-history.json";
const HEALING_METRICS: &str = "healing-metrics.json";
const SESSION_SUMMARY: &str = "session-summary.json";

/// Persisted form of `baseline.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BaselineSnapshot {
    pub baselines: Vec<Baseline>,
    pub fleet_throughput: Option<f64>,
}

/// Reads and writes the control plane's JSON state files under `data_dir`.
///
/// Snapshot save then load reproduces identical sample rings, predictions,
/// baselines, and workflow history.
pub struct SnapshotStore {
    data_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub async fn save_samples(&self, rings: &HashMap<NodeId, Vec<Sample>>) -> Result<()> {
        self.write_json(METRICS_HISTORY, rings).await
    }

    pub async fn load_samples(&self) -> Result<Option<HashMap<NodeId, Vec<Sample>>>> {
        self.read_json(METRICS_HISTORY).await
    }

    pub async fn save_predictions(&self, predictions: &[Prediction]) -> Result<()> {
        self.write_json(PREDICTIONS, &predictions).await
    }

    pub async fn load_predictions(&self) -> Result<Option<Vec<Prediction>>> {
        self.read_json(PREDICTIONS).await
    }

    pub async fn save_baselines(&self, snapshot: &BaselineSnapshot) -> Result<()> {
        self.write_json(BASELINE, snapshot).await
    }

    pub async fn load_baselines(&self) -> Result<Option<BaselineSnapshot>> {
        self.read_json(BASELINE).await
    }

    pub async fn save_workflow_history(&self, workflows: &[Workflow]) -> Result<()> {
        self.write_json(HEALING_HISTORY, &workflows).await
    }

    pub async fn load_workflow_history(&self) -> Result<Option<Vec<Workflow>>> {
        self.read_json(HEALING_HISTORY).await
    }

    pub async fn save_healing_metrics(&self, metrics: &HealingMetrics) -> Result<()> {
        self.write_json(HEALING_METRICS, metrics).await
    }

    pub async fn load_healing_metrics(&self) -> Result<Option<HealingMetrics>> {
        self.read_json(HEALING_METRICS).await
    }

    pub async fn save_session_summary(&self, summary: &SessionSummary) -> Result<()> {
        self.write_json(SESSION_SUMMARY, summary).await
    }

    pub async fn load_session_summary(&self) -> Result<Option<SessionSummary>> {
        self.read_json(SESSION_SUMMARY).await
    }

    async fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        let path = self.data_dir.join(name);
        let body = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&path, body).await?;
        debug!(file = %path.display(), "snapshot written");
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.data_dir.join(name);
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let value = serde_json::from_slice(&body)?;
        info!(file = %path.display(), "snapshot loaded");
        Ok(Some(value))
    }
}
