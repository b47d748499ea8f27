//! The coordinator wiring every subsystem together

use chrono::{DateTime, Utc};
use fleet_alerts::{AlertFilter, AlertManager, ConsoleSink, SinkSubscriber};
use fleet_analyzer::PredictiveAnalyzer;
use fleet_bus::{topics, BusBridge, MessageBus, SubscriptionHandle};
use fleet_common::{
    Alert, AlertSeverity, Baseline, Clock, Config, EventId, FleetSnapshot, HealingMetrics,
    HealingRequest, Prediction, Result, Sample, SessionSummary, Workflow,
};
use fleet_healing::{
    CooldownGate, Effector, HealingOrchestrator, NoopEffector, WorkflowEngine,
};
use fleet_store::{snapshot::BaselineSnapshot, BaselineLearner, SampleStore, SnapshotStore};
use fleet_telemetry::{SampleSource, TelemetryEngine};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// In-memory ring capacity per node
const RING_CAPACITY: usize = 1_000;
/// Escalations and other watchdog work run on this cadence
const WATCHDOG_PERIOD: Duration = Duration::from_secs(10);
/// Retention eviction and periodic snapshots run on this cadence
const SLOW_PERIOD: Duration = Duration::from_secs(60);

/// Top-level status for dashboards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlStatus {
    pub running: bool,
    pub started_at: DateTime<Utc>,
    pub uptime_ms: i64,
    pub known_nodes: usize,
    pub samples_ingested: u64,
    pub predictions_emitted: u64,
    pub alerts_fired: u64,
    pub healing: HealingMetrics,
    pub bus_dropped: u64,
}

/// Improvement ratio report for the query surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovementMetrics {
    pub baseline_throughput: Option<f64>,
    pub current_throughput: Option<f64>,
    pub ratio: Option<f64>,
}

/// Latest state for one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDetail {
    pub sample: Sample,
    pub baseline: Option<Baseline>,
}

struct Lifecycle {
    started_at: DateTime<Utc>,
    running: bool,
}

/// Owns every component by composition and drives the lifecycle.
///
/// `init` is the only fallible phase; after `start`, every failure is
/// contained at its task boundary and the plane keeps emitting telemetry.
pub struct ControlPlane {
    config: Arc<Config>,
    clock: Clock,
    bus: MessageBus,
    store: Arc<SampleStore>,
    baselines: Arc<BaselineLearner>,
    telemetry: Arc<TelemetryEngine>,
    analyzer: Arc<PredictiveAnalyzer>,
    orchestrator: Arc<HealingOrchestrator>,
    alerts: Arc<AlertManager>,
    snapshots: Option<SnapshotStore>,
    lifecycle: Mutex<Lifecycle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<SubscriptionHandle>>,
    bridge: Mutex<Option<BusBridge>>,
}

impl ControlPlane {
    /// Build the plane and load persisted state; only configuration errors
    /// abort.
    pub async fn init(
        config: Config,
        sources: Vec<Arc<dyn SampleSource>>,
        effector: Option<Arc<dyn Effector>>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let config = Arc::new(config);
        let clock = Clock::new();
        let bus = MessageBus::new(config.bus.buffer_size, clock.clone());

        let store = Arc::new(SampleStore::new(
            RING_CAPACITY,
            config.retention_ms,
            clock.clone(),
        ));
        let baselines = Arc::new(BaselineLearner::new(
            config.models.baseline.alpha,
            clock.clone(),
        ));
        let telemetry = Arc::new(TelemetryEngine::new(
            config.clone(),
            sources,
            store.clone(),
            baselines.clone(),
            bus.clone(),
            clock.clone(),
        ));
        let analyzer = Arc::new(PredictiveAnalyzer::new(
            config.clone(),
            store.clone(),
            baselines.clone(),
            bus.clone(),
            clock.clone(),
        ));
        let gate = Arc::new(CooldownGate::new(config.policies.clone(), clock.clone()));
        let engine = Arc::new(WorkflowEngine::new(
            effector.unwrap_or_else(|| Arc::new(NoopEffector)),
            gate.clone(),
            bus.clone(),
            clock.clone(),
        ));
        let orchestrator = Arc::new(HealingOrchestrator::new(
            gate,
            engine,
            bus.clone(),
            clock.clone(),
        ));
        let alerts = Arc::new(AlertManager::new(
            config.thresholds.clone(),
            config.alerts.clone(),
            bus.clone(),
            clock.clone(),
        ));

        let snapshots = config
            .data_dir
            .as_ref()
            .map(|dir| SnapshotStore::new(dir.clone()));

        let plane = Arc::new(ControlPlane {
            config,
            clock: clock.clone(),
            bus,
            store,
            baselines,
            telemetry,
            analyzer,
            orchestrator,
            alerts,
            snapshots,
            lifecycle: Mutex::new(Lifecycle {
                started_at: clock.now(),
                running: false,
            }),
            tasks: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            bridge: Mutex::new(None),
        });

        plane.load_state().await?;
        info!("control plane initialized");
        Ok(plane)
    }

    /// Wire subscriptions, start tickers and the optional broker bridge
    pub fn start(self: &Arc<Self>) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.running {
                warn!("control plane already running");
                return;
            }
            lifecycle.running = true;
            lifecycle.started_at = self.clock.now();
        }

        // One queue per subscriber across both telemetry topics, so each
        // sees fleet rollups strictly after the node updates of that tick
        let telemetry_topics = [topics::TELEMETRY_NODE, topics::TELEMETRY_FLEET];
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.push(
            self.bus
                .subscribe_many(&telemetry_topics, self.analyzer.clone()),
        );
        subscriptions.push(
            self.bus
                .subscribe_many(&telemetry_topics, self.alerts.clone()),
        );
        subscriptions.push(self.bus.subscribe_many(
            &[topics::PREDICTIONS, topics::HEALING_REQUESTS],
            self.orchestrator.clone(),
        ));
        subscriptions.push(self.bus.subscribe(
            topics::ALERTS,
            Arc::new(SinkSubscriber::new(
                Box::new(ConsoleSink),
                AlertSeverity::Warning,
            )),
        ));
        drop(subscriptions);

        let mut tasks = self.tasks.lock();
        tasks.push(self.telemetry.clone().spawn());
        tasks.push(self.spawn_watchdog());
        tasks.push(self.spawn_slow_cycle());

        if let Some(url) = &self.config.bus.external_url {
            *self.bridge.lock() = Some(BusBridge::start(
                self.bus.clone(),
                url,
                &self.config.bus.topic_prefix,
                self.config.bus.reconnect_ms,
            ));
        }

        info!("control plane started");
    }

    /// Stop tickers, cancel active workflows, persist state, close the
    /// bridge last
    pub async fn stop(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if !lifecycle.running {
                return;
            }
            lifecycle.running = false;
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.subscriptions.lock().clear();
        self.orchestrator.engine().cancel_all();

        if let Err(err) = self.persist_state().await {
            error!(error = %err, "failed to persist state on shutdown");
        }

        if let Some(bridge) = self.bridge.lock().take() {
            bridge.shutdown();
        }
        info!("control plane stopped");
    }

    // --- Query surface ----------------------------------------------------

    pub fn status(&self) -> ControlStatus {
        let lifecycle = self.lifecycle.lock();
        ControlStatus {
            running: lifecycle.running,
            started_at: lifecycle.started_at,
            uptime_ms: self
                .clock
                .now()
                .signed_duration_since(lifecycle.started_at)
                .num_milliseconds(),
            known_nodes: self.store.node_ids().len(),
            samples_ingested: self.telemetry.samples_ingested(),
            predictions_emitted: self.analyzer.predictions_emitted(),
            alerts_fired: self.alerts.fired_count(),
            healing: self.orchestrator.engine().metrics(),
            bus_dropped: self.bus.dropped_count(),
        }
    }

    /// Current fleet rollup, derived on demand
    pub fn fleet_snapshot(&self) -> Option<FleetSnapshot> {
        self.telemetry.aggregate()
    }

    pub fn node(&self, node_id: &str) -> Option<NodeDetail> {
        let sample = self.store.latest(node_id)?;
        Some(NodeDetail {
            sample,
            baseline: self.baselines.baseline(node_id),
        })
    }

    pub fn recent_alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.alerts.recent_alerts(filter)
    }

    pub fn acknowledge_alert(
        &self,
        id: EventId,
        user: &str,
        note: Option<String>,
    ) -> Result<Alert> {
        self.alerts.acknowledge(id, user, note)
    }

    pub fn resolve_alert(&self, id: EventId) -> Result<Alert> {
        self.alerts.resolve(id)
    }

    pub fn recent_predictions(&self) -> Vec<Prediction> {
        self.analyzer.recent_predictions()
    }

    pub fn workflow_history(&self) -> Vec<Workflow> {
        self.orchestrator.engine().history()
    }

    pub fn active_workflows(&self) -> Vec<Workflow> {
        self.orchestrator.engine().active()
    }

    pub fn improvement_metrics(&self) -> ImprovementMetrics {
        let baseline = self.baselines.fleet_throughput();
        let current = self
            .telemetry
            .aggregate()
            .map(|s| s.total_throughput_ops_s);
        let ratio = match (baseline, current) {
            (Some(baseline), Some(current)) if baseline > 0.0 => Some(current / baseline),
            _ => None,
        };
        ImprovementMetrics {
            baseline_throughput: baseline,
            current_throughput: current,
            ratio,
        }
    }

    /// Route a healing request to peer replicas over the bus
    pub fn dispatch_healing(&self, request: HealingRequest) {
        self.orchestrator.dispatch(request);
    }

    /// Session totals; persisted as `session-summary.json` on shutdown
    pub fn session_summary(&self) -> SessionSummary {
        let lifecycle = self.lifecycle.lock();
        SessionSummary {
            started_at: lifecycle.started_at,
            uptime_ms: self
                .clock
                .now()
                .signed_duration_since(lifecycle.started_at)
                .num_milliseconds(),
            samples_ingested: self.telemetry.samples_ingested(),
            predictions_emitted: self.analyzer.predictions_emitted(),
            workflows_run: self.orchestrator.engine().metrics().total,
            alerts_fired: self.alerts.fired_count(),
            last_improvement_ratio: self.telemetry.last_improvement(),
        }
    }

    /// Direct access for embedding and tests
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn telemetry(&self) -> &Arc<TelemetryEngine> {
        &self.telemetry
    }

    pub fn orchestrator(&self) -> &Arc<HealingOrchestrator> {
        &self.orchestrator
    }

    // --- Persistence ------------------------------------------------------

    async fn load_state(&self) -> Result<()> {
        let Some(snapshots) = &self.snapshots else {
            return Ok(());
        };
        if let Some(rings) = snapshots.load_samples().await? {
            self.store.import(rings)?;
        }
        if let Some(baseline) = snapshots.load_baselines().await? {
            self.baselines
                .import(baseline.baselines, baseline.fleet_throughput);
        }
        if let Some(predictions) = snapshots.load_predictions().await? {
            self.analyzer.import(predictions);
        }
        let history = snapshots.load_workflow_history().await?.unwrap_or_default();
        let metrics = snapshots.load_healing_metrics().await?.unwrap_or_default();
        if !history.is_empty() || metrics.total > 0 {
            self.orchestrator.engine().import(history, metrics);
        }
        Ok(())
    }

    async fn persist_state(&self) -> Result<()> {
        let Some(snapshots) = &self.snapshots else {
            return Ok(());
        };
        snapshots.save_samples(&self.store.export()).await?;
        snapshots
            .save_baselines(&BaselineSnapshot {
                baselines: self.baselines.export(),
                fleet_throughput: self.baselines.fleet_throughput(),
            })
            .await?;
        snapshots.save_predictions(&self.analyzer.export()).await?;
        snapshots
            .save_workflow_history(&self.orchestrator.engine().history())
            .await?;
        snapshots
            .save_healing_metrics(&self.orchestrator.engine().metrics())
            .await?;
        snapshots
            .save_session_summary(&self.session_summary())
            .await?;
        Ok(())
    }

    fn spawn_watchdog(self: &Arc<Self>) -> JoinHandle<()> {
        let plane = self.clone();
        tokio::spawn(async move {
            let mut ticks = fleet_common::ticker(WATCHDOG_PERIOD);
            loop {
                ticks.tick().await;
                plane.alerts.run_escalations();
            }
        })
    }

    fn spawn_slow_cycle(self: &Arc<Self>) -> JoinHandle<()> {
        let plane = self.clone();
        tokio::spawn(async move {
            let mut ticks = fleet_common::ticker(SLOW_PERIOD);
            loop {
                ticks.tick().await;
                plane.store.evict_expired();
                if let Err(err) = plane.persist_state().await {
                    error!(error = %err, "periodic snapshot failed");
                }
            }
        })
    }
}
