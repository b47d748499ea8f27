//! Step-sequenced workflow execution with wall-clock watchdogs

use crate::effector::{Effector, EffectorContext};
use crate::policy::CooldownGate;
use fleet_bus::{topics, BusPayload, MessageBus, WorkflowEvent};
use fleet_common::{
    Clock, EntityRef, HealingAction, HealingMetrics, Severity, StepStatus, Workflow,
    WorkflowStatus, WorkflowStep,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Terminal workflows retained in memory
const HISTORY_RING: usize = 1_000;

struct ActiveWorkflow {
    id: Uuid,
    state: Arc<Mutex<Workflow>>,
    handle: JoinHandle<()>,
    policy_name: String,
}

/// Executes workflows, one task per workflow, steps strictly sequential.
///
/// At most one workflow is active per (entity, action); terminal workflows
/// migrate into a bounded history ring and update the healing metrics.
/// Completion is signalled through a `Notify`, never by sleep-polling.
pub struct WorkflowEngine {
    effector: Arc<dyn Effector>,
    gate: Arc<CooldownGate>,
    bus: MessageBus,
    clock: Clock,
    active: Mutex<HashMap<(String, HealingAction), ActiveWorkflow>>,
    history: Mutex<VecDeque<Workflow>>,
    metrics: Mutex<HealingMetrics>,
    completion: Notify,
}

impl WorkflowEngine {
    pub fn new(
        effector: Arc<dyn Effector>,
        gate: Arc<CooldownGate>,
        bus: MessageBus,
        clock: Clock,
    ) -> Self {
        Self {
            effector,
            gate,
            bus,
            clock,
            active: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(64)),
            metrics: Mutex::new(HealingMetrics::default()),
            completion: Notify::new(),
        }
    }

    /// Start a workflow unless one is already active for (entity, action).
    ///
    /// Returns the workflow id, or `None` when deduplicated.
    pub fn start(
        self: &Arc<Self>,
        entity: EntityRef,
        action: HealingAction,
        priority: Severity,
        timeout_ms: u64,
        policy_name: &str,
    ) -> Option<Uuid> {
        let key = (entity.key().to_string(), action);
        let mut active = self.active.lock();
        if active.contains_key(&key) {
            debug!(
                entity = %entity,
                action = action.tag(),
                "workflow already active; request deduplicated"
            );
            return None;
        }

        let id = Uuid::new_v4();
        let workflow = Workflow {
            id,
            entity: entity.clone(),
            action,
            priority,
            status: WorkflowStatus::Pending,
            started_at: self.clock.now(),
            timeout_ms,
            steps: Vec::new(),
            ended_at: None,
            result: None,
            error: None,
        };
        let state = Arc::new(Mutex::new(workflow));

        let handle = tokio::spawn(Self::run(self.clone(), state.clone(), key.clone()));
        active.insert(
            key,
            ActiveWorkflow {
                id,
                state,
                handle,
                policy_name: policy_name.to_string(),
            },
        );
        info!(workflow = %id, entity = %entity, action = action.tag(), "workflow started");
        Some(id)
    }

    /// Snapshot of currently active workflows
    pub fn active(&self) -> Vec<Workflow> {
        self.active
            .lock()
            .values()
            .map(|a| a.state.lock().clone())
            .collect()
    }

    /// Terminal workflows, oldest first
    pub fn history(&self) -> Vec<Workflow> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn metrics(&self) -> HealingMetrics {
        self.metrics.lock().clone()
    }

    /// Look up one workflow by id, active or historical
    pub fn workflow(&self, id: Uuid) -> Option<Workflow> {
        if let Some(found) = self
            .active
            .lock()
            .values()
            .find(|a| a.id == id)
            .map(|a| a.state.lock().clone())
        {
            return Some(found);
        }
        self.history.lock().iter().find(|w| w.id == id).cloned()
    }

    /// Wait until the workflow reaches a terminal state
    pub async fn wait_terminal(&self, id: Uuid) -> Option<Workflow> {
        loop {
            // Register for the wakeup before checking state so a completion
            // between the check and the await is not missed
            let mut notified = std::pin::pin!(self.completion.notified());
            notified.as_mut().enable();
            match self.workflow(id) {
                Some(w) if w.status.is_terminal() => return Some(w),
                Some(_) => notified.await,
                None => return None,
            }
        }
    }

    /// Restore persisted history and metrics at startup
    pub fn import(&self, history: Vec<Workflow>, metrics: HealingMetrics) {
        let mut ring = self.history.lock();
        ring.clear();
        for workflow in history.into_iter().rev().take(HISTORY_RING).rev() {
            ring.push_back(workflow);
        }
        *self.metrics.lock() = metrics;
    }

    /// Cancel every active workflow and flush it to history; shutdown path
    pub fn cancel_all(&self) {
        let drained: Vec<ActiveWorkflow> = {
            let mut active = self.active.lock();
            active.drain().map(|(_, a)| a).collect()
        };
        for entry in drained {
            entry.handle.abort();
            let workflow = {
                let mut state = entry.state.lock();
                if !state.status.is_terminal() {
                    state.status = WorkflowStatus::Cancelled;
                    state.ended_at = Some(self.clock.now());
                    state.error = Some("cancelled on shutdown".to_string());
                }
                state.clone()
            };
            warn!(workflow = %workflow.id, "workflow cancelled on shutdown");
            self.finalize(workflow);
        }
    }

    async fn run(engine: Arc<Self>, state: Arc<Mutex<Workflow>>, key: (String, HealingAction)) {
        let (id, entity, action, timeout_ms) = {
            let mut workflow = state.lock();
            workflow.status = WorkflowStatus::Running;
            (
                workflow.id,
                workflow.entity.clone(),
                workflow.action,
                workflow.timeout_ms,
            )
        };
        engine.bus.publish(
            topics::HEALING_WORKFLOWS,
            BusPayload::Workflow(WorkflowEvent::Started {
                workflow: state.lock().clone(),
            }),
        );

        let context = EffectorContext {
            entity: entity.clone(),
            action,
            workflow_id: id,
        };
        let steps = action.steps();
        let budget = Duration::from_millis(timeout_ms);
        let outcome =
            tokio::time::timeout(budget, Self::run_steps(&engine, &state, steps, &context))
                .await;

        {
            let mut workflow = state.lock();
            workflow.ended_at = Some(engine.clock.now());
            match outcome {
                Ok(Ok(())) => {
                    workflow.status = WorkflowStatus::Completed;
                    workflow.result = Some(format!("{} completed", action.tag()));
                }
                Ok(Err(step_error)) => {
                    workflow.status = WorkflowStatus::Failed;
                    workflow.error = Some(step_error);
                }
                Err(_) => {
                    workflow.status = WorkflowStatus::Timeout;
                    workflow.error = Some(format!("watchdog fired after {}ms", timeout_ms));
                    if let Some(step) = workflow.steps.last_mut() {
                        if step.status == StepStatus::Started {
                            step.status = StepStatus::Failed;
                            step.error = Some("timed out".to_string());
                        }
                    }
                }
            }
        }

        let (workflow, policy_name) = {
            let mut active = engine.active.lock();
            let policy_name = active.remove(&key).map(|a| a.policy_name);
            (state.lock().clone(), policy_name)
        };

        // Removal from the active map is the finalization token; if the
        // entry is already gone, shutdown took ownership of this workflow
        let Some(policy_name) = policy_name else {
            return;
        };

        match workflow.status {
            WorkflowStatus::Completed => {
                engine.gate.record_success(entity.key(), action);
            }
            WorkflowStatus::Failed | WorkflowStatus::Timeout => {
                engine
                    .gate
                    .record_failure(entity.key(), action, &policy_name);
            }
            _ => {}
        }

        info!(
            workflow = %workflow.id,
            status = ?workflow.status,
            steps = workflow.steps.len(),
            "workflow finished"
        );
        engine.finalize(workflow);
    }

    async fn run_steps(
        engine: &Arc<Self>,
        state: &Arc<Mutex<Workflow>>,
        steps: &[&str],
        context: &EffectorContext,
    ) -> Result<(), String> {
        for step_name in steps {
            {
                let mut workflow = state.lock();
                workflow.steps.push(WorkflowStep {
                    name: step_name.to_string(),
                    status: StepStatus::Started,
                    at: engine.clock.now(),
                    error: None,
                });
            }

            match engine.effector.effect(step_name, context).await {
                Ok(()) => {
                    let mut workflow = state.lock();
                    let step = workflow.steps.last_mut().expect("step just pushed");
                    step.status = StepStatus::Completed;
                    step.at = engine.clock.now();
                }
                Err(err) => {
                    let message = err.to_string();
                    let mut workflow = state.lock();
                    let step = workflow.steps.last_mut().expect("step just pushed");
                    step.status = StepStatus::Failed;
                    step.at = engine.clock.now();
                    step.error = Some(message.clone());
                    return Err(format!("step {} failed: {}", step_name, message));
                }
            }
        }
        Ok(())
    }

    /// Move a terminal workflow into history, update metrics, publish and
    /// wake waiters
    fn finalize(&self, workflow: Workflow) {
        let duration_ms = workflow.duration_ms().unwrap_or(0) as f64;
        self.metrics.lock().record(workflow.status, duration_ms);
        {
            let mut history = self.history.lock();
            if history.len() >= HISTORY_RING {
                history.pop_front();
            }
            history.push_back(workflow.clone());
        }
        self.bus.publish(
            topics::HEALING_WORKFLOWS,
            BusPayload::Workflow(WorkflowEvent::Finished { workflow }),
        );
        self.completion.notify_waiters();
    }
}
