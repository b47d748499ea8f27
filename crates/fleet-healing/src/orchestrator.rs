//! Healing orchestrator: strategy selection and request routing

use crate::policy::CooldownGate;
use crate::strategy::{strategy_for, CONFIDENCE_FLOOR};
use crate::workflow::WorkflowEngine;
use async_trait::async_trait;
use fleet_bus::{topics, BusEvent, BusHandler, BusPayload, MessageBus, WorkflowEvent};
use fleet_common::{Clock, HealingRequest, Prediction};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Turns predictions into gated, step-sequenced workflows.
///
/// Local predictions arrive on the predictions topic; peer replicas route
/// work through the healing-requests topic. Inbound requests are treated
/// identically to internally generated ones.
pub struct HealingOrchestrator {
    gate: Arc<CooldownGate>,
    engine: Arc<WorkflowEngine>,
    bus: MessageBus,
    clock: Clock,
}

impl HealingOrchestrator {
    pub fn new(
        gate: Arc<CooldownGate>,
        engine: Arc<WorkflowEngine>,
        bus: MessageBus,
        clock: Clock,
    ) -> Self {
        Self {
            gate,
            engine,
            bus,
            clock,
        }
    }

    /// Apply the confidence floor, strategy table, and cooldown gate; start
    /// a workflow when everything passes.
    pub fn handle_prediction(&self, prediction: &Prediction) -> Option<Uuid> {
        if prediction.confidence <= CONFIDENCE_FLOOR {
            debug!(
                prediction = %prediction.id,
                confidence = prediction.confidence,
                "below confidence floor; ignored"
            );
            return None;
        }
        let strategy = strategy_for(prediction.kind, prediction.severity)?;

        if let Err(refusal) =
            self.gate
                .can_execute(prediction.entity.key(), strategy.action, strategy.policy_name)
        {
            info!(
                entity = %prediction.entity,
                action = strategy.action.tag(),
                reason = %refusal,
                "healing blocked by policy"
            );
            self.bus.publish(
                topics::HEALING_WORKFLOWS,
                BusPayload::Workflow(WorkflowEvent::PolicyBlocked {
                    entity: prediction.entity.clone(),
                    action: strategy.action.tag().to_string(),
                    reason: refusal.to_string(),
                    at: self.clock.now(),
                }),
            );
            return None;
        }

        self.engine.start(
            prediction.entity.clone(),
            strategy.action,
            strategy.priority,
            strategy.timeout_ms,
            strategy.policy_name,
        )
    }

    /// Publish a healing request for a peer replica to pick up
    pub fn dispatch(&self, request: HealingRequest) {
        self.bus.publish(
            topics::HEALING_REQUESTS,
            BusPayload::HealingRequest(request),
        );
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    pub fn gate(&self) -> &Arc<CooldownGate> {
        &self.gate
    }
}

#[async_trait]
impl BusHandler for HealingOrchestrator {
    async fn handle(&self, event: BusEvent) {
        match event.payload {
            // A peer's predictions also cross the bridge; healing them here
            // too would double-remediate, so only local ones count. Peer
            // work arrives explicitly as healing requests.
            BusPayload::Prediction(prediction) if !event.external => {
                let _ = self.handle_prediction(&prediction);
            }
            BusPayload::HealingRequest(request) => {
                let _ = self.handle_prediction(&request.prediction);
            }
            _ => {}
        }
    }
}
