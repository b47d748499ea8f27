//! Typed bus event payloads

use chrono::{DateTime, Utc};
use fleet_common::{
    Alert, ComponentError, EntityRef, EventId, FleetSnapshot, HealingRequest,
    ImprovementReport, NodeUpdate, Prediction, Workflow,
};
use serde::{Deserialize, Serialize};

/// One message delivered on the bus
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusEvent {
    pub topic: String,
    pub payload: BusPayload,
    pub published_at: DateTime<Utc>,
    /// Set on events fed back in from the external broker; such events are
    /// never re-forwarded over the bridge.
    #[serde(default)]
    pub external: bool,
}

/// Structured payloads; serialized only at the bridge boundary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusPayload {
    NodeUpdate(NodeUpdate),
    FleetUpdate(FleetSnapshot),
    Prediction(Prediction),
    Alert(AlertEvent),
    HealingRequest(HealingRequest),
    Workflow(WorkflowEvent),
    Improvement(ImprovementReport),
    ComponentError(ComponentError),
}

/// Alert lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AlertEvent {
    Fired { alert: Alert },
    Acknowledged { alert_id: EventId, user: String, at: DateTime<Utc> },
    Resolved { alert_id: EventId, at: DateTime<Utc> },
    Escalated { alert: Alert },
}

/// Workflow lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    Started {
        workflow: Workflow,
    },
    /// Any terminal transition; the status lives inside the workflow
    Finished {
        workflow: Workflow,
    },
    /// The cooldown/retry gate refused an action; not an error
    PolicyBlocked {
        entity: EntityRef,
        action: String,
        reason: String,
        at: DateTime<Utc>,
    },
}
