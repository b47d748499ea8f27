//! Topic-based publish/subscribe bus for the fleet control plane
//!
//! All inter-component events flow through the [`MessageBus`]. An optional
//! [`BusBridge`] mirrors traffic to an external Redis broker so several
//! control-plane replicas can share state.

pub mod bridge;
pub mod bus;
pub mod message;

pub use bridge::BusBridge;
pub use bus::{FnHandler, BusHandler, MessageBus, SubscriptionHandle};
pub use message::{AlertEvent, BusEvent, BusPayload, WorkflowEvent};

/// Canonical bus topic names
pub mod topics {
    pub const TELEMETRY_NODE: &str = "telemetry.node";
    pub const TELEMETRY_FLEET: &str = "telemetry.fleet";
    pub const PREDICTIONS: &str = "predictions";
    pub const ALERTS: &str = "alerts";
    pub const HEALING_REQUESTS: &str = "healing.requests";
    pub const HEALING_WORKFLOWS: &str = "healing.workflows";
    pub const IMPROVEMENT: &str = "improvement";
    pub const COMPONENT_ERRORS: &str = "component.error";
}
