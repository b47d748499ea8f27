//! Alerting for the fleet control plane
//!
//! Threshold evaluation over telemetry updates, a fire/acknowledge/resolve/
//! escalate lifecycle, and sink collaborators subscribing on the bus at a
//! chosen severity floor.

pub mod manager;
pub mod sinks;

pub use manager::{AlertFilter, AlertManager};
pub use sinks::{AlertSink, ConsoleSink, SinkSubscriber, WebhookSink};
