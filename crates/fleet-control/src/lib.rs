//! Fleet Sentinel control plane
//!
//! The coordinator owns every subsystem by composition, injects the shared
//! handles at construction, and exposes the read-only query surface used by
//! dashboards and tests.

pub mod coordinator;

pub use coordinator::{ControlPlane, ControlStatus, ImprovementMetrics, NodeDetail};
