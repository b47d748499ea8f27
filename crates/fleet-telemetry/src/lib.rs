//! Telemetry collection for the fleet control plane
//!
//! Drives sampling at the configured base period, writes samples into the
//! store, folds them into baselines, and publishes per-node and fleet-wide
//! updates on the bus.

pub mod engine;
pub mod source;

pub use engine::TelemetryEngine;
pub use source::{SampleSource, SourceProfile, SyntheticSource};
