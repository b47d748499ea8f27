//! Predictive analysis over fleet telemetry
//!
//! One analyzer, explicit rule methods: weighted risk scoring per node,
//! anomaly detection against learned baselines, trend-based degradation
//! detection, and fleet-level failure analysis. Predictions are published
//! on the bus and retained in a bounded ring.

pub mod analyzer;
pub mod trend;

pub use analyzer::PredictiveAnalyzer;
pub use trend::{relative_change, sample_variance, Trend};
