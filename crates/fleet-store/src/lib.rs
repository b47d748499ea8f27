//! Sample storage for the fleet control plane
//!
//! Bounded per-node time-series rings, exponential-moving-average baselines,
//! and the JSON snapshot codec for state persisted across restarts.

pub mod baseline;
pub mod snapshot;
pub mod store;

pub use baseline::BaselineLearner;
pub use snapshot::SnapshotStore;
pub use store::SampleStore;
