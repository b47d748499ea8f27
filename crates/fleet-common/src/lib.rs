//! Common types and utilities for the Fleet Sentinel control plane
//!
//! This crate provides the shared data model, error type, configuration,
//! and clock used across all components of the control plane.

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{ticker, Clock};
pub use config::*;
pub use error::{Error, Result};
pub use types::*;
