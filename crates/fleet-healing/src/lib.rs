//! Self-healing orchestration for the fleet control plane
//!
//! Predictions arriving on the bus are matched against a static strategy
//! table, gated by per-(entity, action) cooldown and retry policy, and
//! executed as step-sequenced workflows with wall-clock watchdogs. The
//! physical remediation of each step is performed by an [`Effector`]
//! collaborator outside the core.

pub mod effector;
pub mod orchestrator;
pub mod policy;
pub mod strategy;
pub mod workflow;

pub use effector::{Effector, EffectorContext, NoopEffector, ScriptedEffector, StepScript};
pub use orchestrator::HealingOrchestrator;
pub use policy::CooldownGate;
pub use strategy::{strategy_for, Strategy};
pub use workflow::WorkflowEngine;
