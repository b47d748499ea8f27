//! Effector collaborators performing the physical remediation of steps

use async_trait::async_trait;
use fleet_common::{EntityRef, Error, HealingAction, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::info;

/// Context handed to the effector for each step
#[derive(Debug, Clone)]
pub struct EffectorContext {
    pub entity: EntityRef,
    pub action: HealingAction,
    pub workflow_id: uuid::Uuid,
}

/// External collaborator that performs one workflow step.
///
/// The core only dictates step ordering; what a step physically does is
/// entirely the effector's concern.
#[async_trait]
pub trait Effector: Send + Sync {
    async fn effect(&self, step_name: &str, context: &EffectorContext) -> Result<()>;
}

/// Default effector: logs each step and succeeds
pub struct NoopEffector;

#[async_trait]
impl Effector for NoopEffector {
    async fn effect(&self, step_name: &str, context: &EffectorContext) -> Result<()> {
        info!(
            step = step_name,
            entity = %context.entity,
            action = context.action.tag(),
            "effector step executed"
        );
        Ok(())
    }
}

/// Scripted outcome for one step
#[derive(Debug, Clone)]
pub enum StepScript {
    Succeed,
    Fail(String),
    /// Sleep this long before succeeding; drives timeout tests
    Stall(u64),
}

/// Test effector whose per-step outcomes are programmed in advance.
///
/// Steps without a script succeed. Executed step names are recorded in
/// order for assertions.
#[derive(Default)]
pub struct ScriptedEffector {
    scripts: Mutex<HashMap<String, StepScript>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedEffector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, step_name: &str, script: StepScript) {
        self.scripts.lock().insert(step_name.to_string(), script);
    }

    /// Step names executed so far, in order
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    pub fn clear(&self) {
        self.scripts.lock().clear();
        self.executed.lock().clear();
    }
}

#[async_trait]
impl Effector for ScriptedEffector {
    async fn effect(&self, step_name: &str, _context: &EffectorContext) -> Result<()> {
        self.executed.lock().push(step_name.to_string());
        let script = self.scripts.lock().get(step_name).cloned();
        match script {
            None | Some(StepScript::Succeed) => Ok(()),
            Some(StepScript::Fail(reason)) => Err(Error::Effector(reason)),
            Some(StepScript::Stall(ms)) => {
                tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                Ok(())
            }
        }
    }
}
