//! Cooldown and retry gating per (entity, action)

use chrono::{DateTime, Duration, Utc};
use fleet_common::{Clock, HealingAction, PoliciesConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Why the gate refused an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRefusal {
    PolicyDisabled,
    CoolingDown { until: DateTime<Utc> },
    RetriesExhausted { failures: u32 },
    UnknownPolicy,
}

impl std::fmt::Display for GateRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateRefusal::PolicyDisabled => write!(f, "policy disabled"),
            GateRefusal::CoolingDown { until } => write!(f, "cooling down until {}", until),
            GateRefusal::RetriesExhausted { failures } => {
                write!(f, "{} consecutive failures, retries exhausted", failures)
            }
            GateRefusal::UnknownPolicy => write!(f, "no policy configured"),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct GateEntry {
    consecutive_failures: u32,
    cooldown_until: Option<DateTime<Utc>>,
}

/// O(1) cooldown/retry table behind one short-lived mutex.
///
/// Failures increment a consecutive counter per (entity, action); when the
/// counter reaches the policy's failure threshold the cooldown is armed.
/// The gate refuses while the cooldown deadline is in the future or while
/// consecutive failures have exhausted the retry budget. An elapsed
/// cooldown clears the counter, so the next request starts fresh; success
/// clears both immediately.
pub struct CooldownGate {
    policies: PoliciesConfig,
    entries: Mutex<HashMap<(String, HealingAction), GateEntry>>,
    clock: Clock,
}

impl CooldownGate {
    pub fn new(policies: PoliciesConfig, clock: Clock) -> Self {
        Self {
            policies,
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Whether the action may execute now for this entity
    pub fn can_execute(
        &self,
        entity: &str,
        action: HealingAction,
        policy_name: &str,
    ) -> Result<(), GateRefusal> {
        let Some(policy) = self.policies.by_name(policy_name) else {
            return Err(GateRefusal::UnknownPolicy);
        };
        if !policy.enabled {
            return Err(GateRefusal::PolicyDisabled);
        }

        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let entry = entries.entry((entity.to_string(), action)).or_default();

        match entry.cooldown_until {
            Some(until) if now < until => {
                if entry.consecutive_failures >= policy.max_retries {
                    return Err(GateRefusal::RetriesExhausted {
                        failures: entry.consecutive_failures,
                    });
                }
                return Err(GateRefusal::CoolingDown { until });
            }
            Some(_) => {
                // Elapsed cooldown grants a fresh retry budget
                entry.cooldown_until = None;
                entry.consecutive_failures = 0;
            }
            None => {}
        }

        if entry.consecutive_failures >= policy.max_retries {
            return Err(GateRefusal::RetriesExhausted {
                failures: entry.consecutive_failures,
            });
        }
        Ok(())
    }

    /// Record a successful workflow; resets the retry counter
    pub fn record_success(&self, entity: &str, action: HealingAction) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&(entity.to_string(), action)) {
            entry.consecutive_failures = 0;
            entry.cooldown_until = None;
        }
    }

    /// Record a failed workflow; arms the cooldown once the failure
    /// threshold is reached
    pub fn record_failure(&self, entity: &str, action: HealingAction, policy_name: &str) {
        let Some(policy) = self.policies.by_name(policy_name).copied() else {
            return;
        };
        let mut entries = self.entries.lock();
        let entry = entries.entry((entity.to_string(), action)).or_default();
        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= policy.failure_threshold {
            entry.cooldown_until =
                Some(self.clock.now() + Duration::milliseconds(policy.cooldown_ms as i64));
        }
        debug!(
            entity,
            action = action.tag(),
            failures = entry.consecutive_failures,
            armed = entry.cooldown_until.is_some(),
            "healing failure recorded"
        );
    }

    /// Consecutive failures currently recorded for the pair
    pub fn failures(&self, entity: &str, action: HealingAction) -> u32 {
        self.entries
            .lock()
            .get(&(entity.to_string(), action))
            .map(|e| e.consecutive_failures)
            .unwrap_or(0)
    }
}
