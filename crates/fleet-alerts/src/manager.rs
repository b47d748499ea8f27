//! Alert lifecycle management and threshold evaluation

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fleet_bus::{topics, AlertEvent, BusEvent, BusHandler, BusPayload, MessageBus};
use fleet_common::{
    Acknowledgment, Alert, AlertKind, AlertSeverity, AlertsConfig, Clock, Error, EventId,
    FleetSnapshot, NodeId, Result, Sample, ThresholdPair, ThresholdsConfig,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Alerts retained in memory
const ALERT_RING: usize = 1_000;

/// Query filter for the alert ring
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub min_severity: Option<AlertSeverity>,
    pub kind: Option<AlertKind>,
    pub unresolved_only: bool,
}

/// Evaluates the metric threshold table and owns the alert lifecycle.
///
/// Fired alerts are deduplicated by (kind, entity, severity) within the
/// configured window, retained in a bounded ring, and published on the bus;
/// unacknowledged alerts escalate one tier after the escalation timeout.
pub struct AlertManager {
    thresholds: ThresholdsConfig,
    config: AlertsConfig,
    alerts: Mutex<VecDeque<Alert>>,
    dedup: Mutex<HashMap<(AlertKind, Option<NodeId>, AlertSeverity), DateTime<Utc>>>,
    escalated_at: Mutex<HashMap<EventId, DateTime<Utc>>>,
    bus: MessageBus,
    clock: Clock,
    fired: AtomicU64,
}

impl AlertManager {
    pub fn new(
        thresholds: ThresholdsConfig,
        config: AlertsConfig,
        bus: MessageBus,
        clock: Clock,
    ) -> Self {
        Self {
            thresholds,
            config,
            alerts: Mutex::new(VecDeque::with_capacity(64)),
            dedup: Mutex::new(HashMap::new()),
            escalated_at: Mutex::new(HashMap::new()),
            bus,
            clock,
            fired: AtomicU64::new(0),
        }
    }

    /// Evaluate the per-node thresholds for one sample
    pub fn evaluate_sample(&self, sample: &Sample) {
        let node = Some(sample.node_id.clone());
        self.check_upward(
            AlertKind::Latency,
            node.clone(),
            sample.performance.latency_ms,
            self.thresholds.latency,
            "ms",
        );
        self.check_upward(
            AlertKind::Cpu,
            node.clone(),
            sample.performance.cpu_pct,
            self.thresholds.cpu,
            "%",
        );
        self.check_upward(
            AlertKind::Memory,
            node.clone(),
            sample.performance.memory_pct,
            self.thresholds.memory,
            "%",
        );
        self.check_upward(
            AlertKind::Disk,
            node.clone(),
            sample.performance.disk_pct,
            self.thresholds.disk,
            "%",
        );
        self.check_upward(
            AlertKind::ErrorRate,
            node,
            sample.performance.error_rate_pct,
            self.thresholds.error_rate,
            "%",
        );
    }

    /// Evaluate the fleet-level thresholds for one rollup
    pub fn evaluate_fleet(&self, snapshot: &FleetSnapshot) {
        // Availability crosses downward
        let pair = self.thresholds.availability;
        let value = snapshot.availability_pct;
        if value < pair.critical {
            self.fire(
                AlertKind::Availability,
                AlertSeverity::Critical,
                None,
                value,
                pair.critical,
                "fleet availability critical",
            );
        } else if value < pair.warning {
            self.fire(
                AlertKind::Availability,
                AlertSeverity::Warning,
                None,
                value,
                pair.warning,
                "fleet availability low",
            );
        }

        self.check_upward(
            AlertKind::Cost,
            None,
            snapshot.hourly_cost,
            self.thresholds.cost,
            "/h",
        );
    }

    /// Append an acknowledgment; the alert stays active
    pub fn acknowledge(&self, id: EventId, user: &str, note: Option<String>) -> Result<Alert> {
        let at = self.clock.now();
        let alert = {
            let mut alerts = self.alerts.lock();
            let alert = alerts
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or_else(|| Error::NotFound(format!("alert {}", id)))?;
            alert.acknowledgments.push(Acknowledgment {
                user: user.to_string(),
                at,
                note,
            });
            alert.clone()
        };
        info!(alert = %id, user, "alert acknowledged");
        self.bus.publish(
            topics::ALERTS,
            BusPayload::Alert(AlertEvent::Acknowledged {
                alert_id: id,
                user: user.to_string(),
                at,
            }),
        );
        Ok(alert)
    }

    /// Resolve an alert; idempotent, a second call has no observable effect
    pub fn resolve(&self, id: EventId) -> Result<Alert> {
        let at = self.clock.now();
        let (alert, newly_resolved) = {
            let mut alerts = self.alerts.lock();
            let alert = alerts
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or_else(|| Error::NotFound(format!("alert {}", id)))?;
            if alert.resolved {
                (alert.clone(), false)
            } else {
                alert.resolved = true;
                alert.resolved_at = Some(at);
                (alert.clone(), true)
            }
        };
        if !newly_resolved {
            return Ok(alert);
        }

        // A later identical crossing should produce a fresh alert
        self.dedup
            .lock()
            .retain(|(kind, entity, _), _| !(*kind == alert.kind && *entity == alert.entity));
        self.escalated_at.lock().remove(&id);

        info!(alert = %id, "alert resolved");
        self.bus.publish(
            topics::ALERTS,
            BusPayload::Alert(AlertEvent::Resolved { alert_id: id, at }),
        );
        Ok(alert)
    }

    /// Raise the alert one severity tier and re-fire it
    pub fn escalate(&self, id: EventId) -> Result<Alert> {
        let alert = {
            let mut alerts = self.alerts.lock();
            let alert = alerts
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or_else(|| Error::NotFound(format!("alert {}", id)))?;
            if alert.resolved {
                return Err(Error::Invariant(format!(
                    "alert {} already resolved; cannot escalate",
                    id
                )));
            }
            alert.severity = alert.severity.escalated();
            alert.clone()
        };
        self.escalated_at.lock().insert(id, self.clock.now());
        warn!(alert = %id, severity = ?alert.severity, "alert escalated");
        self.bus.publish(
            topics::ALERTS,
            BusPayload::Alert(AlertEvent::Escalated {
                alert: alert.clone(),
            }),
        );
        Ok(alert)
    }

    /// Escalate unacknowledged alerts past the timeout; run on the watchdog
    /// cadence
    pub fn run_escalations(&self) -> usize {
        let now = self.clock.now();
        let timeout = Duration::milliseconds(self.config.escalation_timeout_ms as i64);
        let due: Vec<EventId> = {
            let alerts = self.alerts.lock();
            let escalated = self.escalated_at.lock();
            alerts
                .iter()
                .filter(|a| {
                    !a.resolved
                        && a.acknowledgments.is_empty()
                        && a.severity < AlertSeverity::Critical
                })
                .filter(|a| {
                    let base = escalated.get(&a.id).copied().unwrap_or(a.created_at);
                    now.signed_duration_since(base) > timeout
                })
                .map(|a| a.id)
                .collect()
        };
        let count = due.len();
        for id in due {
            if let Err(err) = self.escalate(id) {
                debug!(alert = %id, error = %err, "automatic escalation skipped");
            }
        }
        count
    }

    /// Alerts matching the filter, oldest first
    pub fn recent_alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.alerts
            .lock()
            .iter()
            .filter(|a| {
                filter
                    .min_severity
                    .map(|floor| a.severity >= floor)
                    .unwrap_or(true)
                    && filter.kind.map(|k| a.kind == k).unwrap_or(true)
                    && (!filter.unresolved_only || !a.resolved)
            })
            .cloned()
            .collect()
    }

    pub fn alert(&self, id: EventId) -> Option<Alert> {
        self.alerts.lock().iter().find(|a| a.id == id).cloned()
    }

    /// Alerts fired since startup
    pub fn fired_count(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    fn check_upward(
        &self,
        kind: AlertKind,
        entity: Option<NodeId>,
        value: f64,
        pair: ThresholdPair,
        unit: &str,
    ) {
        if value > pair.critical {
            self.fire(
                kind,
                AlertSeverity::Critical,
                entity,
                value,
                pair.critical,
                &format!("{:?} at {:.1}{} (critical)", kind, value, unit),
            );
        } else if value > pair.warning {
            self.fire(
                kind,
                AlertSeverity::Warning,
                entity,
                value,
                pair.warning,
                &format!("{:?} at {:.1}{} (warning)", kind, value, unit),
            );
        }
    }

    fn fire(
        &self,
        kind: AlertKind,
        severity: AlertSeverity,
        entity: Option<NodeId>,
        value: f64,
        threshold: f64,
        title: &str,
    ) {
        let now = self.clock.now();
        {
            let mut dedup = self.dedup.lock();
            let key = (kind, entity.clone(), severity);
            if let Some(last) = dedup.get(&key) {
                let window = Duration::milliseconds(self.config.dedup_window_ms as i64);
                if now.signed_duration_since(*last) < window {
                    return;
                }
            }
            dedup.insert(key, now);
        }

        let alert = Alert {
            id: Uuid::new_v4(),
            kind,
            severity,
            title: title.to_string(),
            message: match &entity {
                Some(node) => format!("{} on node {}", title, node),
                None => format!("{} fleet-wide", title),
            },
            entity,
            value: Some(value),
            threshold: Some(threshold),
            created_at: now,
            resolved: false,
            resolved_at: None,
            acknowledgments: Vec::new(),
        };

        {
            let mut alerts = self.alerts.lock();
            if alerts.len() >= ALERT_RING {
                alerts.pop_front();
            }
            alerts.push_back(alert.clone());
        }
        self.fired.fetch_add(1, Ordering::Relaxed);
        warn!(alert = %alert.id, ?kind, ?severity, value, "alert fired");
        self.bus
            .publish(topics::ALERTS, BusPayload::Alert(AlertEvent::Fired { alert }));
    }
}

#[async_trait]
impl BusHandler for AlertManager {
    async fn handle(&self, event: BusEvent) {
        match event.payload {
            BusPayload::NodeUpdate(update) if !update.stale => {
                self.evaluate_sample(&update.sample)
            }
            BusPayload::FleetUpdate(snapshot) => self.evaluate_fleet(&snapshot),
            _ => {}
        }
    }
}
