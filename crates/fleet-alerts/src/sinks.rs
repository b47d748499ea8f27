//! Alert sink collaborators subscribing at a severity floor

use async_trait::async_trait;
use fleet_bus::{AlertEvent, BusEvent, BusHandler, BusPayload};
use fleet_common::{Alert, AlertSeverity, Error, Result};
use tracing::{debug, error, info, warn};

/// Delivers alerts to an external channel
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, alert: &Alert) -> Result<()>;
}

/// Logs alerts through tracing at a level matching their severity
pub struct ConsoleSink;

#[async_trait]
impl AlertSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    async fn deliver(&self, alert: &Alert) -> Result<()> {
        match alert.severity {
            AlertSeverity::Info => info!("[ALERT] {}: {}", alert.title, alert.message),
            AlertSeverity::Warning => warn!("[ALERT] {}: {}", alert.title, alert.message),
            AlertSeverity::Error | AlertSeverity::Critical => {
                error!("[ALERT] {}: {}", alert.title, alert.message)
            }
        }
        Ok(())
    }
}

/// Posts alerts as JSON to a webhook endpoint
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, alert: &Alert) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .map_err(|e| Error::Broker(format!("webhook request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::Broker(format!(
                "webhook returned status {}",
                response.status()
            )));
        }
        debug!(alert = %alert.id, "alert delivered via webhook");
        Ok(())
    }
}

/// Bus subscriber feeding fired and escalated alerts into one sink.
///
/// Delivery failures are logged and never propagate; a broken sink does not
/// disturb the alert lifecycle.
pub struct SinkSubscriber {
    sink: Box<dyn AlertSink>,
    min_severity: AlertSeverity,
}

impl SinkSubscriber {
    pub fn new(sink: Box<dyn AlertSink>, min_severity: AlertSeverity) -> Self {
        Self { sink, min_severity }
    }
}

#[async_trait]
impl BusHandler for SinkSubscriber {
    async fn handle(&self, event: BusEvent) {
        let alert = match &event.payload {
            BusPayload::Alert(AlertEvent::Fired { alert }) => alert,
            BusPayload::Alert(AlertEvent::Escalated { alert }) => alert,
            _ => return,
        };
        if alert.severity < self.min_severity {
            return;
        }
        if let Err(err) = self.sink.deliver(alert).await {
            warn!(sink = self.sink.name(), error = %err, "alert delivery failed");
        }
    }
}
