//! Bridge between the in-process bus and an external Redis broker
//!
//! Outbound: local events whose topic matches the configured prefix are
//! serialized and published to the broker. Inbound: broker messages are fed
//! back in as external events. The broker being down is non-fatal; the bus
//! keeps operating locally while the bridge reconnects with backoff.

use crate::bus::{MessageBus, SubscriptionHandle};
use crate::message::{BusEvent, BusPayload};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Broker channel namespace
const CHANNEL_NS: &str = "fleet:";
/// Backoff ceiling for reconnect attempts
const MAX_BACKOFF_MS: u64 = 30_000;

/// Serialized form of a bus event on the broker
#[derive(Debug, Serialize, Deserialize)]
struct WireEvent {
    /// Identifies the publishing bridge so replicas can drop their own echoes
    origin: Uuid,
    topic: String,
    payload: BusPayload,
    published_at: DateTime<Utc>,
}

/// Running bridge task pair
pub struct BusBridge {
    outbound: JoinHandle<()>,
    inbound: JoinHandle<()>,
    _tap: SubscriptionHandle,
}

impl BusBridge {
    /// Start forwarding between the bus and the broker at `url`.
    ///
    /// Only local events whose topic starts with `topic_prefix` are
    /// forwarded; an empty prefix forwards everything.
    pub fn start(bus: MessageBus, url: &str, topic_prefix: &str, reconnect_ms: u64) -> Self {
        let origin = Uuid::new_v4();
        let (tap, tap_rx) = bus.tap_channel();
        info!(url, origin = %origin, "starting broker bridge");

        let outbound = tokio::spawn(outbound_loop(
            url.to_string(),
            topic_prefix.to_string(),
            reconnect_ms,
            origin,
            tap_rx,
        ));
        let inbound = tokio::spawn(inbound_loop(
            url.to_string(),
            reconnect_ms,
            origin,
            bus,
        ));

        BusBridge {
            outbound,
            inbound,
            _tap: tap,
        }
    }

    /// Stop both directions; the broker connection closes with the tasks
    pub fn shutdown(self) {
        self.outbound.abort();
        self.inbound.abort();
        info!("broker bridge stopped");
    }
}

fn backoff_delay(reconnect_ms: u64, failures: u32) -> Duration {
    let shift = failures.saturating_sub(1).min(16);
    let delay = reconnect_ms.saturating_mul(1u64 << shift);
    Duration::from_millis(delay.min(MAX_BACKOFF_MS))
}

/// Log an error on the first failure of a streak, debug afterwards
fn log_broker_failure(direction: &str, failures: u32, err: &redis::RedisError) {
    if failures == 1 {
        error!(direction, error = %err, "broker connection failed; retrying with backoff");
    } else {
        debug!(direction, failures, error = %err, "broker still unreachable");
    }
}

async fn outbound_loop(
    url: String,
    topic_prefix: String,
    reconnect_ms: u64,
    origin: Uuid,
    mut tap_rx: mpsc::Receiver<BusEvent>,
) {
    let client = match redis::Client::open(url.as_str()) {
        Ok(client) => client,
        Err(err) => {
            error!(error = %err, "invalid broker url; outbound bridge disabled");
            return;
        }
    };

    let mut failures = 0u32;
    'reconnect: loop {
        let mut conn = match client.get_multiplexed_tokio_connection().await {
            Ok(conn) => {
                if failures > 0 {
                    info!("broker reconnected (outbound)");
                }
                failures = 0;
                conn
            }
            Err(err) => {
                failures += 1;
                log_broker_failure("outbound", failures, &err);
                tokio::time::sleep(backoff_delay(reconnect_ms, failures)).await;
                continue 'reconnect;
            }
        };

        while let Some(event) = tap_rx.recv().await {
            if event.external || !event.topic.starts_with(&topic_prefix) {
                continue;
            }
            let wire = WireEvent {
                origin,
                topic: event.topic.clone(),
                payload: event.payload,
                published_at: event.published_at,
            };
            let body = match serde_json::to_string(&wire) {
                Ok(body) => body,
                Err(err) => {
                    warn!(topic = %wire.topic, error = %err, "failed to serialize bus event");
                    continue;
                }
            };
            let channel = format!("{}{}", CHANNEL_NS, wire.topic);
            let publish: Result<i64, redis::RedisError> = redis::cmd("PUBLISH")
                .arg(&channel)
                .arg(&body)
                .query_async(&mut conn)
                .await;
            if let Err(err) = publish {
                failures += 1;
                log_broker_failure("outbound", failures, &err);
                tokio::time::sleep(backoff_delay(reconnect_ms, failures)).await;
                continue 'reconnect;
            }
        }
        // Tap closed: the bus is gone, nothing left to forward
        return;
    }
}

async fn inbound_loop(url: String, reconnect_ms: u64, origin: Uuid, bus: MessageBus) {
    let client = match redis::Client::open(url.as_str()) {
        Ok(client) => client,
        Err(err) => {
            error!(error = %err, "invalid broker url; inbound bridge disabled");
            return;
        }
    };

    let mut failures = 0u32;
    loop {
        let mut pubsub = match client.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(err) => {
                failures += 1;
                log_broker_failure("inbound", failures, &err);
                tokio::time::sleep(backoff_delay(reconnect_ms, failures)).await;
                continue;
            }
        };
        if let Err(err) = pubsub.psubscribe(format!("{}*", CHANNEL_NS)).await {
            failures += 1;
            log_broker_failure("inbound", failures, &err);
            tokio::time::sleep(backoff_delay(reconnect_ms, failures)).await;
            continue;
        }
        if failures > 0 {
            info!("broker reconnected (inbound)");
        }
        failures = 0;

        let mut stream = pubsub.on_message();
        while let Some(message) = stream.next().await {
            let body: String = match message.get_payload() {
                Ok(body) => body,
                Err(err) => {
                    warn!(error = %err, "unreadable broker payload");
                    continue;
                }
            };
            let wire: WireEvent = match serde_json::from_str(&body) {
                Ok(wire) => wire,
                Err(err) => {
                    warn!(error = %err, "malformed broker message dropped");
                    continue;
                }
            };
            if wire.origin == origin {
                // Our own publish echoed back
                continue;
            }
            debug!(topic = %wire.topic, "inbound broker event");
            bus.publish_external(&wire.topic, wire.payload);
        }
        // Stream ended: connection lost, rebuild it
        failures += 1;
        tokio::time::sleep(backoff_delay(reconnect_ms, failures)).await;
    }
}
