//! In-process publish/subscribe with per-subscriber bounded FIFO delivery

use crate::message::{BusEvent, BusPayload};
use async_trait::async_trait;
use fleet_common::Clock;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Handler invoked in bus-owned execution context, exactly once per message,
/// in publish order per topic.
#[async_trait]
pub trait BusHandler: Send + Sync {
    async fn handle(&self, event: BusEvent);
}

/// Adapter turning an async closure into a [`BusHandler`]
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> BusHandler for FnHandler<F>
where
    F: Fn(BusEvent) -> BoxFuture<'static, ()> + Send + Sync,
{
    async fn handle(&self, event: BusEvent) {
        (self.0)(event).await;
    }
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<BusEvent>,
}

struct BusInner {
    buffer_size: usize,
    topics: RwLock<HashMap<String, Vec<Subscriber>>>,
    /// Tap subscribers observe every topic; used by the broker bridge
    taps: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
    clock: Clock,
}

/// Topic-based publish/subscribe bus.
///
/// Publishing is fire-and-forget: each subscriber owns a bounded queue and a
/// delivery task, so a slow handler only ever delays (and eventually drops)
/// its own messages. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

/// Handle returned by subscribe; unsubscribes explicitly or on drop
pub struct SubscriptionHandle {
    bus: Weak<BusInner>,
    /// Topics this subscriber is registered under; empty means tap
    topics: Vec<String>,
    id: u64,
}

impl MessageBus {
    pub fn new(buffer_size: usize, clock: Clock) -> Self {
        Self {
            inner: Arc::new(BusInner {
                buffer_size,
                topics: RwLock::new(HashMap::new()),
                taps: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                clock,
            }),
        }
    }

    /// Subscribe a handler to one topic.
    ///
    /// Delivery is FIFO per subscriber; a full queue drops messages for this
    /// subscriber only and increments the bus drop counter.
    pub fn subscribe(&self, topic: &str, handler: Arc<dyn BusHandler>) -> SubscriptionHandle {
        self.subscribe_many(&[topic], handler)
    }

    /// Subscribe one handler, with one FIFO queue, to several topics.
    ///
    /// Messages published across the listed topics are delivered to this
    /// subscriber in overall publish order, which is how downstream
    /// components see fleet rollups strictly after the per-node updates of
    /// the same tick.
    pub fn subscribe_many(
        &self,
        topics: &[&str],
        handler: Arc<dyn BusHandler>,
    ) -> SubscriptionHandle {
        let (id, rx) = self.register(topics);
        Self::spawn_delivery(rx, handler);
        SubscriptionHandle {
            bus: Arc::downgrade(&self.inner),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            id,
        }
    }

    /// Subscribe a handler to every topic
    pub fn subscribe_all(&self, handler: Arc<dyn BusHandler>) -> SubscriptionHandle {
        let (id, rx) = self.register(&[]);
        Self::spawn_delivery(rx, handler);
        SubscriptionHandle {
            bus: Arc::downgrade(&self.inner),
            topics: Vec::new(),
            id,
        }
    }

    /// Subscribe as a channel; useful for sinks and tests
    pub fn subscribe_channel(
        &self,
        topic: &str,
    ) -> (SubscriptionHandle, mpsc::Receiver<BusEvent>) {
        let (id, rx) = self.register(&[topic]);
        let handle = SubscriptionHandle {
            bus: Arc::downgrade(&self.inner),
            topics: vec![topic.to_string()],
            id,
        };
        (handle, rx)
    }

    /// Channel tap over every topic; used by the broker bridge
    pub fn tap_channel(&self) -> (SubscriptionHandle, mpsc::Receiver<BusEvent>) {
        let (id, rx) = self.register(&[]);
        let handle = SubscriptionHandle {
            bus: Arc::downgrade(&self.inner),
            topics: Vec::new(),
            id,
        };
        (handle, rx)
    }

    /// Publish a payload on a topic; never blocks the publisher
    pub fn publish(&self, topic: &str, payload: BusPayload) {
        self.dispatch(BusEvent {
            topic: topic.to_string(),
            payload,
            published_at: self.inner.clock.now(),
            external: false,
        });
    }

    /// Feed in an event received from the external broker
    pub fn publish_external(&self, topic: &str, payload: BusPayload) {
        self.dispatch(BusEvent {
            topic: topic.to_string(),
            payload,
            published_at: self.inner.clock.now(),
            external: true,
        });
    }

    /// Messages dropped under backpressure since startup
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Register one bounded queue under the listed topics (empty = tap)
    fn register(&self, topics: &[&str]) -> (u64, mpsc::Receiver<BusEvent>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer_size);
        if topics.is_empty() {
            self.inner.taps.write().push(Subscriber { id, tx });
        } else {
            let mut map = self.inner.topics.write();
            for topic in topics {
                map.entry(topic.to_string())
                    .or_default()
                    .push(Subscriber { id, tx: tx.clone() });
            }
        }
        (id, rx)
    }

    fn spawn_delivery(mut rx: mpsc::Receiver<BusEvent>, handler: Arc<dyn BusHandler>) {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler.handle(event).await;
            }
        });
    }

    fn dispatch(&self, event: BusEvent) {
        let mut dropped = 0u64;
        {
            let topics = self.inner.topics.read();
            if let Some(subscribers) = topics.get(&event.topic) {
                for subscriber in subscribers {
                    dropped += Self::offer(subscriber, &event);
                }
            }
        }
        {
            let taps = self.inner.taps.read();
            for subscriber in taps.iter() {
                dropped += Self::offer(subscriber, &event);
            }
        }
        if dropped > 0 {
            self.inner.dropped.fetch_add(dropped, Ordering::Relaxed);
            warn!(
                topic = %event.topic,
                dropped,
                "bus backpressure: subscriber queue full, messages dropped"
            );
        }
    }

    fn offer(subscriber: &Subscriber, event: &BusEvent) -> u64 {
        match subscriber.tx.try_send(event.clone()) {
            Ok(()) => 0,
            Err(mpsc::error::TrySendError::Full(_)) => 1,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(id = subscriber.id, "subscriber gone; message skipped");
                0
            }
        }
    }

    fn remove(inner: &BusInner, topics: &[String], id: u64) {
        if topics.is_empty() {
            inner.taps.write().retain(|s| s.id != id);
            return;
        }
        let mut map = inner.topics.write();
        for topic in topics {
            if let Some(subscribers) = map.get_mut(topic) {
                subscribers.retain(|s| s.id != id);
                if subscribers.is_empty() {
                    map.remove(topic);
                }
            }
        }
    }
}

impl SubscriptionHandle {
    /// Detach the subscriber; its delivery task drains and exits
    pub fn unsubscribe(self) {
        // Drop runs the removal
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            MessageBus::remove(&inner, &self.topics, self.id);
        }
    }
}
