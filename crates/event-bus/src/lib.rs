//! In-process publish/subscribe fan-out with named channels.
//!
//! Each subscription owns a dedicated task fed by an unbounded channel, the
//! same per-consumer-task shape used for local fan-out elsewhere in this
//! codebase. That keeps delivery order correct per subscription and keeps
//! `publish` from blocking on a slow or wedged handler.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;

/// A subscriber callback. Must be fast: it is invoked on the subscription's
/// dedicated worker task, and a slow handler only delays delivery to that
/// one subscription, never the publisher or other subscribers.
pub type Handler<T> = Box<dyn Fn(T) -> HandlerResult + Send + Sync>;

/// Opaque subscription identifier returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Subscriber<T> {
    id: SubscriptionId,
    tx: mpsc::UnboundedSender<T>,
}

/// In-process publish/subscribe bus. Channels are opaque strings; any name
/// is allowed, but the engine reserves `events` and `alerts`.
pub struct EventBus<T: Clone + Send + 'static> {
    next_id: AtomicU64,
    channels: Mutex<HashMap<String, Vec<Subscriber<T>>>>,
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new() -> Self {
        EventBus {
            next_id: AtomicU64::new(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Register `handler` on `channel`, returning a unique id that can
    /// later be passed to `unsubscribe`.
    pub fn subscribe(&self, channel: impl Into<String>, handler: Handler<T>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, mut rx) = mpsc::unbounded_channel::<T>();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(error) = handler(event) {
                    tracing::warn!(subscription = %id, %error, "event bus handler failed");
                }
            }
        });

        let mut channels = self.channels.lock().expect("event bus lock poisoned");
        channels
            .entry(channel.into())
            .or_default()
            .push(Subscriber { id, tx });
        id
    }

    /// Remove a subscription. No-op if `id` is unknown or already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut channels = self.channels.lock().expect("event bus lock poisoned");
        for subscribers in channels.values_mut() {
            subscribers.retain(|s| s.id != id);
        }
    }

    /// Deliver `event` to every subscriber currently bound to `channel`.
    /// Returns once the event has been enqueued for each subscriber; does
    /// not wait for any handler to finish running.
    pub fn publish(&self, channel: &str, event: T) {
        let channels = self.channels.lock().expect("event bus lock poisoned");
        let Some(subscribers) = channels.get(channel) else {
            return;
        };
        for subscriber in subscribers {
            // An unbounded send only fails if the worker task's receiver
            // was dropped, which only happens once the task has already
            // exited; the subscription is still registered until the next
            // unsubscribe, so this is a benign race, not an error.
            let _ = subscriber.tx.send(event.clone());
        }
    }

    /// Remove every subscription on every channel.
    pub fn clear(&self) {
        let mut channels = self.channels.lock().expect("event bus lock poisoned");
        channels.clear();
    }

    /// Number of live subscriptions on `channel`. Exposed for tests and
    /// health reporting.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let channels = self.channels.lock().expect("event bus lock poisoned");
        channels.get(channel).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    async fn yield_for_delivery() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn subscriber_receives_published_events_in_order() {
        let bus: EventBus<i32> = EventBus::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);
        bus.subscribe(
            "events",
            Box::new(move |value| {
                received_clone.lock().unwrap().push(value);
                Ok(())
            }),
        );

        bus.publish("events", 1);
        bus.publish("events", 2);
        bus.publish("events", 3);
        yield_for_delivery().await;

        assert_eq!(*received.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus: EventBus<i32> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let id = bus.subscribe(
            "events",
            Box::new(move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        bus.publish("events", 1);
        yield_for_delivery().await;
        bus.unsubscribe(id);
        bus.publish("events", 2);
        yield_for_delivery().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_unknown_id_is_a_no_op() {
        let bus: EventBus<i32> = EventBus::new();
        bus.unsubscribe(SubscriptionId(999));
    }

    #[tokio::test]
    async fn failing_handler_does_not_affect_other_subscribers() {
        let bus: EventBus<i32> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        bus.subscribe("events", Box::new(|_| Err("boom".into())));
        bus.subscribe(
            "events",
            Box::new(move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        bus.publish("events", 1);
        yield_for_delivery().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn channels_are_independent() {
        let bus: EventBus<i32> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        bus.subscribe(
            "alerts",
            Box::new(move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        bus.publish("events", 1);
        yield_for_delivery().await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn clear_removes_all_subscriptions() {
        let bus: EventBus<i32> = EventBus::new();
        bus.subscribe("events", Box::new(|_| Ok(())));
        assert_eq!(bus.subscriber_count("events"), 1);
        bus.clear();
        assert_eq!(bus.subscriber_count("events"), 0);
    }
}
