//! Invalidation event tap.
//!
//! The broadcaster publishes one event per invalidation sweep. A host
//! application subscribes to bridge invalidations across workers (the
//! core itself only reaches sessions local to the triggering worker) or
//! to feed its own observability.
//!
//! Delivery is best-effort over bounded channels: a subscriber that has
//! fallen behind loses events rather than blocking a mutation path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::record::{Heading, PatientId};

/// Identifies one subscription on an [`EventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Emitted after an invalidation sweep over the active sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidationEvent {
    /// Origin record system whose data changed.
    pub host: String,
    /// The affected patient.
    pub patient_id: PatientId,
    /// The invalidated heading.
    pub heading: Heading,
}

struct Subscriber {
    id: SubscriptionId,
    tx: Sender<InvalidationEvent>,
}

type SubscriberList = Arc<RwLock<Vec<Subscriber>>>;

fn unregister(subscribers: &SubscriberList, id: SubscriptionId) {
    if let Ok(mut subscribers) = subscribers.write() {
        subscribers.retain(|subscriber| subscriber.id != id);
    }
}

/// Fan-out bus for [`InvalidationEvent`]s.
#[derive(Default)]
pub struct EventBus {
    subscribers: SubscriberList,
    next_id: AtomicU64,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes with a bounded buffer of `capacity` events.
    #[must_use]
    pub fn subscribe(&self, capacity: usize) -> EventStream {
        let (tx, rx) = bounded(capacity.max(1));
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.push(Subscriber { id, tx });
        }
        EventStream {
            subscription_id: id,
            rx,
            subscribers: Arc::clone(&self.subscribers),
            unregistered: AtomicBool::new(false),
        }
    }

    /// Publishes `event` to every live subscriber. Full subscribers lose
    /// the event; disconnected ones are dropped from the list.
    pub fn publish(&self, event: &InvalidationEvent) {
        let Ok(mut subscribers) = self.subscribers.write() else {
            return;
        };
        subscribers.retain(|subscriber| match subscriber.tx.try_send(event.clone()) {
            Ok(()) | Err(crossbeam_channel::TrySendError::Full(_)) => true,
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
        });
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().map_or(0, |subscribers| subscribers.len())
    }
}

/// A subscription stream of invalidation events.
///
/// Dropping the stream unregisters it best-effort.
pub struct EventStream {
    subscription_id: SubscriptionId,
    rx: Receiver<InvalidationEvent>,
    subscribers: SubscriberList,
    unregistered: AtomicBool,
}

impl EventStream {
    /// The subscription id backing this stream.
    #[must_use]
    pub const fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    /// Receives the next event without blocking.
    #[must_use]
    pub fn try_recv(&self) -> Option<InvalidationEvent> {
        self.rx.try_recv().ok()
    }

    /// Receives the next event, waiting up to `timeout`.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<InvalidationEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Explicit unregistration. Idempotent.
    pub fn unsubscribe(&self) {
        if self.unregistered.swap(true, Ordering::AcqRel) {
            return;
        }
        unregister(&self.subscribers, self.subscription_id);
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(heading: &str) -> InvalidationEvent {
        InvalidationEvent {
            host: "ethercis".to_string(),
            patient_id: PatientId::from(9_999_999_000_i64),
            heading: Heading::from(heading),
        }
    }

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::new();
        let a = bus.subscribe(8);
        let b = bus.subscribe(8);

        bus.publish(&event("procedures"));

        assert_eq!(a.try_recv().unwrap().heading.as_str(), "procedures");
        assert_eq!(b.try_recv().unwrap().heading.as_str(), "procedures");
        assert!(a.try_recv().is_none());
    }

    #[test]
    fn test_full_subscriber_loses_events_without_blocking() {
        let bus = EventBus::new();
        let stream = bus.subscribe(1);

        bus.publish(&event("procedures"));
        bus.publish(&event("vaccinations"));

        // The second event was dropped, not queued.
        assert_eq!(stream.try_recv().unwrap().heading.as_str(), "procedures");
        assert!(stream.try_recv().is_none());
        // The subscription survives.
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_drop_unregisters() {
        let bus = EventBus::new();
        {
            let _stream = bus.subscribe(1);
            assert_eq!(bus.subscriber_count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let stream = bus.subscribe(1);
        stream.unsubscribe();
        stream.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);

        // Publishing after unsubscribe delivers nothing.
        bus.publish(&event("procedures"));
        assert!(stream.try_recv().is_none());
    }
}
