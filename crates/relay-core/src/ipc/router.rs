//! Subscription registry and event fan-out.
//!
//! Listeners are registered under a [`SubscriptionKey`] of
//! (topic, source filter, event type). A source filter whose uuid is `*`
//! matches every publisher. Dispatch invokes matching listeners exactly once
//! each, in registration order, on the caller's task.

use super::protocol::{Event, Identity};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error};

/// Callback invoked for every matching event.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle identifying one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// What a listener is registered for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub topic: String,
    pub source: Identity,
    pub event_type: String,
}

impl SubscriptionKey {
    pub fn new(topic: impl Into<String>, source: Identity, event_type: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            source,
            event_type: event_type.into(),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.topic == event.topic
            && self.event_type == event.event_type
            && self.source.matches(&event.source)
    }
}

struct Registration {
    id: ListenerId,
    key: SubscriptionKey,
    listener: Listener,
}

/// Single-owner table of subscriptions.
pub struct EventRouter {
    registrations: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            registrations: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn registrations(&self) -> MutexGuard<'_, Vec<Registration>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `listener` under `key`. Multiple listeners per key are fine.
    pub fn add(&self, key: SubscriptionKey, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(
            "Listener {:?} added for {}/{} from {}",
            id, key.topic, key.event_type, key.source
        );
        self.registrations().push(Registration { id, key, listener });
        id
    }

    /// Remove one listener. Returns false if it was not registered under `key`.
    pub fn remove(&self, key: &SubscriptionKey, id: ListenerId) -> bool {
        let mut registrations = self.registrations();
        match registrations
            .iter()
            .position(|r| r.id == id && &r.key == key)
        {
            Some(index) => {
                registrations.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove every listener registered under `key`, returning how many.
    pub fn remove_all(&self, key: &SubscriptionKey) -> usize {
        let mut registrations = self.registrations();
        let before = registrations.len();
        registrations.retain(|r| &r.key != key);
        before - registrations.len()
    }

    pub fn listener_count(&self, key: &SubscriptionKey) -> usize {
        self.registrations()
            .iter()
            .filter(|r| &r.key == key)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations().is_empty()
    }

    /// Deliver `event` to every matching listener, returning how many ran.
    ///
    /// The registry lock is released before listeners run, so a listener may
    /// add or remove registrations. A panicking listener is logged and does
    /// not prevent the remaining listeners from running.
    pub fn dispatch(&self, event: &Event) -> usize {
        let matching: Vec<Listener> = self
            .registrations()
            .iter()
            .filter(|r| r.key.matches(event))
            .map(|r| Arc::clone(&r.listener))
            .collect();

        for listener in &matching {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(
                    "Listener panicked handling {}/{} from {}",
                    event.topic, event.event_type, event.source
                );
            }
        }

        matching.len()
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(topic: &str, source: &str) -> Event {
        Event {
            topic: topic.to_string(),
            event_type: "message".to_string(),
            source: Identity::new(source),
            payload: json!("hello"),
        }
    }

    fn recorder() -> (Listener, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Listener = Arc::new(move |e: &Event| {
            sink.lock().unwrap().push(e.source.uuid.clone());
        });
        (listener, seen)
    }

    #[test]
    fn test_wildcard_matches_every_source() {
        let router = EventRouter::new();
        let (listener, seen) = recorder();
        router.add(SubscriptionKey::new("news", Identity::any(), "message"), listener);

        router.dispatch(&event("news", "app-1"));
        router.dispatch(&event("news", "app-2"));
        router.dispatch(&event("sports", "app-1"));

        assert_eq!(*seen.lock().unwrap(), vec!["app-1", "app-2"]);
    }

    #[test]
    fn test_concrete_identity_filters_sources() {
        let router = EventRouter::new();
        let (listener, seen) = recorder();
        router.add(
            SubscriptionKey::new("news", Identity::new("app-2"), "message"),
            listener,
        );

        router.dispatch(&event("news", "app-1"));
        router.dispatch(&event("news", "app-2"));

        assert_eq!(*seen.lock().unwrap(), vec!["app-2"]);
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let router = EventRouter::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            router.add(
                SubscriptionKey::new("news", Identity::any(), "message"),
                Arc::new(move |_: &Event| order.lock().unwrap().push(label)),
            );
        }

        assert_eq!(router.dispatch(&event("news", "app-1")), 3);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_remove_is_per_listener() {
        let router = EventRouter::new();
        let key = SubscriptionKey::new("news", Identity::any(), "message");
        let (a, seen_a) = recorder();
        let (b, seen_b) = recorder();
        let id_a = router.add(key.clone(), a);
        router.add(key.clone(), b);

        assert!(router.remove(&key, id_a));
        assert!(!router.remove(&key, id_a));
        assert_eq!(router.listener_count(&key), 1);

        router.dispatch(&event("news", "app-1"));
        assert!(seen_a.lock().unwrap().is_empty());
        assert_eq!(seen_b.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_requires_matching_key() {
        let router = EventRouter::new();
        let (listener, _) = recorder();
        let id = router.add(
            SubscriptionKey::new("news", Identity::any(), "message"),
            listener,
        );
        let other = SubscriptionKey::new("sports", Identity::any(), "message");
        assert!(!router.remove(&other, id));
    }

    #[test]
    fn test_remove_all() {
        let router = EventRouter::new();
        let key = SubscriptionKey::new("news", Identity::any(), "message");
        let other = SubscriptionKey::new("news", Identity::new("app-1"), "message");
        for _ in 0..3 {
            let (listener, _) = recorder();
            router.add(key.clone(), listener);
        }
        let (listener, _) = recorder();
        router.add(other.clone(), listener);

        assert_eq!(router.remove_all(&key), 3);
        assert_eq!(router.listener_count(&key), 0);
        assert_eq!(router.listener_count(&other), 1);
    }

    #[test]
    fn test_listener_may_unsubscribe_itself() {
        let router = Arc::new(EventRouter::new());
        let key = SubscriptionKey::new("news", Identity::any(), "message");
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let listener: Listener = {
            let router = Arc::clone(&router);
            let key = key.clone();
            let slot = Arc::clone(&slot);
            Arc::new(move |_: &Event| {
                if let Some(id) = *slot.lock().unwrap() {
                    router.remove(&key, id);
                }
            })
        };
        let id = router.add(key, listener);
        *slot.lock().unwrap() = Some(id);

        assert_eq!(router.dispatch(&event("news", "app-1")), 1);
        assert!(router.is_empty());
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let router = EventRouter::new();
        let key = SubscriptionKey::new("news", Identity::any(), "message");
        router.add(key.clone(), Arc::new(|_: &Event| panic!("listener bug")));
        let (listener, seen) = recorder();
        router.add(key, listener);

        assert_eq!(router.dispatch(&event("news", "app-1")), 2);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
