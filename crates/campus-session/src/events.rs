//! Session event bus.
//!
//! Listeners register per [`EventKind`], optionally scoped to one site, and
//! are called synchronously on the triggering caller in registration order.
//! Every delivery is also pushed to a broadcast channel for async consumers.
//!
//! Unique events fire at most once per bus. A listener registered after a
//! unique event fired receives the stored payload right away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use campus_types::{Event, EventKind, SiteId};
use serde::Serialize;
use tokio::sync::broadcast;

/// Listener callback: `(event, site_id)`.
pub type Callback = Arc<dyn Fn(&Event, Option<&SiteId>) + Send + Sync>;

/// An event together with the site it concerns.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Delivery {
    #[serde(flatten)]
    pub event: Event,
    pub site_id: Option<SiteId>,
}

struct Listener {
    id: u64,
    kind: EventKind,
    site_id: Option<SiteId>,
    once: bool,
    callback: Callback,
}

impl Listener {
    fn accepts(&self, kind: EventKind, site_id: Option<&SiteId>) -> bool {
        self.kind == kind
            && match &self.site_id {
                Some(only) => site_id == Some(only),
                None => true,
            }
    }
}

struct Inner {
    listeners: Mutex<Vec<Listener>>,
    unique: Mutex<HashMap<EventKind, Delivery>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<Delivery>,
}

/// Typed publish/subscribe hub for session events.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

/// Handle of a registered listener.
#[must_use = "dropping a Subscription keeps the listener registered; call off() to remove it"]
pub struct Subscription {
    bus: Weak<Inner>,
    id: Option<u64>,
}

impl Subscription {
    /// Unregister the listener. Calling it twice is harmless.
    pub fn off(&self) {
        let (Some(inner), Some(id)) = (self.bus.upgrade(), self.id) else {
            return;
        };
        lock(&inner.listeners).retain(|listener| listener.id != id);
    }
}

impl EventBus {
    /// Create a bus whose broadcast channel buffers `capacity` deliveries.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(Inner {
                listeners: Mutex::new(Vec::new()),
                unique: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                sender,
            }),
        }
    }

    /// Listen to every event of `kind`, or only those of one site.
    pub fn on<F>(&self, kind: EventKind, callback: F, site_id: Option<SiteId>) -> Subscription
    where
        F: Fn(&Event, Option<&SiteId>) + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(callback), site_id, false)
    }

    /// Like [`EventBus::on`], but the listener is removed after one call.
    pub fn once<F>(&self, kind: EventKind, callback: F, site_id: Option<SiteId>) -> Subscription
    where
        F: Fn(&Event, Option<&SiteId>) + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(callback), site_id, true)
    }

    /// Deliver an event to its listeners.
    pub fn trigger(&self, event: Event, site_id: Option<&SiteId>) {
        let kind = event.kind();
        let callbacks: Vec<Callback> = {
            let mut listeners = lock(&self.inner.listeners);
            let matched = listeners
                .iter()
                .filter(|listener| listener.accepts(kind, site_id))
                .map(|listener| Arc::clone(&listener.callback))
                .collect();
            listeners.retain(|listener| !(listener.once && listener.accepts(kind, site_id)));
            matched
        };

        tracing::debug!(event = kind.as_str(), site_id = ?site_id, listeners = callbacks.len(), "Trigger event");
        for callback in &callbacks {
            callback(&event, site_id);
        }

        // No receivers is not an error.
        let _ = self.inner.sender.send(Delivery {
            event,
            site_id: site_id.cloned(),
        });
    }

    /// Deliver an event that can only happen once. Later triggers of the
    /// same kind are ignored.
    pub fn trigger_unique(&self, event: Event, site_id: Option<&SiteId>) {
        let kind = event.kind();
        {
            let mut unique = lock(&self.inner.unique);
            if unique.contains_key(&kind) {
                tracing::debug!(event = kind.as_str(), "Unique event already triggered");
                return;
            }
            unique.insert(
                kind,
                Delivery {
                    event: event.clone(),
                    site_id: site_id.cloned(),
                },
            );
        }
        self.trigger(event, site_id);
    }

    /// Whether a unique event of `kind` already fired.
    pub fn has_triggered_unique(&self, kind: EventKind) -> bool {
        lock(&self.inner.unique).contains_key(&kind)
    }

    /// Receive every delivery asynchronously.
    pub fn subscribe(&self) -> broadcast::Receiver<Delivery> {
        self.inner.sender.subscribe()
    }

    fn register(
        &self,
        kind: EventKind,
        callback: Callback,
        site_id: Option<SiteId>,
        once: bool,
    ) -> Subscription {
        let stored = lock(&self.inner.unique).get(&kind).cloned();
        if let Some(delivery) = stored {
            let matches = site_id
                .as_ref()
                .map(|only| delivery.site_id.as_ref() == Some(only))
                .unwrap_or(true);
            if matches {
                callback(&delivery.event, delivery.site_id.as_ref());
            }
            // The event will not fire again.
            return Subscription {
                bus: Weak::new(),
                id: None,
            };
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.listeners).push(Listener {
            id,
            kind,
            site_id,
            once,
            callback,
        });
        Subscription {
            bus: Arc::downgrade(&self.inner),
            id: Some(id),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter(bus: &EventBus, kind: EventKind, site_id: Option<SiteId>) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let sub = bus.on(
            kind,
            move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            },
            site_id,
        );
        (count, sub)
    }

    #[test]
    fn test_trigger_reaches_matching_kind() {
        let bus = EventBus::default();
        let (logins, _a) = counter(&bus, EventKind::Login, None);
        let (logouts, _b) = counter(&bus, EventKind::Logout, None);

        bus.trigger(Event::Login, Some(&SiteId::new("s1")));
        assert_eq!(logins.load(Ordering::SeqCst), 1);
        assert_eq!(logouts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_site_scoped_listener_ignores_other_sites() {
        let bus = EventBus::default();
        let (count, _sub) = counter(&bus, EventKind::Logout, Some(SiteId::new("s1")));

        bus.trigger(Event::Logout, Some(&SiteId::new("s2")));
        bus.trigger(Event::Logout, None);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        bus.trigger(Event::Logout, Some(&SiteId::new("s1")));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_unregisters() {
        let bus = EventBus::default();
        let (count, sub) = counter(&bus, EventKind::Login, None);
        bus.trigger(Event::Login, None);
        sub.off();
        sub.off();
        bus.trigger(Event::Login, None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_once_fires_once() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let _sub = bus.once(
            EventKind::WsCacheInvalidated,
            move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            },
            None,
        );
        bus.trigger(Event::WsCacheInvalidated, None);
        bus.trigger(Event::WsCacheInvalidated, None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unique_event_replays_to_late_listener() {
        let bus = EventBus::default();
        let (early, _sub) = counter(&bus, EventKind::SessionRestored, None);

        let restored = Event::SessionRestored {
            site_id: Some(SiteId::new("s1")),
        };
        bus.trigger_unique(restored.clone(), None);
        bus.trigger_unique(restored.clone(), None);
        assert_eq!(early.load(Ordering::SeqCst), 1);
        assert!(bus.has_triggered_unique(EventKind::SessionRestored));

        let received = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&received);
        let late = bus.on(
            EventKind::SessionRestored,
            move |event, _| {
                *slot.lock().expect("slot") = Some(event.clone());
            },
            None,
        );
        late.off();
        assert_eq!(*received.lock().expect("slot"), Some(restored));
    }

    #[test]
    fn test_listener_may_trigger_from_callback() {
        let bus = EventBus::default();
        let (logouts, _a) = counter(&bus, EventKind::Logout, None);
        let inner = bus.clone();
        let _b = bus.on(
            EventKind::SessionExpired,
            move |_, site_id| inner.trigger(Event::Logout, site_id),
            None,
        );

        bus.trigger(
            Event::SessionExpired(Default::default()),
            Some(&SiteId::new("s1")),
        );
        assert_eq!(logouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_broadcast_receives_deliveries() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.trigger(Event::Login, Some(&SiteId::new("s1")));

        let delivery = rx.recv().await.expect("delivery");
        assert_eq!(delivery.event, Event::Login);
        assert_eq!(delivery.site_id, Some(SiteId::new("s1")));

        let json = serde_json::to_value(&delivery).expect("serialize");
        assert_eq!(json["event"], "login");
        assert_eq!(json["site_id"], "s1");
    }
}
