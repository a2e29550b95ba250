//! Observer registration for host notifications.
//!
//! Host facilities (build system, debugger, command router) publish their
//! notifications through an [`EventHub`]. Subscribing returns a
//! [`Subscription`] guard; dropping the guard or calling
//! [`Subscription::unsubscribe`] removes the handler, so every exit path of
//! the subscriber releases its registration.
//!
//! Handlers are invoked without the hub lock held. A handler may therefore
//! drop its own subscription, or dispose the object that owns it, while the
//! event is being delivered. A handler removed mid-delivery is not called.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

struct HubState<T> {
    next_id: u64,
    handlers: Vec<(u64, Handler<T>)>,
}

impl<T> HubState<T> {
    fn contains(&self, id: u64) -> bool {
        self.handlers.iter().any(|(h, _)| *h == id)
    }
}

fn lock<T>(state: &Mutex<HubState<T>>) -> MutexGuard<'_, HubState<T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A multi-subscriber notification source.
///
/// Cloning a hub yields another handle to the same subscriber list.
pub struct EventHub<T> {
    state: Arc<Mutex<HubState<T>>>,
}

impl<T> Clone for EventHub<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: 'static> Default for EventHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> std::fmt::Debug for EventHub<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<T: 'static> EventHub<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                next_id: 1,
                handlers: Vec::new(),
            })),
        }
    }

    /// Register a handler. It stays registered until the returned guard is
    /// dropped or unsubscribed.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut state = lock(&self.state);
            let id = state.next_id;
            state.next_id += 1;
            state.handlers.push((id, Arc::new(handler)));
            id
        };

        let weak: Weak<Mutex<HubState<T>>> = Arc::downgrade(&self.state);
        Subscription {
            release: Some(Box::new(move || {
                if let Some(state) = weak.upgrade() {
                    lock(&state).handlers.retain(|(h, _)| *h != id);
                }
            })),
        }
    }

    /// Deliver an event to every current subscriber.
    ///
    /// Returns the number of handlers invoked.
    pub fn emit(&self, event: &T) -> usize {
        let snapshot: Vec<(u64, Handler<T>)> = lock(&self.state)
            .handlers
            .iter()
            .map(|(id, h)| (*id, Arc::clone(h)))
            .collect();

        let mut delivered = 0;
        for (id, handler) in snapshot {
            if !lock(&self.state).contains(id) {
                continue;
            }
            handler(event);
            delivered += 1;
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.state).handlers.len()
    }
}

/// Registration guard returned by [`EventHub::subscribe`].
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the handler now. Equivalent to dropping the guard.
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_reaches_subscribers() {
        let hub: EventHub<u32> = EventHub::new();
        let total = Arc::new(AtomicUsize::new(0));

        let t = total.clone();
        let _sub = hub.subscribe(move |v| {
            t.fetch_add(*v as usize, Ordering::SeqCst);
        });

        assert_eq!(hub.emit(&3), 1);
        assert_eq!(hub.emit(&4), 1);
        assert_eq!(total.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let hub: EventHub<()> = EventHub::new();
        let sub = hub.subscribe(|_| {});
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.emit(&()), 0);
    }

    #[test]
    fn test_handler_can_unsubscribe_itself() {
        let hub: EventHub<()> = EventHub::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let c = calls.clone();
        let s = slot.clone();
        let sub = hub.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            s.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(sub);

        hub.emit(&());
        hub.emit(&());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_handler_removed_mid_delivery_is_skipped() {
        let hub: EventHub<()> = EventHub::new();
        let second_calls = Arc::new(AtomicUsize::new(0));
        let second: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let s = second.clone();
        let _first = hub.subscribe(move |_| {
            s.lock().unwrap().take();
        });
        let c = second_calls.clone();
        *second.lock().unwrap() = Some(hub.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(hub.emit(&()), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscription_outlives_hub() {
        let hub: EventHub<()> = EventHub::new();
        let sub = hub.subscribe(|_| {});
        drop(hub);
        sub.unsubscribe();
    }
}
