//! Listener registry for status-change fan-out.
//!
//! Listeners are keyed by an opaque id and removed independently through the
//! [`Subscription`] guard returned by [`Listeners::subscribe`]. Emission runs
//! over a snapshot of the registry with no lock held, so a listener may
//! subscribe, unsubscribe, or trigger further emissions while it runs.

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

/// A boxed status listener.
pub type Listener<T> = Box<dyn Fn(&T) + Send + Sync>;

type SharedListener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, SharedListener<T>)>,
}

/// Registry of listeners for values of type `T`.
pub struct Listeners<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T: 'static> Listeners<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a listener. It stays registered until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let listener: SharedListener<T> = Arc::new(listener);
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push((id, listener));
            id
        };

        let registry: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.lock().entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Deliver `value` to every listener registered at the time of the call.
    pub fn emit(&self, value: &T) {
        self.emit_while(value, || true);
    }

    /// Like [`emit`](Self::emit), but checks `live` before each listener and
    /// stops delivering once it returns `false`.
    ///
    /// A listener may invalidate `value` while it runs (e.g. by stopping the
    /// engine that produced it); later listeners then never see it.
    pub fn emit_while(&self, value: &T, live: impl Fn() -> bool) {
        let snapshot: Vec<SharedListener<T>> = self
            .registry
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            if !live() {
                return;
            }
            listener(value);
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.registry.lock().entries.len()
    }

    /// Check if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.registry.lock().entries.len())
            .finish()
    }
}

/// Handle to one registered listener.
///
/// Dropping the handle removes the listener.
#[must_use = "dropping a Subscription removes its listener"]
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Wrap a disposer that removes one listener.
    pub fn new(dispose: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    /// Remove the listener now.
    pub fn unsubscribe(mut self) {
        self.dispose_now();
    }

    /// Keep the listener registered for the registry's lifetime.
    pub fn detach(mut self) {
        self.dispose = None;
    }

    fn dispose_now(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.dispose.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn counter(listeners: &Listeners<u32>) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let subscription = listeners.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, subscription)
    }

    #[test]
    fn emit_reaches_every_listener() {
        let listeners = Listeners::new();
        let (a, _sub_a) = counter(&listeners);
        let (b, _sub_b) = counter(&listeners);

        listeners.emit(&1);
        listeners.emit(&2);

        assert_eq!(a.load(Ordering::SeqCst), 2);
        assert_eq!(b.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listeners_see_values_in_order() {
        let listeners = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = listeners.subscribe(move |value: &u32| sink.lock().push(*value));

        for value in [3, 1, 2] {
            listeners.emit(&value);
        }

        assert_eq!(*seen.lock(), vec![3, 1, 2]);
    }

    #[test]
    fn unsubscribe_removes_only_that_listener() {
        let listeners = Listeners::new();
        let (a, sub_a) = counter(&listeners);
        let (b, _sub_b) = counter(&listeners);

        sub_a.unsubscribe();
        listeners.emit(&1);

        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn dropping_subscription_removes_listener() {
        let listeners = Listeners::new();
        let (count, subscription) = counter(&listeners);
        drop(subscription);

        listeners.emit(&1);

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(listeners.is_empty());
    }

    #[test]
    fn detached_listener_stays_registered() {
        let listeners = Listeners::new();
        let (count, subscription) = counter(&listeners);
        subscription.detach();

        listeners.emit(&1);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_may_unsubscribe_itself_during_emit() {
        let listeners = Arc::new(Listeners::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(AtomicUsize::new(0));

        let own = Arc::clone(&slot);
        let seen = Arc::clone(&count);
        let subscription = listeners.subscribe(move |_: &u32| {
            seen.fetch_add(1, Ordering::SeqCst);
            own.lock().take();
        });
        *slot.lock() = Some(subscription);

        listeners.emit(&1);
        listeners.emit(&2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(listeners.is_empty());
    }

    #[test]
    fn listener_added_during_emit_misses_current_value() {
        let listeners = Arc::new(Listeners::new());
        let late = Arc::new(AtomicUsize::new(0));
        let held: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));

        let registry = Arc::clone(&listeners);
        let late_count = Arc::clone(&late);
        let keep = Arc::clone(&held);
        let _sub = listeners.subscribe(move |_: &u32| {
            let late_count = Arc::clone(&late_count);
            keep.lock().push(registry.subscribe(move |_| {
                late_count.fetch_add(1, Ordering::SeqCst);
            }));
        });

        listeners.emit(&1);
        assert_eq!(late.load(Ordering::SeqCst), 0);

        listeners.emit(&2);
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emit_while_stops_once_value_goes_stale() {
        let listeners = Listeners::new();
        let stale = Arc::new(AtomicBool::new(false));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let invalidate = Arc::clone(&stale);
        let first = Arc::clone(&seen);
        let _sub_a = listeners.subscribe(move |value: &u32| {
            first.lock().push(("a", *value));
            invalidate.store(true, Ordering::SeqCst);
        });
        let second = Arc::clone(&seen);
        let _sub_b = listeners.subscribe(move |value: &u32| second.lock().push(("b", *value)));

        listeners.emit_while(&7, || !stale.load(Ordering::SeqCst));

        assert_eq!(*seen.lock(), vec![("a", 7)]);
    }

    #[test]
    fn emit_while_checks_before_first_listener() {
        let listeners = Listeners::new();
        let (count, _sub) = counter(&listeners);

        listeners.emit_while(&1, || false);

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn subscription_outliving_registry_is_harmless() {
        let listeners = Listeners::<u32>::new();
        let (_count, subscription) = counter(&listeners);
        drop(listeners);
        drop(subscription);
    }
}
