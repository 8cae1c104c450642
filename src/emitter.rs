//! Ordered listener registry keyed by event kind.
//!
//! Every state machine owns one [`EventEmitter`]. Emission is synchronous on the
//! emitting thread. The registry lock is released before any listener runs, so a
//! listener may subscribe, unsubscribe, or emit again; registry changes made
//! during an emission apply from the next emission on.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::broadcast;

type Listener<D> = Arc<dyn Fn(&D) + Send + Sync>;

/// A listener that panicked during emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFailure {
    /// Debug rendering of the event kind being emitted.
    pub event: String,
    /// Panic message.
    pub message: String,
}

struct Entry<E, D> {
    id: u64,
    kind: Option<E>,
    once: bool,
    listener: Listener<D>,
}

struct Registry<E, D> {
    entries: Mutex<Vec<Entry<E, D>>>,
    next_id: AtomicU64,
    failures: broadcast::Sender<ListenerFailure>,
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64) -> bool;
}

impl<E: Send + 'static, D: 'static> Detach for Registry<E, D> {
    fn detach(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }
}

/// Handle returned by subscriptions. Dropping it keeps the listener registered.
#[must_use = "keep the handle to unsubscribe later"]
pub struct Subscription {
    id: u64,
    registry: Weak<dyn Detach>,
}

impl Subscription {
    /// Remove the listener. Returns `false` if it was already gone (a fired
    /// `once` listener, `off_all`, or a dropped emitter).
    pub fn unsubscribe(self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.detach(self.id))
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Generic event emitter.
pub struct EventEmitter<E, D> {
    registry: Arc<Registry<E, D>>,
}

impl<E, D> Default for EventEmitter<E, D>
where
    E: Clone + PartialEq + std::fmt::Debug + Send + 'static,
    D: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E, D> EventEmitter<E, D>
where
    E: Clone + PartialEq + std::fmt::Debug + Send + 'static,
    D: 'static,
{
    pub fn new() -> Self {
        let (failures, _) = broadcast::channel(64);
        Self {
            registry: Arc::new(Registry {
                entries: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                failures,
            }),
        }
    }

    /// Register `listener` for `kind`.
    pub fn on(&self, kind: E, listener: impl Fn(&D) + Send + Sync + 'static) -> Subscription {
        self.register(Some(kind), false, Arc::new(listener))
    }

    /// Register `listener` for the next emission of `kind` only.
    pub fn once(&self, kind: E, listener: impl Fn(&D) + Send + Sync + 'static) -> Subscription {
        self.register(Some(kind), true, Arc::new(listener))
    }

    /// Register `listener` for every kind.
    pub fn on_all(&self, listener: impl Fn(&D) + Send + Sync + 'static) -> Subscription {
        self.register(None, false, Arc::new(listener))
    }

    /// Register `listener` for the next emission of any kind.
    pub fn once_all(&self, listener: impl Fn(&D) + Send + Sync + 'static) -> Subscription {
        self.register(None, true, Arc::new(listener))
    }

    /// Remove every listener.
    pub fn off_all(&self) {
        self.registry.entries.lock().clear();
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.registry.entries.lock().len()
    }

    /// Diagnostic channel reporting listeners that panicked.
    pub fn failures(&self) -> broadcast::Receiver<ListenerFailure> {
        self.registry.failures.subscribe()
    }

    /// Invoke every listener registered for `kind`, in registration order.
    ///
    /// Returns the number of listeners invoked.
    pub fn emit(&self, kind: &E, data: &D) -> usize {
        let listeners: Vec<Listener<D>> = {
            let mut entries = self.registry.entries.lock();
            let matching: Vec<Listener<D>> = entries
                .iter()
                .filter(|entry| entry.kind.as_ref().is_none_or(|k| k == kind))
                .map(|entry| entry.listener.clone())
                .collect();
            entries.retain(|entry| !(entry.once && entry.kind.as_ref().is_none_or(|k| k == kind)));
            matching
        };

        for listener in &listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(data))) {
                let message = panic_message(panic.as_ref());
                tracing::error!(event = ?kind, panic = %message, "event listener panicked");
                let _ = self.registry.failures.send(ListenerFailure {
                    event: format!("{kind:?}"),
                    message,
                });
            }
        }
        listeners.len()
    }

    fn register(&self, kind: Option<E>, once: bool, listener: Listener<D>) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.entries.lock().push(Entry {
            id,
            kind,
            once,
            listener,
        });
        let registry: Arc<dyn Detach> = self.registry.clone();
        Subscription {
            id,
            registry: Arc::downgrade(&registry),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq)]
    enum Kind {
        Up,
        Down,
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&u32) + Send + Sync>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let make = move |tag: &str| {
            let log = log_clone.clone();
            let tag = tag.to_string();
            Box::new(move |n: &u32| log.lock().push(format!("{tag}{n}"))) as Box<dyn Fn(&u32) + Send + Sync>
        };
        (log, make)
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let emitter = EventEmitter::<Kind, u32>::new();
        let (log, make) = recorder();
        let _a = emitter.on(Kind::Up, make("a"));
        let _all = emitter.on_all(make("all"));
        let _b = emitter.on(Kind::Up, make("b"));
        let _down = emitter.on(Kind::Down, make("down"));

        assert_eq!(emitter.emit(&Kind::Up, &1), 3);
        assert_eq!(*log.lock(), vec!["a1", "all1", "b1"]);
    }

    #[test]
    fn test_once_fires_a_single_time() {
        let emitter = EventEmitter::<Kind, u32>::new();
        let (log, make) = recorder();
        let _sub = emitter.once(Kind::Up, make("once"));
        let _any = emitter.once_all(make("any"));

        emitter.emit(&Kind::Down, &1);
        emitter.emit(&Kind::Up, &2);
        emitter.emit(&Kind::Up, &3);
        assert_eq!(*log.lock(), vec!["any1", "once2"]);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let emitter = EventEmitter::<Kind, u32>::new();
        let (log, make) = recorder();
        let sub = emitter.on(Kind::Up, make("x"));
        emitter.emit(&Kind::Up, &1);
        assert!(sub.unsubscribe());
        emitter.emit(&Kind::Up, &2);
        assert_eq!(*log.lock(), vec!["x1"]);
    }

    #[test]
    fn test_subscribe_during_emission_applies_next_time() {
        let emitter = Arc::new(EventEmitter::<Kind, u32>::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let inner_emitter = emitter.clone();
        let inner_hits = hits.clone();
        let _outer = emitter.once(Kind::Up, move |_| {
            let hits = inner_hits.clone();
            let _late = inner_emitter.on(Kind::Up, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        });

        emitter.emit(&Kind::Up, &1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        emitter.emit(&Kind::Up, &2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_during_emission_applies_next_time() {
        let emitter = Arc::new(EventEmitter::<Kind, u32>::new());
        let (log, make) = recorder();
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot = victim.clone();
        let _killer = emitter.on(Kind::Up, move |_| {
            if let Some(sub) = slot.lock().take() {
                sub.unsubscribe();
            }
        });
        *victim.lock() = Some(emitter.on(Kind::Up, make("victim")));

        emitter.emit(&Kind::Up, &1);
        emitter.emit(&Kind::Up, &2);
        assert_eq!(*log.lock(), vec!["victim1"]);
    }

    #[test]
    fn test_reentrant_emit_does_not_deadlock() {
        let emitter = Arc::new(EventEmitter::<Kind, u32>::new());
        let (log, make) = recorder();
        let inner = emitter.clone();
        let _relay = emitter.on(Kind::Up, move |n| {
            inner.emit(&Kind::Down, n);
        });
        let _down = emitter.on(Kind::Down, make("down"));

        emitter.emit(&Kind::Up, &7);
        assert_eq!(*log.lock(), vec!["down7"]);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let emitter = EventEmitter::<Kind, u32>::new();
        let (log, make) = recorder();
        let mut failures = emitter.failures();
        let _bad = emitter.on(Kind::Up, |_| panic!("listener exploded"));
        let _good = emitter.on(Kind::Up, make("good"));

        assert_eq!(emitter.emit(&Kind::Up, &1), 2);
        assert_eq!(*log.lock(), vec!["good1"]);

        let failure = failures.try_recv().unwrap();
        assert_eq!(failure.event, "Up");
        assert_eq!(failure.message, "listener exploded");
    }

    #[test]
    fn test_off_all_and_dropped_emitter() {
        let emitter = EventEmitter::<Kind, u32>::new();
        let (_log, make) = recorder();
        let sub = emitter.on(Kind::Up, make("x"));
        emitter.off_all();
        assert_eq!(emitter.listener_count(), 0);
        assert!(!sub.unsubscribe());

        let sub = emitter.on(Kind::Up, make("y"));
        drop(emitter);
        assert!(!sub.unsubscribe());
    }
}
