//! Typed publish/subscribe bus used by the signaling client and the mesh.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::warn;

/// An event name with a fixed payload type.
pub trait Event: 'static {
    const NAME: &'static str;
    type Payload: Send + Sync + 'static;
}

/// Returned by [`EventBus::on`] and [`EventBus::once`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId {
    topic: TypeId,
    seq: u64,
}

type Listener<P> = Arc<dyn Fn(&P) + Send + Sync>;

struct Slot<P> {
    seq: u64,
    once: bool,
    listener: Listener<P>,
}

/// Listener list of one event with the payload type erased.
trait ErasedTopic: Send {
    fn remove(&mut self, seq: u64) -> bool;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<P: Send + Sync + 'static> ErasedTopic for Vec<Slot<P>> {
    fn remove(&mut self, seq: u64) -> bool {
        let before = self.len();
        self.retain(|s| s.seq != seq);
        self.len() != before
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Default)]
pub struct EventBus {
    next_seq: AtomicU64,
    topics: Mutex<HashMap<TypeId, Box<dyn ErasedTopic>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener invoked on every emission of `E`.
    pub fn on<E: Event>(
        &self,
        listener: impl Fn(&E::Payload) + Send + Sync + 'static,
    ) -> ListenerId {
        self.register::<E>(false, Arc::new(listener))
    }

    /// Register a listener that is removed right before its first invocation.
    pub fn once<E: Event>(
        &self,
        listener: impl Fn(&E::Payload) + Send + Sync + 'static,
    ) -> ListenerId {
        self.register::<E>(true, Arc::new(listener))
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        self.lock()
            .get_mut(&id.topic)
            .is_some_and(|topic| topic.remove(id.seq))
    }

    /// Invoke every listener of `E` in registration order and return how many ran.
    ///
    /// Listeners run after the bus lock is released, so they may subscribe,
    /// unsubscribe or emit themselves.
    pub fn emit<E: Event>(&self, payload: &E::Payload) -> usize {
        let listeners: Vec<Listener<E::Payload>> = {
            let mut topics = self.lock();
            match topics
                .get_mut(&TypeId::of::<E>())
                .and_then(|t| t.as_any_mut().downcast_mut::<Vec<Slot<E::Payload>>>())
            {
                Some(slots) => {
                    let fired = slots.iter().map(|s| s.listener.clone()).collect();
                    slots.retain(|s| !s.once);
                    fired
                }
                None => Vec::new(),
            }
        };

        for listener in &listeners {
            isolate(E::NAME, || listener(payload));
        }
        listeners.len()
    }

    pub fn listener_count<E: Event>(&self) -> usize {
        self.lock()
            .get(&TypeId::of::<E>())
            .and_then(|t| t.as_any().downcast_ref::<Vec<Slot<E::Payload>>>())
            .map_or(0, Vec::len)
    }

    fn register<E: Event>(&self, once: bool, listener: Listener<E::Payload>) -> ListenerId {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let topic = TypeId::of::<E>();
        let mut topics = self.lock();
        let slots = topics
            .entry(topic)
            .or_insert_with(|| Box::new(Vec::<Slot<E::Payload>>::new()) as Box<dyn ErasedTopic>);
        if let Some(slots) = slots.as_any_mut().downcast_mut::<Vec<Slot<E::Payload>>>() {
            slots.push(Slot {
                seq,
                once,
                listener,
            });
        }
        ListenerId { topic, seq }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TypeId, Box<dyn ErasedTopic>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run a callback, logging instead of unwinding if it panics.
pub(crate) fn isolate(name: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!("Handler for '{}' panicked", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Ping;
    impl Event for Ping {
        const NAME: &'static str = "ping";
        type Payload = u32;
    }

    struct Pong;
    impl Event for Pong {
        const NAME: &'static str = "pong";
        type Payload = String;
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Clone) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |s: &str| sink.lock().unwrap().push(s.to_string()))
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let bus = EventBus::new();
        let (log, record) = recorder();

        let r = record.clone();
        bus.on::<Ping>(move |n| r(format!("first {n}").as_str()));
        let r = record.clone();
        bus.on::<Ping>(move |n| r(format!("second {n}").as_str()));

        assert_eq!(bus.emit::<Ping>(&7), 2);
        assert_eq!(*log.lock().unwrap(), vec!["first 7", "second 7"]);
    }

    #[test]
    fn emit_only_reaches_matching_event() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        bus.on::<Pong>(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.emit::<Ping>(&1), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.emit::<Pong>(&"x".to_string()), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn once_listener_fires_a_single_time() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        bus.once::<Ping>(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit::<Ping>(&1);
        bus.emit::<Ping>(&2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count::<Ping>(), 0);
    }

    #[test]
    fn off_removes_listener() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = bus.on::<Ping>(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(bus.off(id));
        assert!(!bus.off(id));
        bus.emit::<Ping>(&1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn once_listener_removed_from_inside_another_listener() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let target: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let (b, t) = (bus.clone(), target.clone());
        bus.on::<Ping>(move |_| {
            if let Some(id) = *t.lock().unwrap() {
                b.off(id);
            }
        });
        let h = hits.clone();
        let id = bus.once::<Ping>(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        *target.lock().unwrap() = Some(id);

        bus.emit::<Ping>(&1);
        bus.emit::<Ping>(&2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.on::<Ping>(|_| panic!("listener failure"));
        let h = hits.clone();
        bus.on::<Ping>(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.emit::<Ping>(&1), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_may_emit_reentrantly() {
        let bus = Arc::new(EventBus::new());
        let (log, record) = recorder();

        let b = bus.clone();
        bus.on::<Ping>(move |n| {
            b.emit::<Pong>(&format!("pong {n}"));
        });
        bus.on::<Pong>(move |s| record(s.as_str()));

        bus.emit::<Ping>(&3);
        assert_eq!(*log.lock().unwrap(), vec!["pong 3"]);
    }
}
