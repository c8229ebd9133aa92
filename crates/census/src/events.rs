//! Typed notification fan-out.

use census_types::{CensusEvent, EventKind};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, error};

type Listener = Arc<dyn Fn(&CensusEvent) + Send + Sync>;

/// Opaque handle for unsubscribing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// Kind-keyed notification registry.
///
/// Delivery is synchronous on the publishing thread by default;
/// [`EventBus::publish_async`] hands the whole notification to the worker
/// runtime so slow subscribers cannot stall the publisher. Within one
/// notification instance subscribers always run in subscription order; no
/// ordering holds across notification instances delivered asynchronously.
pub struct EventBus {
    listeners: Mutex<BTreeMap<EventKind, Vec<(SubscriptionId, Listener)>>>,
    next_subscription: AtomicU64,
    active: AtomicBool,
    dispatcher: Mutex<Option<tokio::runtime::Handle>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(BTreeMap::new()),
            next_subscription: AtomicU64::new(1),
            active: AtomicBool::new(true),
            dispatcher: Mutex::new(None),
        }
    }

    /// Route `publish_async` onto this runtime. Without one, asynchronous
    /// publishes degrade to synchronous delivery.
    pub(crate) fn set_dispatcher(&self, handle: tokio::runtime::Handle) {
        *self.dispatcher.lock() = Some(handle);
    }

    pub fn subscribe(
        &self,
        kind: EventKind,
        listener: impl Fn(&CensusEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        debug!(?kind, "subscribed listener");
        id
    }

    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) {
        if let Some(listeners) = self.listeners.lock().get_mut(&kind) {
            listeners.retain(|(subscription, _)| *subscription != id);
        }
    }

    /// Deliver synchronously on the calling thread. A panicking subscriber
    /// is isolated and logged; the remaining subscribers still run.
    pub fn publish(&self, event: CensusEvent) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        let listeners: Vec<Listener> = {
            let map = self.listeners.lock();
            match map.get(&event.kind()) {
                Some(list) if !list.is_empty() => {
                    list.iter().map(|(_, listener)| listener.clone()).collect()
                }
                _ => return,
            }
        };
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                error!(
                    kind = ?event.kind(),
                    "event subscriber panicked; continuing with remaining subscribers"
                );
            }
        }
    }

    /// Deliver on the worker runtime when one is attached, preserving
    /// per-subscriber order for this notification instance.
    pub fn publish_async(self: &Arc<Self>, event: CensusEvent) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        let handle = self.dispatcher.lock().clone();
        match handle {
            Some(handle) => {
                let bus = Arc::clone(self);
                handle.spawn(async move { bus.publish(event) });
            }
            None => self.publish(event),
        }
    }

    /// Stop all delivery. Publishes after shutdown are dropped.
    pub fn shutdown(&self) {
        self.active.store(false, Ordering::SeqCst);
        *self.dispatcher.lock() = None;
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
