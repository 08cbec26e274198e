//! Named-event pub/sub used by nodes, registries and the store bridge.
//!
//! Handlers run synchronously on the emitting thread. The listener table is not
//! locked while handlers run, so a handler may subscribe, unsubscribe or emit again.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::{Deserialize, Serialize};

use crate::state::NodeState;

/// Lifecycle events announced by every node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// The node was constructed
    Init,
    /// A new (deduplicated) fetch started
    ReadStart,
    /// A fetch resolved
    ReadSuccess,
    /// A fetch rejected
    ReadError,
    /// The cache of the node was invalidated
    CleanCache,
    /// The state was restored to its initial value
    ResetState,
    /// Emitted after every state mutation, right after the specific event
    Change,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Init => "init",
            EventKind::ReadStart => "readStart",
            EventKind::ReadSuccess => "readSuccess",
            EventKind::ReadError => "readError",
            EventKind::CleanCache => "cleanCache",
            EventKind::ResetState => "resetState",
            EventKind::Change => "change",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload delivered to event handlers
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEvent {
    pub kind: EventKind,
    /// Id of the node that emitted the event (a query child for child events)
    pub node_id: String,
    /// State of the emitting node right after the event
    pub state: NodeState,
}

pub type EventHandler = Arc<dyn Fn(&NodeEvent) + Send + Sync>;

struct Listener {
    id: u64,
    once: bool,
    handler: EventHandler,
}

#[derive(Default)]
struct EmitterInner {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<EventKind, Vec<Listener>>>,
}

/// Dispatcher of [`NodeEvent`]s keyed by [`EventKind`]
#[derive(Clone, Default)]
pub struct EventEmitter {
    inner: Arc<EmitterInner>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every future event of the given kind
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&NodeEvent) + Send + Sync + 'static,
    {
        self.add(kind, false, Arc::new(handler))
    }

    /// Subscribe to the next event of the given kind only
    pub fn once<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&NodeEvent) + Send + Sync + 'static,
    {
        self.add(kind, true, Arc::new(handler))
    }

    fn add(&self, kind: EventKind, once: bool, handler: EventHandler) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let mut listeners = lock(&self.inner.listeners);
        listeners
            .entry(kind)
            .or_default()
            .push(Listener { id, once, handler });
        Subscription {
            emitter: Arc::downgrade(&self.inner),
            kind,
            id,
        }
    }

    /// Deliver an event to the handlers subscribed to its kind
    pub fn emit(&self, event: &NodeEvent) {
        let handlers: Vec<EventHandler> = {
            let mut listeners = lock(&self.inner.listeners);
            let Some(entries) = listeners.get_mut(&event.kind) else {
                return;
            };
            let handlers: Vec<EventHandler> = entries.iter().map(|l| l.handler.clone()).collect();
            entries.retain(|l| !l.once);
            handlers
        };
        for handler in handlers {
            handler(event);
        }
    }

    /// Number of handlers currently subscribed to `kind`
    pub fn listener_count(&self, kind: EventKind) -> usize {
        lock(&self.inner.listeners)
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Drop every subscription
    pub fn clear(&self) {
        lock(&self.inner.listeners).clear();
    }
}

/// Handle returned by `on`/`once`; call [`Subscription::unsubscribe`] to detach.
///
/// Dropping the handle keeps the handler subscribed.
pub struct Subscription {
    emitter: Weak<EmitterInner>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Remove the handler. Returns false when it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(inner) = self.emitter.upgrade() else {
            return false;
        };
        let mut listeners = lock(&inner.listeners);
        match listeners.get_mut(&self.kind) {
            Some(entries) => {
                let before = entries.len();
                entries.retain(|l| l.id != self.id);
                entries.len() != before
            }
            None => false,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish()
    }
}

/// Lock a mutex, recovering the data if a handler panicked while holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
