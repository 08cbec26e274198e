//! # Store bridge
//!
//! Pure, reducer-shaped projection of node states into an external store. The
//! aggregate is keyed by node id; [`reducer`] maps `(previous, action)` to the next
//! aggregate without mutating its input, and [`migrate_namespace`] moves an
//! aggregate from one namespace key of the external store to another.
//!
//! [`StoreBridge`] wires a context's event bus to the reducer and keeps the
//! resulting aggregate under a namespace.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    context::ProviderContext,
    errors::ProviderError,
    events::{EventKind, NodeEvent, Subscription, lock},
    state::NodeState,
};

/// Node states keyed by node id
pub type AggregateState = BTreeMap<String, NodeState>;

/// Aggregates keyed by namespace
pub type NamespacedState = BTreeMap<String, AggregateState>;

/// Namespace used when none is given
pub const DEFAULT_NAMESPACE: &str = "dataProviders";

/// Actions understood by [`reducer`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StoreAction {
    Init { id: String, state: NodeState },
    ReadStart { id: String },
    ReadSuccess { id: String, data: Value },
    ReadError { id: String, error: ProviderError },
    ResetState { id: String, state: NodeState },
    /// Forget every node
    Clear,
}

impl StoreAction {
    /// Action mirroring a node event, `None` for events that do not change state
    pub fn from_event(event: &NodeEvent) -> Option<StoreAction> {
        let id = event.node_id.clone();
        match event.kind {
            EventKind::Init => Some(StoreAction::Init {
                id,
                state: event.state.clone(),
            }),
            EventKind::ReadStart => Some(StoreAction::ReadStart { id }),
            EventKind::ReadSuccess => Some(StoreAction::ReadSuccess {
                id,
                data: event.state.data.clone().unwrap_or(Value::Null),
            }),
            EventKind::ReadError => event
                .state
                .error
                .clone()
                .map(|error| StoreAction::ReadError { id, error }),
            EventKind::ResetState => Some(StoreAction::ResetState {
                id,
                state: event.state.clone(),
            }),
            EventKind::CleanCache | EventKind::Change => None,
        }
    }
}

/// Compute the aggregate that follows `action`
pub fn reducer(previous: &AggregateState, action: &StoreAction) -> AggregateState {
    let mut next = previous.clone();
    match action {
        StoreAction::Init { id, state } => {
            next.entry(id.clone()).or_insert_with(|| state.clone());
        }
        StoreAction::ReadStart { id } => next.entry(id.clone()).or_default().start_loading(),
        StoreAction::ReadSuccess { id, data } => {
            next.entry(id.clone()).or_default().succeed(data.clone())
        }
        StoreAction::ReadError { id, error } => {
            next.entry(id.clone()).or_default().fail(error.clone())
        }
        StoreAction::ResetState { id, state } => {
            next.insert(id.clone(), state.clone());
        }
        StoreAction::Clear => next.clear(),
    }
    next
}

/// Move the aggregate stored under `from` to `to`
///
/// Entries already present under `to` are kept unless `from` has the same id.
/// Returns false when there was nothing under `from`.
pub fn migrate_namespace(root: &mut NamespacedState, from: &str, to: &str) -> bool {
    if from == to {
        return root.contains_key(from);
    }
    let Some(moved) = root.remove(from) else {
        return false;
    };
    root.entry(to.to_string()).or_default().extend(moved);
    crate::debug_log!("🚚 [STORE] Migrated node states from '{}' to '{}'", from, to);
    true
}

/// Mirrors every node state of a context into a namespaced aggregate
pub struct StoreBridge {
    namespace: Arc<Mutex<String>>,
    root: Arc<Mutex<NamespacedState>>,
    subscriptions: Vec<Subscription>,
}

impl StoreBridge {
    /// Connect to `context` under [`DEFAULT_NAMESPACE`]
    pub fn connect(context: &ProviderContext) -> Self {
        Self::connect_with_namespace(context, DEFAULT_NAMESPACE)
    }

    pub fn connect_with_namespace(context: &ProviderContext, namespace: &str) -> Self {
        let namespace = Arc::new(Mutex::new(namespace.to_string()));
        let root: Arc<Mutex<NamespacedState>> = Arc::default();

        let subscriptions = [
            EventKind::Init,
            EventKind::ReadStart,
            EventKind::ReadSuccess,
            EventKind::ReadError,
            EventKind::ResetState,
        ]
        .into_iter()
        .map(|kind| {
            let namespace = namespace.clone();
            let root = root.clone();
            context.on(kind, move |event| {
                let Some(action) = StoreAction::from_event(event) else {
                    return;
                };
                let namespace = lock(&namespace).clone();
                let mut root = lock(&root);
                let aggregate = root.entry(namespace).or_default();
                *aggregate = reducer(aggregate, &action);
            })
        })
        .collect();

        Self {
            namespace,
            root,
            subscriptions,
        }
    }

    pub fn namespace(&self) -> String {
        lock(&self.namespace).clone()
    }

    /// Aggregate under the current namespace
    pub fn state(&self) -> AggregateState {
        let namespace = self.namespace();
        lock(&self.root).get(&namespace).cloned().unwrap_or_default()
    }

    /// State mirrored for one node
    pub fn node_state(&self, id: &str) -> Option<NodeState> {
        self.state().get(id).cloned()
    }

    /// Snapshot of every namespace
    pub fn snapshot(&self) -> NamespacedState {
        lock(&self.root).clone()
    }

    /// Move the mirrored states to a new namespace and keep mirroring there
    pub fn migrate(&self, to: &str) {
        let mut namespace = lock(&self.namespace);
        migrate_namespace(&mut lock(&self.root), &namespace, to);
        *namespace = to.to_string();
    }

    /// Stop mirroring
    pub fn disconnect(self) {
        for subscription in self.subscriptions {
            subscription.unsubscribe();
        }
    }
}
