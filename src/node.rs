//! # Node: the shared cache & state core
//!
//! Providers and selectors are both [`Node`]s. They differ only in the strategy
//! producing their value ([`Source`]): a user fetch routine for providers, a
//! dependency resolution plus combinator for selectors.
//!
//! Query children form a tree: the parent of a child is the node `query()` was
//! called on. The root additionally indexes every descendant by [`QueryKey`], so a
//! given logical query maps to the same child instance whatever path was used to
//! reach it. Children are never evicted.
//!
//! Operations that recurse (`clean_cache`, `reset_state`, `reset_stats`, `config`,
//! `on_child`) reach every node obtained from this one, plus every node whose
//! query value extends this node's own however it was reached.
//!
//! `Node` is a cheap handle (`Arc`); equality is identity.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, Weak},
};

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::{
    cache::{Action, CacheSlot, CacheStatus, Stats, StatsCounter},
    context::{ContextInner, ProviderContext},
    errors::{ProviderError, ProviderResult},
    events::{EventEmitter, EventKind, NodeEvent, Subscription, lock},
    options::{CleanCacheOptions, ConfigHook, ConfigOptions, NodeOptions},
    provider::Fetcher,
    query::{QueryKey, QueryMergeFn, QueryValue, canonical_key},
    runtime::{request, tasks::NodeTimers},
    selector::{Combinator, Dependency, Derivation, ResolvedDependency},
    state::NodeState,
    types::ReadFuture,
};

/// Computes a query value from arbitrary arguments (`add_query`)
pub type NamedQuery = Arc<dyn Fn(&[Value]) -> QueryValue + Send + Sync>;

/// Named method attached to a node, e.g. the `create`/`update`/`delete` helpers
pub type NodeMethod = Arc<dyn Fn(Node, Vec<Value>) -> ReadFuture + Send + Sync>;

/// Strategy producing a node's value
#[derive(Clone)]
pub(crate) enum Source {
    Fetch(Arc<dyn Fetcher>),
    Derive(Arc<Derivation>),
}

/// Everything a root shares with its query children
pub(crate) struct Definition {
    pub(crate) source: Source,
    pub(crate) merge: QueryMergeFn,
    pub(crate) config_hook: Option<ConfigHook>,
    pub(crate) queries: Mutex<HashMap<String, NamedQuery>>,
    pub(crate) methods: Mutex<HashMap<String, NodeMethod>>,
}

/// Construction parameters gathered by the provider and selector builders
pub(crate) struct NodeSpec {
    pub(crate) id: Option<String>,
    pub(crate) options: ConfigOptions,
    pub(crate) definition: Definition,
}

pub(crate) struct CacheCell {
    pub(crate) slot: CacheSlot,
    /// A non-forced clean arrived while a read was in flight
    pub(crate) clean_pending: bool,
    pub(crate) next_epoch: u64,
}

struct WatchedDependency {
    node: WeakNode,
    subscription: Subscription,
}

pub(crate) struct NodeInner {
    id: String,
    context: Weak<ContextInner>,
    definition: Arc<Definition>,
    query: QueryValue,
    root: Option<WeakNode>,
    parent: Option<WeakNode>,
    /// Every descendant keyed by canonical query key (root only)
    index: Mutex<HashMap<QueryKey, Node>>,
    pub(crate) options: Mutex<NodeOptions>,
    pub(crate) cache: Mutex<CacheCell>,
    state: Mutex<NodeState>,
    pub(crate) stats: StatsCounter,
    emitter: EventEmitter,
    child_emitter: EventEmitter,
    pub(crate) timers: Mutex<NodeTimers>,
    dependencies: Mutex<HashMap<String, WatchedDependency>>,
}

/// A provider or selector instance (or one of their query children)
#[derive(Clone)]
pub struct Node {
    pub(crate) inner: Arc<NodeInner>,
}

/// Non-owning handle to a [`Node`]
#[derive(Clone)]
pub struct WeakNode {
    inner: Weak<NodeInner>,
}

impl WeakNode {
    pub fn upgrade(&self) -> Option<Node> {
        self.inner.upgrade().map(|inner| Node { inner })
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Node {}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("query", &self.inner.query)
            .field("selector", &self.is_selector())
            .finish()
    }
}

impl Node {
    /// Build, register and announce a root node
    pub(crate) fn register_root(context: &ProviderContext, spec: NodeSpec) -> Node {
        let id = context.assign_id(spec.id.as_deref());
        let mut options = NodeOptions::default();
        options.merge(context.default_options());
        options.merge(&spec.options);
        let query = QueryValue::new();
        let state = initial_state(&options, &query);

        let node = Node {
            inner: Arc::new(NodeInner {
                id,
                context: context.downgrade(),
                definition: Arc::new(spec.definition),
                query,
                root: None,
                parent: None,
                index: Mutex::new(HashMap::new()),
                options: Mutex::new(options),
                cache: Mutex::new(CacheCell::new()),
                state: Mutex::new(state),
                stats: StatsCounter::default(),
                emitter: EventEmitter::new(),
                child_emitter: EventEmitter::new(),
                timers: Mutex::new(NodeTimers::default()),
                dependencies: Mutex::new(HashMap::new()),
            }),
        };
        context.registry().register(node.clone());
        node.announce_init();
        node
    }

    fn new_child(root: &Node, parent: &Node, query: QueryValue, key: &QueryKey) -> Node {
        let options = parent.options();
        let state = initial_state(&options, &query);
        Node {
            inner: Arc::new(NodeInner {
                id: format!("{}({})", root.inner.id, key),
                context: root.inner.context.clone(),
                definition: root.inner.definition.clone(),
                query,
                root: Some(root.downgrade()),
                parent: Some(parent.downgrade()),
                index: Mutex::new(HashMap::new()),
                options: Mutex::new(options),
                cache: Mutex::new(CacheCell::new()),
                state: Mutex::new(state),
                stats: StatsCounter::default(),
                emitter: EventEmitter::new(),
                child_emitter: EventEmitter::new(),
                timers: Mutex::new(NodeTimers::default()),
                dependencies: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn announce_init(&self) {
        self.inner.stats.record(Action::Init);
        crate::debug_log!("🆕 [NODE] Created node: {}", self.inner.id);
        self.emit(EventKind::Init);
        let interval = lock(&self.inner.options).clean_cache_interval;
        crate::runtime::tasks::sync_clean_cache_interval(self, interval);
    }

    // ---- identity & introspection ----

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Query value this node was specialized with (empty at the root)
    pub fn query_value(&self) -> QueryValue {
        self.inner.query.clone()
    }

    /// Canonical key of this node, the root key for a root node
    pub fn query_key(&self) -> QueryKey {
        if self.is_root() {
            QueryKey::root()
        } else {
            canonical_key(Some(&self.inner.query))
        }
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    pub fn is_selector(&self) -> bool {
        matches!(self.inner.definition.source, Source::Derive(_))
    }

    /// The node this one was obtained from through `query()`
    pub fn parent(&self) -> Option<Node> {
        self.inner.parent.as_ref().and_then(WeakNode::upgrade)
    }

    fn root(&self) -> Node {
        self.inner
            .root
            .as_ref()
            .and_then(WeakNode::upgrade)
            .unwrap_or_else(|| self.clone())
    }

    /// Query children created from this node
    pub fn children(&self) -> Vec<Node> {
        let root = self.root();
        lock(&root.inner.index)
            .values()
            .filter(|child| child.parent().as_ref() == Some(self))
            .cloned()
            .collect()
    }

    /// Every query child below this node: obtained from it, or extending its query
    pub fn descendants(&self) -> Vec<Node> {
        let root = self.root();
        let index = lock(&root.inner.index);
        if self.is_root() {
            return index.values().cloned().collect();
        }
        index
            .values()
            .filter(|node| *node != self && node.is_below(self))
            .cloned()
            .collect()
    }

    /// The root and every query child this node is below
    fn ancestors(&self) -> Vec<Node> {
        if self.is_root() {
            return Vec::new();
        }
        let root = self.root();
        let mut ancestors: Vec<Node> = lock(&root.inner.index)
            .values()
            .filter(|node| *node != self && self.is_below(node))
            .cloned()
            .collect();
        ancestors.push(root);
        ancestors
    }

    /// Whether this child extends `other`'s query or was reached through it
    fn is_below(&self, other: &Node) -> bool {
        if self.inner.query.extends(&other.inner.query) {
            return true;
        }
        let mut parent = self.parent();
        while let Some(node) = parent {
            if &node == other {
                return true;
            }
            parent = node.parent();
        }
        false
    }

    pub fn downgrade(&self) -> WeakNode {
        WeakNode {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn context(&self) -> Option<ProviderContext> {
        self.inner.context.upgrade().map(ProviderContext::from_inner)
    }

    /// Snapshot of `{data, loading, error}`
    pub fn state(&self) -> NodeState {
        lock(&self.inner.state).clone()
    }

    pub fn stats(&self) -> Stats {
        self.inner.stats.snapshot()
    }

    pub fn options(&self) -> NodeOptions {
        lock(&self.inner.options).clone()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        lock(&self.inner.options).has_tag(tag)
    }

    pub fn cache_status(&self) -> CacheStatus {
        lock(&self.inner.cache).slot.status()
    }

    pub(crate) fn source(&self) -> &Source {
        &self.inner.definition.source
    }

    // ---- reading ----

    /// Read the node's value
    ///
    /// Returns the cached value when present, joins the in-flight read when one is
    /// pending, and otherwise starts a new fetch. The fetch routine is invoked
    /// synchronously, before this method returns. Requires a running tokio runtime.
    pub fn read(&self) -> ReadFuture {
        request::read(self, Vec::new())
    }

    /// Like [`Node::read`], forwarding `args` to the fetch routine if a new fetch starts
    pub fn read_with_args(&self, args: Vec<Value>) -> ReadFuture {
        request::read(self, args)
    }

    /// Read and deserialize the value
    pub async fn read_as<T: DeserializeOwned>(&self) -> ProviderResult<T> {
        let value = self.read().await?;
        Ok(serde_json::from_value(value)?)
    }

    // ---- cache & state ----

    /// Invalidate this node and its query children
    ///
    /// A read in flight is never dropped: the clean is applied once it settles.
    pub fn clean_cache(&self) {
        self.clean_cache_with(CleanCacheOptions::default());
    }

    pub fn clean_cache_with(&self, options: CleanCacheOptions) {
        self.clean_self(options.force);
        for child in self.descendants() {
            child.clean_self(options.force);
        }
    }

    /// Clean only this node's slot. Returns false when the clean was deferred.
    ///
    /// An already clean slot is left alone: no event, no statistic.
    pub(crate) fn clean_self(&self, force: bool) -> bool {
        {
            let mut cell = lock(&self.inner.cache);
            if matches!(cell.slot, CacheSlot::Empty) {
                return true;
            }
            if cell.slot.is_pending() && !force {
                if !cell.clean_pending {
                    crate::log_cache_invalidate!(
                        "Deferring clean of {} until its read settles",
                        self.inner.id
                    );
                }
                cell.clean_pending = true;
                return false;
            }
            cell.slot = CacheSlot::Empty;
            cell.clean_pending = false;
        }
        self.finish_clean();
        true
    }

    /// Apply a clean requested while the read of `epoch` was in flight
    ///
    /// Always notifies, even when the settled read left nothing cached.
    pub(crate) fn finish_deferred_clean(&self, epoch: u64) {
        {
            let mut cell = lock(&self.inner.cache);
            if matches!(cell.slot, CacheSlot::Resolved { epoch: cached, .. } if cached == epoch) {
                cell.slot = CacheSlot::Empty;
            }
        }
        self.finish_clean();
    }

    fn finish_clean(&self) {
        crate::runtime::tasks::cancel_cache_time(self);
        self.inner.stats.record(Action::CleanCache);
        crate::log_cache_invalidate!("Cleaned cache of {}", self.inner.id);
        self.emit(EventKind::CleanCache);
    }

    /// Restore `state` to its initial value on this node and its descendants
    pub fn reset_state(&self) {
        self.reset_own_state();
        for child in self.descendants() {
            child.reset_own_state();
        }
    }

    fn reset_own_state(&self) {
        let initial = initial_state(&self.options(), &self.inner.query);
        *lock(&self.inner.state) = initial;
        self.inner.stats.record(Action::ResetState);
        self.emit(EventKind::ResetState);
        self.emit(EventKind::Change);
    }

    /// Zero every counter on this node and its descendants. Cache and state are untouched.
    pub fn reset_stats(&self) {
        self.inner.stats.reset();
        for child in self.descendants() {
            child.inner.stats.reset();
        }
    }

    /// Shallow-merge `patch` into the options of this node and its descendants
    ///
    /// Existing cache is kept. Timers are only restarted when their value changed.
    pub fn config(&self, patch: ConfigOptions) {
        self.apply_config(&patch);
        for child in self.descendants() {
            child.apply_config(&patch);
        }
    }

    fn apply_config(&self, patch: &ConfigOptions) {
        let (previous_cache_time, options) = {
            let mut options = lock(&self.inner.options);
            let previous = options.cache_time;
            options.merge(patch);
            (previous, options.clone())
        };
        if options.cache_time != previous_cache_time {
            crate::runtime::tasks::cancel_cache_time(self);
            let resolved = match &lock(&self.inner.cache).slot {
                CacheSlot::Resolved { epoch, entry } => Some((*epoch, entry.age())),
                _ => None,
            };
            if let Some((epoch, age)) = resolved {
                crate::runtime::tasks::arm_cache_time(self, epoch, age);
            }
        }
        crate::runtime::tasks::sync_clean_cache_interval(self, options.clean_cache_interval);
        if let Some(hook) = &self.inner.definition.config_hook {
            hook(&options);
        }
    }

    pub(crate) fn update_state(&self, kind: EventKind, update: impl FnOnce(&mut NodeState)) {
        update(&mut lock(&self.inner.state));
        self.emit(kind);
        self.emit(EventKind::Change);
    }

    // ---- events ----

    /// Subscribe to this node's events
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&NodeEvent) + Send + Sync + 'static,
    {
        self.inner.emitter.on(kind, handler)
    }

    pub fn once<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&NodeEvent) + Send + Sync + 'static,
    {
        self.inner.emitter.once(kind, handler)
    }

    /// Subscribe to events of this node and of every descendant
    pub fn on_child<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&NodeEvent) + Send + Sync + 'static,
    {
        self.inner.child_emitter.on(kind, handler)
    }

    pub fn once_child<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&NodeEvent) + Send + Sync + 'static,
    {
        self.inner.child_emitter.once(kind, handler)
    }

    pub(crate) fn emit(&self, kind: EventKind) {
        let event = NodeEvent {
            kind,
            node_id: self.inner.id.clone(),
            state: self.state(),
        };
        self.inner.emitter.emit(&event);
        self.inner.child_emitter.emit(&event);
        for ancestor in self.ancestors() {
            ancestor.inner.child_emitter.emit(&event);
        }
        if let Some(context) = self.context() {
            context.events().emit(&event);
        }
    }

    // ---- query specialization ----

    /// Child specialized with `query`, merged over this node's own query value
    ///
    /// Structurally equal queries return the same instance.
    pub fn query(&self, query: QueryValue) -> Node {
        let merged = if self.is_root() {
            query
        } else {
            (self.inner.definition.merge)(&self.inner.query, &query)
        };
        self.root().child_for(merged, self)
    }

    /// `None` returns this node itself
    pub fn query_opt(&self, query: Option<QueryValue>) -> Node {
        match query {
            Some(query) => self.query(query),
            None => self.clone(),
        }
    }

    /// Specialize with any value serializing to a JSON object
    pub fn try_query<T: Serialize>(&self, query: &T) -> ProviderResult<Node> {
        Ok(self.query(QueryValue::from_serialize(query)?))
    }

    /// Look up or create the child for `query` in this root's index
    fn child_for(&self, query: QueryValue, parent: &Node) -> Node {
        let key = canonical_key(Some(&query));
        let (child, created) = {
            let mut index = lock(&self.inner.index);
            match index.get(&key) {
                Some(child) => (child.clone(), false),
                None => {
                    let child = Node::new_child(self, parent, query, &key);
                    index.insert(key, child.clone());
                    (child, true)
                }
            }
        };
        if created {
            child.announce_init();
        }
        child
    }

    /// Register a named query available on this node and all of its relatives
    pub fn add_query<F>(&self, name: impl Into<String>, query: F)
    where
        F: Fn(&[Value]) -> QueryValue + Send + Sync + 'static,
    {
        lock(&self.inner.definition.queries).insert(name.into(), Arc::new(query));
    }

    /// Apply a named query registered with [`Node::add_query`]
    pub fn named_query(&self, name: &str, args: &[Value]) -> ProviderResult<Node> {
        let query = lock(&self.inner.definition.queries).get(name).cloned();
        match query {
            Some(query) => Ok(self.query(query(args))),
            None => Err(ProviderError::MissingQuery {
                node: self.inner.id.clone(),
                name: name.to_string(),
            }),
        }
    }

    // ---- named methods ----

    /// Attach a named method, shared by the root and its query children
    pub fn add_method<F>(&self, name: impl Into<String>, method: F)
    where
        F: Fn(Node, Vec<Value>) -> ReadFuture + Send + Sync + 'static,
    {
        lock(&self.inner.definition.methods).insert(name.into(), Arc::new(method));
    }

    pub fn has_method(&self, name: &str) -> bool {
        lock(&self.inner.definition.methods).contains_key(name)
    }

    /// Invoke a named method, `None` if the node does not implement it
    pub fn call(&self, name: &str, args: Vec<Value>) -> Option<ReadFuture> {
        let method = lock(&self.inner.definition.methods).get(name).cloned()?;
        Some(method(self.clone(), args))
    }

    fn call_required(&self, name: &str, args: Vec<Value>) -> ReadFuture {
        match self.call(name, args) {
            Some(future) => future,
            None => {
                let err = ProviderError::MissingMethod {
                    node: self.inner.id.clone(),
                    method: name.to_string(),
                };
                futures::future::ready(Err(err)).boxed()
            }
        }
    }

    pub fn create(&self, value: Value) -> ReadFuture {
        self.call_required("create", vec![value])
    }

    pub fn update(&self, value: Value) -> ReadFuture {
        self.call_required("update", vec![value])
    }

    pub fn delete(&self) -> ReadFuture {
        self.call_required("delete", Vec::new())
    }

    // ---- selector helpers ----

    /// Dependency descriptors as given at construction (selectors only)
    pub fn dependencies(&self) -> Option<Vec<Dependency>> {
        match self.source() {
            Source::Derive(derivation) => Some(derivation.dependencies.clone()),
            Source::Fetch(_) => None,
        }
    }

    /// The plain combinator of a selector
    pub fn combinator(&self) -> Option<Combinator> {
        match self.source() {
            Source::Derive(derivation) => Some(derivation.combinator.clone()),
            Source::Fetch(_) => None,
        }
    }

    /// Dependency tree resolved for this node's query, without reading anything
    pub fn resolve_dependencies(&self) -> Option<Vec<ResolvedDependency>> {
        let query = self.dependency_query();
        match self.source() {
            Source::Derive(derivation) => Some(
                derivation
                    .dependencies
                    .iter()
                    .map(|dependency| dependency.resolve(query.as_ref(), &[]))
                    .collect(),
            ),
            Source::Fetch(_) => None,
        }
    }

    /// Query propagated to dependencies: none for a root selector
    pub(crate) fn dependency_query(&self) -> Option<QueryValue> {
        if self.is_root() {
            None
        } else {
            Some(self.inner.query.clone())
        }
    }

    /// Invalidate this selector whenever `dependency` cleans its cache
    pub(crate) fn watch_dependency(&self, dependency: &Node) {
        let mut watched = lock(&self.inner.dependencies);
        if watched.contains_key(dependency.id()) {
            return;
        }
        let selector = self.downgrade();
        let subscription = dependency.on(EventKind::CleanCache, move |event| {
            if let Some(selector) = selector.upgrade() {
                crate::log_cache_invalidate!(
                    "Dependency {} of {} was cleaned",
                    event.node_id,
                    selector.id()
                );
                selector.clean_self(false);
            }
        });
        watched.insert(
            dependency.id().to_string(),
            WatchedDependency {
                node: dependency.downgrade(),
                subscription,
            },
        );
    }

    /// Concrete dependencies this selector has resolved so far
    pub fn watched_dependencies(&self) -> Vec<Node> {
        lock(&self.inner.dependencies)
            .values()
            .filter_map(|watched| watched.node.upgrade())
            .collect()
    }

    /// Clean the cache of every dependency this selector has read
    pub fn clean_dependencies_cache(&self) {
        for dependency in self.watched_dependencies() {
            dependency.clean_cache();
        }
    }

    /// Drop the subscriptions to dependency invalidation
    fn unwatch_dependencies(&self) {
        let watched: Vec<WatchedDependency> =
            lock(&self.inner.dependencies).drain().map(|(_, w)| w).collect();
        for dependency in watched {
            dependency.subscription.unsubscribe();
        }
    }

    /// Stop timers and dependency watches of this node and its descendants
    pub(crate) fn teardown(&self) {
        for node in std::iter::once(self.clone()).chain(self.descendants()) {
            crate::runtime::tasks::stop_all(&node);
            node.unwatch_dependencies();
            node.inner.emitter.clear();
            node.inner.child_emitter.clear();
        }
    }
}

impl CacheCell {
    fn new() -> Self {
        Self {
            slot: CacheSlot::Empty,
            clean_pending: false,
            next_epoch: 0,
        }
    }
}

fn initial_state(options: &NodeOptions, query: &QueryValue) -> NodeState {
    NodeState::initial(
        options
            .initial_state
            .as_ref()
            .and_then(|initial| initial.resolve(query)),
    )
}
