//! # Registry
//!
//! Index of the root nodes created in a [`ProviderContext`](crate::context::ProviderContext),
//! with bulk operations broadcast to all of them or to a subset selected by tag.
//! Query children are reached through their roots: every bulk operation recurses.
//!
//! Registration happens synchronously on node construction and never holds the
//! registry lock while user code runs, so nodes may be created from inside a
//! combinator or an event handler.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::{
    events::lock,
    node::Node,
    options::{CleanCacheOptions, ConfigOptions},
    types::ReadFuture,
};

#[derive(Default)]
struct RegistryInner {
    nodes: Mutex<Vec<Node>>,
}

/// Collection of every root node of a context
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, node: Node) {
        lock(&self.inner.nodes).push(node);
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        lock(&self.inner.nodes).iter().any(|node| node.id() == id)
    }

    pub fn get_by_id(&self, id: &str) -> Option<Node> {
        lock(&self.inner.nodes)
            .iter()
            .find(|node| node.id() == id)
            .cloned()
    }

    pub fn get_by_tag(&self, tag: &str) -> NodeSet {
        NodeSet::new(
            lock(&self.inner.nodes)
                .iter()
                .filter(|node| node.has_tag(tag))
                .cloned()
                .collect(),
        )
    }

    /// Every registered root node, in creation order
    pub fn all(&self) -> NodeSet {
        NodeSet::new(lock(&self.inner.nodes).clone())
    }

    pub fn ids(&self) -> Vec<String> {
        lock(&self.inner.nodes)
            .iter()
            .map(|node| node.id().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.nodes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self, options: ConfigOptions) {
        self.all().config(options);
    }

    pub fn clean_cache(&self) {
        self.all().clean_cache();
    }

    pub fn clean_cache_with(&self, options: CleanCacheOptions) {
        self.all().clean_cache_with(options);
    }

    pub fn reset_state(&self) {
        self.all().reset_state();
    }

    pub fn reset_stats(&self) {
        self.all().reset_stats();
    }

    pub fn call(&self, method: &str, args: Vec<Value>) -> Vec<Option<ReadFuture>> {
        self.all().call(method, args)
    }

    /// Forget every node (test/reset only)
    ///
    /// Timers and dependency subscriptions of the removed nodes are stopped.
    pub fn clear(&self) {
        let nodes: Vec<Node> = lock(&self.inner.nodes).drain(..).collect();
        crate::debug_log!("🗑️ [REGISTRY] Clearing {} nodes", nodes.len());
        for node in nodes {
            node.teardown();
        }
    }
}

/// A subset of nodes targeted by a bulk operation
#[derive(Clone, Debug, Default)]
pub struct NodeSet {
    nodes: Vec<Node>,
}

impl NodeSet {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn ids(&self) -> Vec<String> {
        self.nodes.iter().map(|node| node.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get_by_id(&self, id: &str) -> Option<Node> {
        self.nodes.iter().find(|node| node.id() == id).cloned()
    }

    pub fn get_by_tag(&self, tag: &str) -> NodeSet {
        NodeSet::new(
            self.nodes
                .iter()
                .filter(|node| node.has_tag(tag))
                .cloned()
                .collect(),
        )
    }

    pub fn config(&self, options: ConfigOptions) {
        for node in &self.nodes {
            node.config(options.clone());
        }
    }

    pub fn clean_cache(&self) {
        self.clean_cache_with(CleanCacheOptions::default());
    }

    pub fn clean_cache_with(&self, options: CleanCacheOptions) {
        for node in &self.nodes {
            node.clean_cache_with(options);
        }
    }

    pub fn reset_state(&self) {
        for node in &self.nodes {
            node.reset_state();
        }
    }

    pub fn reset_stats(&self) {
        for node in &self.nodes {
            node.reset_stats();
        }
    }

    /// Invoke a named method on every node of the set
    ///
    /// Nodes lacking the method yield `None` and a warning; the others still run.
    pub fn call(&self, method: &str, args: Vec<Value>) -> Vec<Option<ReadFuture>> {
        self.nodes
            .iter()
            .map(|node| {
                let result = node.call(method, args.clone());
                if result.is_none() {
                    crate::warn_log!("Node '{}' does not implement method '{}'", node.id(), method);
                }
                result
            })
            .collect()
    }
}

impl IntoIterator for NodeSet {
    type Item = Node;
    type IntoIter = std::vec::IntoIter<Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_iter()
    }
}
