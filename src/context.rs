//! # Provider context
//!
//! The context owns what would otherwise be process-wide state: the registry of
//! nodes, the aggregated event bus and the id generator. Nodes are created against
//! an explicit context, so independent applications or tests never share nodes.
//!
//! ## Example
//!
//! ```rust,no_run
//! use data_provider::prelude::*;
//! use std::time::Duration;
//!
//! let context = ContextConfig::new()
//!     .with_id_prefix("app")
//!     .with_default_options(ConfigOptions::new().cache_time(Duration::from_secs(60)))
//!     .build();
//!
//! // between tests
//! context.registry().clear();
//! ```

use std::{
    collections::hash_map::RandomState,
    hash::{BuildHasher, Hasher},
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{
    events::{EventEmitter, EventKind, NodeEvent, Subscription},
    options::ConfigOptions,
    registry::Registry,
};

/// Configuration for building a [`ProviderContext`]
#[derive(Default, Debug, Clone)]
pub struct ContextConfig {
    id_prefix: Option<String>,
    default_options: ConfigOptions,
}

impl ContextConfig {
    /// Create a new context configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix of auto-generated node ids (random when unset)
    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = Some(prefix.into());
        self
    }

    /// Options every node created in the context starts from
    pub fn with_default_options(mut self, options: ConfigOptions) -> Self {
        self.default_options = options;
        self
    }

    pub fn build(self) -> ProviderContext {
        let prefix = self.id_prefix.unwrap_or_else(random_prefix);
        crate::debug_log!("🚀 [CONTEXT] New provider context (id prefix: {})", prefix);
        ProviderContext {
            inner: Arc::new(ContextInner {
                prefix,
                counter: AtomicU64::new(0),
                default_options: self.default_options,
                registry: Registry::new(),
                events: EventEmitter::new(),
            }),
        }
    }
}

pub(crate) struct ContextInner {
    prefix: String,
    counter: AtomicU64,
    default_options: ConfigOptions,
    registry: Registry,
    events: EventEmitter,
}

/// Explicitly constructed home of a set of nodes
#[derive(Clone)]
pub struct ProviderContext {
    inner: Arc<ContextInner>,
}

impl Default for ProviderContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderContext {
    pub fn new() -> Self {
        ContextConfig::new().build()
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ContextInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Bus receiving the events of every node of the context, query children included
    pub fn events(&self) -> &EventEmitter {
        &self.inner.events
    }

    /// Subscribe to an event of any node of the context
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&NodeEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, handler)
    }

    pub fn id_prefix(&self) -> &str {
        &self.inner.prefix
    }

    pub(crate) fn default_options(&self) -> &ConfigOptions {
        &self.inner.default_options
    }

    /// Pick the id of a new root node
    ///
    /// Explicit ids that are already taken get a numeric suffix and a warning.
    pub(crate) fn assign_id(&self, requested: Option<&str>) -> String {
        let registry = self.registry();
        let Some(requested) = requested else {
            // explicit ids may already occupy generated slots
            loop {
                let count = self.inner.counter.fetch_add(1, Ordering::SeqCst);
                let candidate = format!("{}_{}", self.inner.prefix, count);
                if !registry.contains(&candidate) {
                    return candidate;
                }
            }
        };
        if !registry.contains(requested) {
            return requested.to_string();
        }
        let mut suffix = 2;
        let mut candidate = format!("{requested}_{suffix}");
        while registry.contains(&candidate) {
            suffix += 1;
            candidate = format!("{requested}_{suffix}");
        }
        crate::warn_log!(
            "Duplicated node id '{}', the node was registered as '{}'",
            requested,
            candidate
        );
        candidate
    }
}

fn random_prefix() -> String {
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(0x5eed);
    let hash = format!("{:x}", hasher.finish());
    hash.chars().take(8).collect()
}
