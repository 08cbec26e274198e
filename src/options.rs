//! Node configuration
//!
//! [`NodeOptions`] is the resolved configuration of a node. [`ConfigOptions`] is a
//! patch: every field is optional and only the fields that are set override the
//! current options when passed to `config()`.

use std::{collections::BTreeSet, fmt, sync::Arc, time::Duration};

use serde_json::Value;

use crate::query::QueryValue;

/// Seed for `state.data`
#[derive(Clone)]
pub enum InitialState {
    /// Fixed initial data
    Value(Value),
    /// Initial data computed from the node's query value
    FromQuery(Arc<dyn Fn(&QueryValue) -> Option<Value> + Send + Sync>),
}

impl InitialState {
    pub fn from_query<F>(f: F) -> Self
    where
        F: Fn(&QueryValue) -> Option<Value> + Send + Sync + 'static,
    {
        InitialState::FromQuery(Arc::new(f))
    }

    pub(crate) fn resolve(&self, query: &QueryValue) -> Option<Value> {
        match self {
            InitialState::Value(value) => Some(value.clone()),
            InitialState::FromQuery(f) => f(query),
        }
    }
}

impl fmt::Debug for InitialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitialState::Value(value) => f.debug_tuple("Value").field(value).finish(),
            InitialState::FromQuery(_) => f.write_str("FromQuery(..)"),
        }
    }
}

impl From<Value> for InitialState {
    fn from(value: Value) -> Self {
        InitialState::Value(value)
    }
}

/// Resolved configuration of a node
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// Memoize read results. When false every `read()` re-fetches once the
    /// in-flight read (if any) settles.
    pub cache: bool,
    /// Expire the cache this long after the last successful read
    pub cache_time: Option<Duration>,
    /// Clean the cache on a repeating timer
    pub clean_cache_interval: Option<Duration>,
    pub initial_state: Option<InitialState>,
    pub tags: BTreeSet<String>,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            cache: true,
            cache_time: None,
            clean_cache_interval: None,
            initial_state: None,
            tags: BTreeSet::new(),
        }
    }
}

impl NodeOptions {
    /// Shallow-merge a patch into these options. Tags are only ever added.
    pub fn merge(&mut self, patch: &ConfigOptions) {
        if let Some(cache) = patch.cache {
            self.cache = cache;
        }
        if let Some(cache_time) = patch.cache_time {
            self.cache_time = cache_time;
        }
        if let Some(interval) = patch.clean_cache_interval {
            self.clean_cache_interval = interval;
        }
        if let Some(initial_state) = &patch.initial_state {
            self.initial_state = Some(initial_state.clone());
        }
        self.tags.extend(patch.tags.iter().cloned());
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Patch applied by `config()`
///
/// `cache_time` and `clean_cache_interval` are doubly optional: `None` leaves the
/// current value alone, `Some(None)` disables the timer.
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    pub cache: Option<bool>,
    pub cache_time: Option<Option<Duration>>,
    pub clean_cache_interval: Option<Option<Duration>>,
    pub initial_state: Option<InitialState>,
    pub tags: Vec<String>,
}

impl ConfigOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable memoization
    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Expire the cache `duration` after each successful read
    pub fn cache_time(mut self, duration: Duration) -> Self {
        self.cache_time = Some(Some(duration));
        self
    }

    /// Disable cache-time expiry
    pub fn clear_cache_time(mut self) -> Self {
        self.cache_time = Some(None);
        self
    }

    /// Clean the cache every `interval`
    pub fn clean_cache_interval(mut self, interval: Duration) -> Self {
        self.clean_cache_interval = Some(Some(interval));
        self
    }

    /// Stop the clean-cache interval
    pub fn clear_clean_cache_interval(mut self) -> Self {
        self.clean_cache_interval = Some(None);
        self
    }

    pub fn initial_state(mut self, initial_state: impl Into<InitialState>) -> Self {
        self.initial_state = Some(initial_state.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Options for `clean_cache_with()`
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanCacheOptions {
    /// Clear immediately, even while a read is in flight
    pub force: bool,
}

impl CleanCacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force() -> Self {
        Self { force: true }
    }
}

/// Hook invoked after every `config()` with the resolved options
pub type ConfigHook = Arc<dyn Fn(&NodeOptions) + Send + Sync>;
