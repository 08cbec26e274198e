//! # Per-node cache and statistics
//!
//! Every node (and every query child) owns exactly one [`CacheSlot`]. The slot
//! moves through `Empty -> Pending -> Resolved` and back to `Empty` on
//! invalidation. Rejections are never stored: a failed read leaves the slot empty
//! so the next `read()` retries.
//!
//! Each fetch is tagged with an epoch. A settle whose epoch no longer matches the
//! slot (because the slot was force-cleaned and possibly refilled meanwhile) still
//! updates state and statistics but leaves the slot alone.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use futures::future::Shared;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::types::ReadFuture;

/// The memoized in-flight read, cloned for every caller
pub(crate) type SharedRead = Shared<ReadFuture>;

/// A resolved cache entry with its timestamp
#[derive(Clone, Debug)]
pub(crate) struct CacheEntry {
    value: Value,
    cached_at: Instant,
}

impl CacheEntry {
    pub(crate) fn new(value: Value) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
        }
    }

    pub(crate) fn value(&self) -> &Value {
        &self.value
    }

    /// Age of this cache entry
    pub(crate) fn age(&self) -> Duration {
        self.cached_at.elapsed()
    }
}

pub(crate) enum CacheSlot {
    Empty,
    Pending { epoch: u64, read: SharedRead },
    Resolved { epoch: u64, entry: CacheEntry },
}

impl CacheSlot {
    pub(crate) fn is_pending(&self) -> bool {
        matches!(self, CacheSlot::Pending { .. })
    }

    pub(crate) fn epoch(&self) -> Option<u64> {
        match self {
            CacheSlot::Empty => None,
            CacheSlot::Pending { epoch, .. } | CacheSlot::Resolved { epoch, .. } => Some(*epoch),
        }
    }

    pub(crate) fn status(&self) -> CacheStatus {
        match self {
            CacheSlot::Empty => CacheStatus::Empty,
            CacheSlot::Pending { .. } => CacheStatus::Pending,
            CacheSlot::Resolved { entry, .. } => CacheStatus::Resolved { age: entry.age() },
        }
    }
}

/// Public view of a node's cache slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Empty,
    Pending,
    Resolved { age: Duration },
}

impl CacheStatus {
    pub fn is_empty(&self) -> bool {
        matches!(self, CacheStatus::Empty)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, CacheStatus::Pending)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, CacheStatus::Resolved { .. })
    }
}

/// Counters of node actions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStats {
    pub init: u64,
    pub read_start: u64,
    pub read_success: u64,
    pub read_error: u64,
    pub clean_cache: u64,
    pub reset_state: u64,
}

/// Snapshot of a node's statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub actions: ActionStats,
}

/// Action being counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Init,
    ReadStart,
    ReadSuccess,
    ReadError,
    CleanCache,
    ResetState,
}

/// Lock-free counters backing [`Stats`]
#[derive(Default)]
pub(crate) struct StatsCounter {
    init: AtomicU64,
    read_start: AtomicU64,
    read_success: AtomicU64,
    read_error: AtomicU64,
    clean_cache: AtomicU64,
    reset_state: AtomicU64,
}

impl StatsCounter {
    fn counter(&self, action: Action) -> &AtomicU64 {
        match action {
            Action::Init => &self.init,
            Action::ReadStart => &self.read_start,
            Action::ReadSuccess => &self.read_success,
            Action::ReadError => &self.read_error,
            Action::CleanCache => &self.clean_cache,
            Action::ResetState => &self.reset_state,
        }
    }

    pub(crate) fn record(&self, action: Action) {
        self.counter(action).fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn reset(&self) {
        for action in [
            Action::Init,
            Action::ReadStart,
            Action::ReadSuccess,
            Action::ReadError,
            Action::CleanCache,
            Action::ResetState,
        ] {
            self.counter(action).store(0, Ordering::SeqCst);
        }
    }

    pub(crate) fn snapshot(&self) -> Stats {
        Stats {
            actions: ActionStats {
                init: self.init.load(Ordering::SeqCst),
                read_start: self.read_start.load(Ordering::SeqCst),
                read_success: self.read_success.load(Ordering::SeqCst),
                read_error: self.read_error.load(Ordering::SeqCst),
                clean_cache: self.clean_cache.load(Ordering::SeqCst),
                reset_state: self.reset_state.load(Ordering::SeqCst),
            },
        }
    }
}
