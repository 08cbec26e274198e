//! Timer-driven cache expiry for nodes.
//!
//! - `cache_time`: one-shot expiry armed after every successful read, and re-armed
//!   from the entry's age when the value changes
//! - `clean_cache_interval`: repeating clean that skips ticks while nothing is cached
//!
//! Both timers hold a weak handle, so a timer never keeps its node alive.

use std::time::Duration;

use crate::{
    cache::CacheSlot,
    events::lock,
    node::Node,
    platform::{self, task::TaskHandle},
};

#[derive(Default)]
pub(crate) struct NodeTimers {
    expiry: Option<TaskHandle>,
    interval: Option<(Duration, TaskHandle)>,
}

impl NodeTimers {
    fn stop_expiry(&mut self) {
        if let Some(handle) = self.expiry.take() {
            handle.abort();
        }
    }

    fn stop_interval(&mut self) {
        if let Some((_, handle)) = self.interval.take() {
            handle.abort();
        }
    }
}

impl Drop for NodeTimers {
    fn drop(&mut self) {
        self.stop_expiry();
        self.stop_interval();
    }
}

/// Arm (or re-arm) the cache-time expiry for the entry cached at `epoch`
///
/// `elapsed` is how long the entry has already been cached; the timer fires once
/// the entry is `cache_time` old, immediately if it already is.
pub(crate) fn arm_cache_time(node: &Node, epoch: u64, elapsed: Duration) {
    let Some(cache_time) = lock(&node.inner.options).cache_time else {
        return;
    };
    let weak = node.downgrade();
    let handle = platform::task::spawn(async move {
        platform::time::sleep(cache_time.saturating_sub(elapsed)).await;
        let Some(node) = weak.upgrade() else {
            return;
        };
        let expired = matches!(
            lock(&node.inner.cache).slot,
            CacheSlot::Resolved { epoch: cached, .. } if cached == epoch
        );
        if expired {
            crate::debug_log!(
                "🗑️ [AUTO-EXPIRATION] Cache time elapsed for {} after {:?}",
                node.id(),
                cache_time
            );
            node.clean_self(false);
        }
    });
    let mut timers = lock(&node.inner.timers);
    timers.stop_expiry();
    timers.expiry = handle;
}

pub(crate) fn cancel_cache_time(node: &Node) {
    lock(&node.inner.timers).stop_expiry();
}

/// Start, stop or keep the repeating clean timer so it matches `interval`
///
/// Re-applying the interval that is already running leaves the timer untouched.
pub(crate) fn sync_clean_cache_interval(node: &Node, interval: Option<Duration>) {
    let mut timers = lock(&node.inner.timers);
    let running = timers.interval.as_ref().map(|(period, _)| *period);
    if running == interval {
        return;
    }
    timers.stop_interval();

    let Some(period) = interval.filter(|period| !period.is_zero()) else {
        return;
    };
    let weak = node.downgrade();
    let handle = platform::task::spawn(async move {
        let mut ticker = platform::time::interval(period);
        loop {
            ticker.tick().await;
            let Some(node) = weak.upgrade() else {
                return;
            };
            if node.cache_status().is_resolved() {
                crate::debug_log!(
                    "🧹 [CLEAN-INTERVAL] Cleaning cache of {} (every {:?})",
                    node.id(),
                    period
                );
                node.clean_self(false);
            }
        }
    });
    match handle {
        Some(handle) => timers.interval = Some((period, handle)),
        None => {
            crate::warn_log!(
                "clean_cache_interval on {} ignored: no tokio runtime is running",
                node.id()
            );
        }
    }
}

/// Abort every timer of the node
pub(crate) fn stop_all(node: &Node) {
    let mut timers = lock(&node.inner.timers);
    timers.stop_expiry();
    timers.stop_interval();
}
