//! Read orchestration: cache hits, pending-request dedupe and settling.

use std::time::Duration;

use futures::{FutureExt, channel::oneshot, future};
use serde_json::Value;

use crate::{
    cache::{Action, CacheEntry, CacheSlot},
    errors::ProviderError,
    events::{EventKind, lock},
    node::{Node, Source},
    platform,
    provider::FetchRequest,
    selector,
    types::{ReadFuture, ReadResult},
};

/// Serve a read from the cache, join the in-flight read, or start a new one
pub(crate) fn read(node: &Node, args: Vec<Value>) -> ReadFuture {
    if !platform::task::runtime_available() {
        return future::ready(Err(ProviderError::Configuration(
            "read() requires a running tokio runtime".to_string(),
        )))
        .boxed();
    }

    let (epoch, sender, shared) = {
        let mut cell = lock(&node.inner.cache);
        match &cell.slot {
            CacheSlot::Resolved { entry, .. } => {
                crate::log_cache_hit!("{}", node.id());
                return future::ready(Ok(entry.value().clone())).boxed();
            }
            CacheSlot::Pending { read, .. } => {
                crate::debug_log!("🔄 [REQUEST-DEDUP] Joining pending read of {}", node.id());
                return read.clone().boxed();
            }
            CacheSlot::Empty => {}
        }

        cell.next_epoch += 1;
        let epoch = cell.next_epoch;
        let (sender, receiver) = oneshot::channel::<ReadResult>();
        let id = node.id().to_string();
        let read: ReadFuture = async move {
            receiver
                .await
                .unwrap_or_else(|_| Err(ProviderError::ReadAborted(id)))
        }
        .boxed();
        let shared = read.shared();
        cell.slot = CacheSlot::Pending {
            epoch,
            read: shared.clone(),
        };
        (epoch, sender, shared)
    };

    node.inner.stats.record(Action::ReadStart);
    crate::log_read_start!("Starting read of {} (epoch {})", node.id(), epoch);
    node.update_state(EventKind::ReadStart, |state| state.start_loading());

    let routine = start_routine(node, args);
    let task_node = node.clone();
    platform::task::spawn(async move {
        let result = routine.await;
        settle(&task_node, epoch, &result);
        let _ = sender.send(result);
    });

    shared.boxed()
}

/// Invoke the node's strategy. Fetch routines are called synchronously here.
fn start_routine(node: &Node, args: Vec<Value>) -> ReadFuture {
    match node.source().clone() {
        Source::Fetch(fetcher) => fetcher.fetch(FetchRequest {
            node_id: node.id().to_string(),
            query: node.query_value(),
            args,
        }),
        Source::Derive(derivation) => selector::derive(node.clone(), derivation),
    }
}

/// Apply a settled result to the node's cache, state and statistics
fn settle(node: &Node, epoch: u64, result: &ReadResult) {
    let keep = lock(&node.inner.options).cache;
    let (current, clean_after) = {
        let mut cell = lock(&node.inner.cache);
        let current = cell.slot.epoch() == Some(epoch);
        if current {
            cell.slot = match result {
                Ok(value) if keep => CacheSlot::Resolved {
                    epoch,
                    entry: CacheEntry::new(value.clone()),
                },
                _ => CacheSlot::Empty,
            };
        }
        let clean_after = current && std::mem::take(&mut cell.clean_pending);
        (current, clean_after)
    };

    match result {
        Ok(value) => {
            node.inner.stats.record(Action::ReadSuccess);
            crate::log_cache_store!("Read of {} resolved (cached: {})", node.id(), current && keep);
            node.update_state(EventKind::ReadSuccess, |state| state.succeed(value.clone()));
            if current && keep && !clean_after {
                crate::runtime::tasks::arm_cache_time(node, epoch, Duration::ZERO);
            }
        }
        Err(error) => {
            node.inner.stats.record(Action::ReadError);
            crate::log_read_error!("Read of {} failed: {}", node.id(), error);
            node.update_state(EventKind::ReadError, |state| state.fail(error.clone()));
        }
    }

    if clean_after {
        node.finish_deferred_clean(epoch);
    }
}
