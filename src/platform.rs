//! Runtime glue: task spawning and timers.
//!
//! Reads are spawned on the ambient tokio runtime so that a fetch always settles
//! into its node's lifecycle, even when every caller dropped its future.

use std::{future::Future, time::Duration};

pub mod task {
    use super::*;

    /// Handle to a spawned background task
    pub type TaskHandle = tokio::task::JoinHandle<()>;

    /// Whether a tokio runtime is driving the current thread
    pub fn runtime_available() -> bool {
        tokio::runtime::Handle::try_current().is_ok()
    }

    /// Spawn a future on the current runtime, `None` outside of one
    pub fn spawn<F>(future: F) -> Option<TaskHandle>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::runtime::Handle::try_current()
            .ok()
            .map(|handle| handle.spawn(future))
    }
}

pub mod time {
    use super::*;

    pub async fn sleep(duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    pub fn interval(period: Duration) -> tokio::time::Interval {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval
    }
}
