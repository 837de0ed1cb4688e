use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::metrics::scheduler_metrics;

#[derive(Debug)]
struct ArmedTimer {
    handle: AbortHandle,
    generation: u64,
    due_at: DateTime<Utc>,
}

/// Process-local map from intent id to its single armed timer.
///
/// Only [`TimerRegistry::replace`], [`TimerRegistry::cancel`] and
/// [`TimerRegistry::release`] mutate the map.
#[derive(Debug, Default)]
pub struct TimerRegistry {
    timers: RwLock<HashMap<String, ArmedTimer>>,
    generation: AtomicU64,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the timer built by `make_task` and register it for `intent_id`,
    /// aborting the timer it replaces. `make_task` receives the generation
    /// the task must hand back to [`TimerRegistry::release`] when it fires.
    ///
    /// Returns true when an armed timer was replaced.
    pub async fn replace<F>(&self, intent_id: &str, due_at: DateTime<Utc>, make_task: F) -> bool
    where
        F: FnOnce(u64) -> BoxFuture<'static, ()>,
    {
        // The lock is held across spawn so a timer that fires immediately
        // cannot release itself before it is registered
        let mut timers = self.timers.write().await;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = tokio::spawn(make_task(generation)).abort_handle();

        let previous = timers.insert(
            intent_id.to_string(),
            ArmedTimer {
                handle,
                generation,
                due_at,
            },
        );
        scheduler_metrics::record_armed_timers(timers.len());

        match previous {
            Some(previous) => {
                previous.handle.abort();
                debug!(intent_id, generation, "Replaced armed timer");
                true
            }
            None => false,
        }
    }

    /// Abort and forget the timer for `intent_id`
    pub async fn cancel(&self, intent_id: &str) -> bool {
        let mut timers = self.timers.write().await;
        let removed = timers.remove(intent_id);
        scheduler_metrics::record_armed_timers(timers.len());

        match removed {
            Some(timer) => {
                timer.handle.abort();
                debug!(intent_id, "Cancelled armed timer");
                true
            }
            None => false,
        }
    }

    /// Called by a firing timer to drop its own entry. A newer timer armed
    /// for the same intent is left untouched.
    pub async fn release(&self, intent_id: &str, generation: u64) -> bool {
        let mut timers = self.timers.write().await;
        let owned = timers
            .get(intent_id)
            .is_some_and(|timer| timer.generation == generation);
        if owned {
            timers.remove(intent_id);
            scheduler_metrics::record_armed_timers(timers.len());
        }
        owned
    }

    pub async fn is_armed(&self, intent_id: &str) -> bool {
        self.timers.read().await.contains_key(intent_id)
    }

    pub async fn due_at(&self, intent_id: &str) -> Option<DateTime<Utc>> {
        self.timers.read().await.get(intent_id).map(|t| t.due_at)
    }

    pub async fn armed_count(&self) -> usize {
        self.timers.read().await.len()
    }

    /// Abort every timer, used on shutdown
    pub async fn cancel_all(&self) -> usize {
        let mut timers = self.timers.write().await;
        let count = timers.len();
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
        scheduler_metrics::record_armed_timers(0);
        count
    }
}
