use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::SubpayCore;
use crate::events::EventBus;
use crate::store::SubscriptionStore;

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;

/// Shared handle passed to every HTTP handler
#[derive(Clone, Debug)]
pub struct AppState {
    pub core: Arc<SubpayCore>,
}

impl AppState {
    pub fn new(core: SubpayCore) -> Self {
        Self {
            core: Arc::new(core),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.core.uptime()
    }

    pub fn start_time(&self) -> Instant {
        self.core.start_time
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.core.event_bus
    }

    pub fn store(&self) -> &SubscriptionStore {
        &self.core.store
    }
}
