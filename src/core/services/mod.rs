pub mod bootstrap;
pub mod renewal;
pub mod scheduler;
pub mod timers;

#[cfg(test)]
mod tests;

pub use bootstrap::{BootstrapReport, Bootstrapper};
pub use renewal::{RenewalEngine, RenewalOutcome, SettlementSettings, UnsubscribeOutcome};
pub use scheduler::PaymentScheduler;
pub use timers::TimerRegistry;

use tracing::warn;

use crate::store::SubscriptionStore;

/// Webhook endpoint ids registered by `merchant_id`; lookup failures yield
/// no observers
pub(crate) async fn observer_ids(store: &SubscriptionStore, merchant_id: &str) -> Vec<String> {
    match store.webhook_endpoints_for_merchant(merchant_id).await {
        Ok(endpoints) => endpoints.into_iter().map(|endpoint| endpoint.id).collect(),
        Err(e) => {
            warn!(merchant_id, error = %e, "Failed to load observers");
            Vec::new()
        }
    }
}
