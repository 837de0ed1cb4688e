//! Observer notifications.
//!
//! Delivery is fire-and-forget: [`Notifier::notify`] never blocks the caller
//! and never reports delivery failures back to it.

pub mod endpoint;
pub mod notifier;
pub mod payload;

#[cfg(test)]
mod tests;

pub use endpoint::{validate_webhook_url, WebhookEndpoint};
pub use notifier::{
    calculate_hmac_signature, verify_hmac_signature, WebhookConfig, WebhookNotifier,
};
pub use payload::{NotificationPayload, ObserverEvent};

/// Sink for observer notifications
pub trait Notifier: Send + Sync {
    /// Enqueue `payload` for every observer id; returns immediately
    fn notify(&self, observer_ids: &[String], payload: NotificationPayload);
}

impl<T: Notifier + ?Sized> Notifier for std::sync::Arc<T> {
    fn notify(&self, observer_ids: &[String], payload: NotificationPayload) {
        (**self).notify(observer_ids, payload)
    }
}
