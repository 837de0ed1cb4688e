use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Notifier, NotificationPayload, WebhookEndpoint};
use crate::events::{EventBus, SubpayEvent};
use crate::metrics::webhook_metrics;
use crate::store::SubscriptionStore;

pub const USER_AGENT: &str = "subpayd-webhook/1.0";
pub const SIGNATURE_HEADER: &str = "X-Signature-SHA256";
pub const EVENT_ID_HEADER: &str = "X-Event-Id";

/// Configuration for the webhook system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WebhookConfig {
    /// Whether webhook delivery is enabled globally
    pub enabled: bool,
    /// Notifications buffered before new ones are dropped
    pub queue_capacity: usize,
    /// Timeout for each webhook request in seconds
    pub timeout_secs: u64,
    /// Permit loopback and private network targets (local development)
    pub allow_private_targets: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 1024,
            timeout_secs: 10,
            allow_private_targets: false,
        }
    }
}

#[derive(Debug)]
struct Delivery {
    event_id: String,
    observer_ids: Vec<String>,
    payload: NotificationPayload,
}

/// Queue-backed [`Notifier`]: `notify` only enqueues, a single worker task
/// performs one delivery attempt per endpoint in FIFO order.
#[derive(Clone)]
pub struct WebhookNotifier {
    sender: mpsc::Sender<Delivery>,
    enabled: bool,
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("enabled", &self.enabled)
            .field("queue_open", &!self.sender.is_closed())
            .finish()
    }
}

impl WebhookNotifier {
    /// Start the delivery worker. The worker exits once every clone of the
    /// returned notifier is dropped and the queue is drained.
    pub fn spawn(
        config: WebhookConfig,
        store: SubscriptionStore,
        event_bus: Arc<EventBus>,
    ) -> anyhow::Result<(Self, JoinHandle<()>)> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let worker = DeliveryWorker {
            client,
            store,
            event_bus,
            allow_private_targets: config.allow_private_targets,
        };
        let handle = tokio::spawn(worker.run(receiver));

        info!(
            enabled = config.enabled,
            queue_capacity = config.queue_capacity,
            "Webhook delivery worker started"
        );

        Ok((
            Self {
                sender,
                enabled: config.enabled,
            },
            handle,
        ))
    }

    /// Whether the delivery worker is still accepting notifications
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, observer_ids: &[String], payload: NotificationPayload) {
        if !self.enabled {
            debug!(event = %payload.event, "Webhook notifications disabled, skipping");
            return;
        }
        if observer_ids.is_empty() {
            debug!(event = %payload.event, "No observers registered, skipping");
            return;
        }

        let event = payload.event;
        let delivery = Delivery {
            event_id: Uuid::new_v4().to_string(),
            observer_ids: observer_ids.to_vec(),
            payload,
        };

        match self.sender.try_send(delivery) {
            Ok(()) => {}
            Err(TrySendError::Full(delivery)) => {
                webhook_metrics::record_webhook_dropped(event.as_str());
                warn!(
                    event_id = %delivery.event_id,
                    event = %event,
                    "Webhook queue full, notification dropped"
                );
            }
            Err(TrySendError::Closed(delivery)) => {
                warn!(
                    event_id = %delivery.event_id,
                    event = %event,
                    "Webhook worker stopped, notification dropped"
                );
            }
        }
    }
}

struct DeliveryWorker {
    client: Client,
    store: SubscriptionStore,
    event_bus: Arc<EventBus>,
    allow_private_targets: bool,
}

impl DeliveryWorker {
    async fn run(self, mut receiver: mpsc::Receiver<Delivery>) {
        while let Some(delivery) = receiver.recv().await {
            self.dispatch(delivery).await;
        }
        debug!("Webhook delivery worker stopped");
    }

    async fn dispatch(&self, delivery: Delivery) {
        let body = match serde_json::to_string(&delivery.payload) {
            Ok(body) => body,
            Err(e) => {
                warn!(event_id = %delivery.event_id, error = %e, "Failed to encode webhook payload");
                return;
            }
        };
        let event = delivery.payload.event;

        let mut endpoints = Vec::new();
        for observer_id in &delivery.observer_ids {
            match self.store.get_webhook_endpoint(observer_id).await {
                Ok(Some(endpoint)) if endpoint.should_receive_event(event.as_str()) => {
                    if let Err(e) = endpoint.validate(self.allow_private_targets) {
                        warn!(endpoint_id = %endpoint.id, error = %e, "Skipping invalid webhook endpoint");
                        continue;
                    }
                    endpoints.push(endpoint);
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    debug!(observer_id = %observer_id, "Observer no longer registered");
                }
                Err(e) => {
                    warn!(observer_id = %observer_id, error = %e, "Failed to load webhook endpoint");
                }
            }
        }

        // Endpoints of one notification are served concurrently; the next
        // notification waits so per-endpoint order matches enqueue order
        let deliveries = endpoints
            .iter()
            .map(|endpoint| self.deliver(endpoint, &delivery.event_id, event.as_str(), &body));
        futures::future::join_all(deliveries).await;
    }

    /// Single attempt; failures are logged and counted, never retried
    async fn deliver(&self, endpoint: &WebhookEndpoint, event_id: &str, event: &str, body: &str) {
        let started = Instant::now();

        let mut request = self
            .client
            .post(&endpoint.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", USER_AGENT)
            .header(EVENT_ID_HEADER, event_id)
            .body(body.to_string());

        if let Some(secret) = &endpoint.secret {
            match calculate_hmac_signature(body, secret) {
                Ok(signature) => request = request.header(SIGNATURE_HEADER, signature),
                Err(e) => {
                    warn!(endpoint_id = %endpoint.id, error = %e, "Failed to sign webhook payload");
                    return;
                }
            }
        }

        let (success, status_code) = match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    debug!(
                        endpoint_id = %endpoint.id,
                        event_id = %event_id,
                        status_code = %status,
                        "Webhook delivered"
                    );
                } else {
                    warn!(
                        endpoint_id = %endpoint.id,
                        event_id = %event_id,
                        status_code = %status,
                        "Webhook endpoint rejected notification"
                    );
                }
                (status.is_success(), Some(status.as_u16()))
            }
            Err(e) => {
                warn!(
                    endpoint_id = %endpoint.id,
                    event_id = %event_id,
                    error = %e,
                    "Webhook delivery failed"
                );
                (false, None)
            }
        };

        webhook_metrics::record_webhook_delivery(&endpoint.id, event, success, started.elapsed());
        self.event_bus
            .publish(SubpayEvent::WebhookDispatched {
                endpoint_id: endpoint.id.clone(),
                event: event.to_string(),
                success,
                status_code,
                timestamp: Utc::now(),
            })
            .await;
    }
}

/// `sha256=<hex>` HMAC of the raw body
pub fn calculate_hmac_signature(payload: &str, secret: &str) -> anyhow::Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid HMAC key: {}", e))?;

    mac.update(payload.as_bytes());
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Verify a signature produced by [`calculate_hmac_signature`] in constant time
pub fn verify_hmac_signature(payload: &str, signature: &str, secret: &str) -> bool {
    let Some(hex_signature) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload.as_bytes());
    mac.verify_slice(&expected).is_ok()
}
