use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info};
use uuid::Uuid;

pub mod handlers;

/// Internal telemetry events. Observer (webhook) notifications are a
/// separate channel, see [`crate::webhooks`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubpayEvent {
    // Intake events
    PaymentReceived {
        digest: String,
        product_id: String,
        user_id: String,
        amount: u64,
        receipt_id: String,
        correlation_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    IntentCreated {
        intent_id: String,
        product_id: String,
        user_id: String,
        next_payment_due: DateTime<Utc>,
        correlation_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    // Scheduling events
    RenewalScheduled {
        intent_id: String,
        due_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    // Renewal events
    RenewalSucceeded {
        intent_id: String,
        digest: String,
        amount: u64,
        receipt_id: String,
        next_payment_due: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    RenewalFailed {
        intent_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    IntentUnsubscribed {
        intent_id: String,
        reason: String,
        onchain_unsubscribed: bool,
        timestamp: DateTime<Utc>,
    },

    // Ledger events
    LedgerQueryRetried {
        digest: String,
        attempt: u32,
        delay_ms: u64,
        timestamp: DateTime<Utc>,
    },

    // Observer events
    WebhookDispatched {
        endpoint_id: String,
        event: String,
        success: bool,
        status_code: Option<u16>,
        timestamp: DateTime<Utc>,
    },

    // Database events
    DatabaseQueryExecuted {
        operation: String,
        key_prefix: String,
        duration_ms: u128,
        success: bool,
        error_message: Option<String>,
        correlation_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    // Authentication events
    AuthenticationAttempt {
        ip_address: String,
        endpoint: String,
        success: bool,
        reason: Option<String>,
        correlation_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl SubpayEvent {
    /// Generate a unique event ID
    pub fn event_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SubpayEvent::PaymentReceived { timestamp, .. }
            | SubpayEvent::IntentCreated { timestamp, .. }
            | SubpayEvent::RenewalScheduled { timestamp, .. }
            | SubpayEvent::RenewalSucceeded { timestamp, .. }
            | SubpayEvent::RenewalFailed { timestamp, .. }
            | SubpayEvent::IntentUnsubscribed { timestamp, .. }
            | SubpayEvent::LedgerQueryRetried { timestamp, .. }
            | SubpayEvent::WebhookDispatched { timestamp, .. }
            | SubpayEvent::DatabaseQueryExecuted { timestamp, .. }
            | SubpayEvent::AuthenticationAttempt { timestamp, .. } => *timestamp,
        }
    }

    pub fn correlation_id(&self) -> Option<&String> {
        match self {
            SubpayEvent::PaymentReceived { correlation_id, .. }
            | SubpayEvent::IntentCreated { correlation_id, .. }
            | SubpayEvent::DatabaseQueryExecuted { correlation_id, .. }
            | SubpayEvent::AuthenticationAttempt { correlation_id, .. } => correlation_id.as_ref(),
            _ => None,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            SubpayEvent::PaymentReceived { .. } => "payment_received",
            SubpayEvent::IntentCreated { .. } => "intent_created",
            SubpayEvent::RenewalScheduled { .. } => "renewal_scheduled",
            SubpayEvent::RenewalSucceeded { .. } => "renewal_succeeded",
            SubpayEvent::RenewalFailed { .. } => "renewal_failed",
            SubpayEvent::IntentUnsubscribed { .. } => "intent_unsubscribed",
            SubpayEvent::LedgerQueryRetried { .. } => "ledger_query_retried",
            SubpayEvent::WebhookDispatched { .. } => "webhook_dispatched",
            SubpayEvent::DatabaseQueryExecuted { .. } => "database_query_executed",
            SubpayEvent::AuthenticationAttempt { .. } => "authentication_attempt",
        }
    }
}

/// Trait for handling events asynchronously
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: SubpayEvent) -> anyhow::Result<()>;

    /// Get the name of this handler for identification
    fn name(&self) -> &str;

    /// Whether publishing should wait for this handler
    fn is_critical(&self) -> bool {
        false
    }
}

/// Event bus for distributing events to multiple handlers
pub struct EventBus {
    sender: broadcast::Sender<SubpayEvent>,
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
    max_capacity: usize,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("max_capacity", &self.max_capacity)
            .field(
                "handlers_count",
                &self.handlers.try_read().map(|h| h.len()).unwrap_or(0),
            )
            .finish()
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            handlers: Arc::new(RwLock::new(Vec::new())),
            max_capacity: capacity,
        }
    }

    pub async fn register_handler(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        let handler_name = handler.name().to_string();
        handlers.push(handler);
        info!(
            handler_name = %handler_name,
            total_handlers = handlers.len(),
            "Event handler registered successfully"
        );
    }

    /// Publish an event to all registered handlers.
    ///
    /// Non-critical handlers run on spawned tasks; critical handlers are
    /// awaited before this returns. Handler failures are logged and never
    /// surface to the publisher.
    pub async fn publish(&self, event: SubpayEvent) {
        let event_id = event.event_id();
        let event_type = event.event_type();

        debug!(
            event_id = %event_id,
            event_type = %event_type,
            correlation_id = ?event.correlation_id(),
            "Publishing event"
        );

        // No receivers is not an error
        let _ = self.sender.send(event.clone());

        let handlers = self.handlers.read().await.clone();
        let mut critical = Vec::new();

        for handler in handlers {
            let is_critical = handler.is_critical();
            let event = event.clone();
            let event_id = event_id.clone();

            let run = async move {
                if let Err(e) = handler.handle(event).await {
                    error!(
                        event_id = %event_id,
                        handler_name = %handler.name(),
                        error = ?e,
                        "Event handler failed"
                    );
                }
            };

            if is_critical {
                critical.push(run);
            } else {
                tokio::spawn(run);
            }
        }

        futures::future::join_all(critical).await;
    }

    /// Subscribe to the event stream for real-time event processing
    pub fn subscribe(&self) -> broadcast::Receiver<SubpayEvent> {
        self.sender.subscribe()
    }

    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }

    pub fn capacity(&self) -> usize {
        self.max_capacity
    }
}
