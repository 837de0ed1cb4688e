use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{EventHandler, SubpayEvent};

/// Event handler that logs all events with appropriate levels
pub struct LoggingEventHandler {
    include_debug_events: bool,
}

impl LoggingEventHandler {
    pub fn new(include_debug_events: bool) -> Self {
        Self {
            include_debug_events,
        }
    }
}

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle(&self, event: SubpayEvent) -> anyhow::Result<()> {
        match event {
            SubpayEvent::PaymentReceived {
                digest,
                product_id,
                user_id,
                amount,
                receipt_id,
                correlation_id,
                timestamp,
            } => {
                info!(
                    event_type = "payment_received",
                    digest = %digest,
                    product_id = %product_id,
                    user_id = %user_id,
                    amount = amount,
                    receipt_id = %receipt_id,
                    correlation_id = ?correlation_id,
                    timestamp = %timestamp,
                    "Payment received"
                );
            }
            SubpayEvent::IntentCreated {
                intent_id,
                product_id,
                user_id,
                next_payment_due,
                correlation_id,
                timestamp,
            } => {
                info!(
                    event_type = "intent_created",
                    intent_id = %intent_id,
                    product_id = %product_id,
                    user_id = %user_id,
                    next_payment_due = %next_payment_due,
                    correlation_id = ?correlation_id,
                    timestamp = %timestamp,
                    "Payment intent created"
                );
            }
            SubpayEvent::RenewalScheduled {
                intent_id,
                due_at,
                timestamp,
            } => {
                if self.include_debug_events {
                    debug!(
                        event_type = "renewal_scheduled",
                        intent_id = %intent_id,
                        due_at = %due_at,
                        timestamp = %timestamp,
                        "Renewal scheduled"
                    );
                }
            }
            SubpayEvent::RenewalSucceeded {
                intent_id,
                digest,
                amount,
                receipt_id,
                next_payment_due,
                timestamp,
            } => {
                info!(
                    event_type = "renewal_succeeded",
                    intent_id = %intent_id,
                    digest = %digest,
                    amount = amount,
                    receipt_id = %receipt_id,
                    next_payment_due = %next_payment_due,
                    timestamp = %timestamp,
                    "Renewal succeeded"
                );
            }
            SubpayEvent::RenewalFailed {
                intent_id,
                reason,
                timestamp,
            } => {
                error!(
                    event_type = "renewal_failed",
                    intent_id = %intent_id,
                    reason = %reason,
                    timestamp = %timestamp,
                    "Renewal failed"
                );
            }
            SubpayEvent::IntentUnsubscribed {
                intent_id,
                reason,
                onchain_unsubscribed,
                timestamp,
            } => {
                info!(
                    event_type = "intent_unsubscribed",
                    intent_id = %intent_id,
                    reason = %reason,
                    onchain_unsubscribed = onchain_unsubscribed,
                    timestamp = %timestamp,
                    "Payment intent unsubscribed"
                );
            }
            SubpayEvent::LedgerQueryRetried {
                digest,
                attempt,
                delay_ms,
                timestamp,
            } => {
                warn!(
                    event_type = "ledger_query_retried",
                    digest = %digest,
                    attempt = attempt,
                    delay_ms = delay_ms,
                    timestamp = %timestamp,
                    "Transaction not yet indexed, retrying event query"
                );
            }
            SubpayEvent::WebhookDispatched {
                endpoint_id,
                event,
                success,
                status_code,
                timestamp,
            } => {
                if success {
                    if self.include_debug_events {
                        debug!(
                            event_type = "webhook_dispatched",
                            endpoint_id = %endpoint_id,
                            event = %event,
                            status_code = ?status_code,
                            timestamp = %timestamp,
                            "Webhook delivered"
                        );
                    }
                } else {
                    warn!(
                        event_type = "webhook_dispatched",
                        endpoint_id = %endpoint_id,
                        event = %event,
                        status_code = ?status_code,
                        timestamp = %timestamp,
                        "Webhook delivery failed"
                    );
                }
            }
            SubpayEvent::DatabaseQueryExecuted {
                operation,
                key_prefix,
                duration_ms,
                success,
                error_message,
                correlation_id,
                timestamp,
            } => {
                if success {
                    if duration_ms > 100 {
                        warn!(
                            event_type = "database_query_slow",
                            operation = %operation,
                            key_prefix = %key_prefix,
                            duration_ms = duration_ms,
                            correlation_id = ?correlation_id,
                            timestamp = %timestamp,
                            "Slow database query detected"
                        );
                    } else if self.include_debug_events {
                        debug!(
                            event_type = "database_query_executed",
                            operation = %operation,
                            key_prefix = %key_prefix,
                            duration_ms = duration_ms,
                            correlation_id = ?correlation_id,
                            timestamp = %timestamp,
                            "Database query executed successfully"
                        );
                    }
                } else {
                    error!(
                        event_type = "database_query_failed",
                        operation = %operation,
                        key_prefix = %key_prefix,
                        duration_ms = duration_ms,
                        error = ?error_message,
                        correlation_id = ?correlation_id,
                        timestamp = %timestamp,
                        "Database query failed"
                    );
                }
            }
            SubpayEvent::AuthenticationAttempt {
                ip_address,
                endpoint,
                success,
                reason,
                correlation_id,
                timestamp,
            } => {
                if success {
                    debug!(
                        event_type = "authentication_succeeded",
                        ip_address = %ip_address,
                        endpoint = %endpoint,
                        correlation_id = ?correlation_id,
                        timestamp = %timestamp,
                        "Authentication succeeded"
                    );
                } else {
                    warn!(
                        event_type = "authentication_failed",
                        ip_address = %ip_address,
                        endpoint = %endpoint,
                        reason = ?reason,
                        correlation_id = ?correlation_id,
                        timestamp = %timestamp,
                        "Authentication failed"
                    );
                }
            }
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }

    /// Logging handler is critical - we want to ensure logs are written
    fn is_critical(&self) -> bool {
        true
    }
}
