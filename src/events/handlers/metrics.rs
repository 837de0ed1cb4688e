use async_trait::async_trait;
use metrics::{counter, histogram};
use tracing::debug;

use crate::events::{EventHandler, SubpayEvent};
use crate::metrics::{
    AUTH_ATTEMPTS_TOTAL, DATABASE_QUERIES_TOTAL, DATABASE_QUERY_DURATION_SECONDS,
    EVENT_BUS_EVENTS_TOTAL, INTAKE_PAYMENTS_TOTAL, LEDGER_QUERY_RETRIES_TOTAL, PAYMENT_AMOUNT,
    RENEWALS_TOTAL, SCHEDULED_RENEWALS_TOTAL, UNSUBSCRIBES_TOTAL,
};

/// Event handler that collects metrics from events for Prometheus export
pub struct MetricsEventHandler {
    service_name: String,
}

impl MetricsEventHandler {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn record_payment_amount(&self, source: &'static str, amount: u64) {
        histogram!(PAYMENT_AMOUNT, "source" => source).record(amount as f64);
    }

    fn record_renewal(&self, outcome: &'static str) {
        counter!(RENEWALS_TOTAL, "service" => self.service_name.clone(), "outcome" => outcome)
            .increment(1);
    }

    fn record_database_metrics(&self, operation: &str, duration_ms: u128, success: bool) {
        let status = if success { "success" } else { "error" };

        counter!(DATABASE_QUERIES_TOTAL, "operation" => operation.to_string(), "status" => status)
            .increment(1);

        histogram!(DATABASE_QUERY_DURATION_SECONDS, "operation" => operation.to_string())
            .record(duration_ms as f64 / 1000.0);
    }
}

#[async_trait]
impl EventHandler for MetricsEventHandler {
    async fn handle(&self, event: SubpayEvent) -> anyhow::Result<()> {
        // Capture event type before matching (to avoid move issues)
        let event_type = event.event_type();

        match event {
            SubpayEvent::PaymentReceived { amount, .. } => {
                counter!(INTAKE_PAYMENTS_TOTAL, "status" => "accepted").increment(1);
                self.record_payment_amount("intake", amount);
            }
            SubpayEvent::IntentCreated { .. } => {
                counter!(INTAKE_PAYMENTS_TOTAL, "status" => "intent_created").increment(1);
            }
            SubpayEvent::RenewalScheduled { .. } => {
                counter!(SCHEDULED_RENEWALS_TOTAL).increment(1);
            }
            SubpayEvent::RenewalSucceeded { amount, .. } => {
                self.record_renewal("renewed");
                self.record_payment_amount("renewal", amount);
            }
            SubpayEvent::RenewalFailed { .. } => {
                self.record_renewal("failed");
            }
            SubpayEvent::IntentUnsubscribed {
                reason,
                onchain_unsubscribed,
                ..
            } => {
                let onchain = if onchain_unsubscribed { "true" } else { "false" };
                counter!(UNSUBSCRIBES_TOTAL, "reason" => reason, "onchain" => onchain)
                    .increment(1);
            }
            SubpayEvent::LedgerQueryRetried { .. } => {
                counter!(LEDGER_QUERY_RETRIES_TOTAL).increment(1);
            }
            // Recorded at delivery time with the measured duration
            SubpayEvent::WebhookDispatched { .. } => {}
            SubpayEvent::DatabaseQueryExecuted {
                operation,
                duration_ms,
                success,
                ..
            } => {
                self.record_database_metrics(&operation, duration_ms, success);
            }
            SubpayEvent::AuthenticationAttempt {
                endpoint, success, ..
            } => {
                let status = if success { "success" } else { "failure" };
                counter!(AUTH_ATTEMPTS_TOTAL, "endpoint" => endpoint, "status" => status)
                    .increment(1);
            }
        }

        counter!(EVENT_BUS_EVENTS_TOTAL, "event_type" => event_type).increment(1);

        debug!(handler = self.name(), "Event metrics recorded");

        Ok(())
    }

    fn name(&self) -> &str {
        "metrics"
    }

    /// Metrics handler is not critical - failures shouldn't block event
    /// processing
    fn is_critical(&self) -> bool {
        false
    }
}
