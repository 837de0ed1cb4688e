use std::sync::{Arc, Once};

use lazy_static::lazy_static;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{debug, info};

// Define metric names as constants to avoid typos
pub const INTAKE_PAYMENTS_TOTAL: &str = "subpayd_intake_payments_total";
pub const PAYMENT_AMOUNT: &str = "subpayd_payment_amount";

pub const RENEWALS_TOTAL: &str = "subpayd_renewals_total";
pub const UNSUBSCRIBES_TOTAL: &str = "subpayd_unsubscribes_total";
pub const SCHEDULED_RENEWALS_TOTAL: &str = "subpayd_scheduled_renewals_total";
pub const ARMED_TIMERS: &str = "subpayd_armed_timers";

pub const LEDGER_QUERY_RETRIES_TOTAL: &str = "subpayd_ledger_query_retries_total";

pub const API_REQUESTS_TOTAL: &str = "subpayd_api_requests_total";
pub const API_REQUEST_DURATION_SECONDS: &str = "subpayd_api_request_duration_seconds";

pub const DATABASE_QUERIES_TOTAL: &str = "subpayd_database_queries_total";
pub const DATABASE_QUERY_DURATION_SECONDS: &str = "subpayd_database_query_duration_seconds";

pub const AUTH_ATTEMPTS_TOTAL: &str = "subpayd_auth_attempts_total";

pub const WEBHOOK_DELIVERIES_TOTAL: &str = "subpayd_webhook_deliveries_total";
pub const WEBHOOK_DELIVERY_DURATION_SECONDS: &str = "subpayd_webhook_delivery_duration_seconds";
pub const WEBHOOK_DROPPED_TOTAL: &str = "subpayd_webhook_dropped_total";

pub const EVENT_BUS_EVENTS_TOTAL: &str = "subpayd_event_bus_events_total";

lazy_static! {
    static ref PROMETHEUS_HANDLE: Arc<tokio::sync::RwLock<Option<PrometheusHandle>>> =
        Arc::new(tokio::sync::RwLock::new(None));
}

static METRICS_DESCRIBED: Once = Once::new();

/// Install the Prometheus recorder and describe every metric.
///
/// The recorder is global; calling this twice returns the handle installed
/// by the first call.
pub async fn init_prometheus_metrics() -> anyhow::Result<PrometheusHandle> {
    if let Some(handle) = get_prometheus_handle().await {
        return Ok(handle);
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    METRICS_DESCRIBED.call_once(|| {
        // Intake
        describe_counter!(INTAKE_PAYMENTS_TOTAL, "Total payments accepted at intake");
        describe_histogram!(PAYMENT_AMOUNT, "Settled payment amounts in base units");

        // Renewal engine and scheduler
        describe_counter!(RENEWALS_TOTAL, "Total renewal attempts by outcome");
        describe_counter!(UNSUBSCRIBES_TOTAL, "Total unsubscribe cleanups by reason");
        describe_counter!(SCHEDULED_RENEWALS_TOTAL, "Total renewal timers armed");
        describe_gauge!(ARMED_TIMERS, "Renewal timers currently armed");

        // Ledger
        describe_counter!(
            LEDGER_QUERY_RETRIES_TOTAL,
            "Event queries retried because the transaction was not yet indexed"
        );

        // API
        describe_counter!(API_REQUESTS_TOTAL, "Total API requests");
        describe_histogram!(
            API_REQUEST_DURATION_SECONDS,
            "API request duration in seconds"
        );

        // Database
        describe_counter!(DATABASE_QUERIES_TOTAL, "Total database queries");
        describe_histogram!(
            DATABASE_QUERY_DURATION_SECONDS,
            "Database query duration in seconds"
        );

        // Auth
        describe_counter!(AUTH_ATTEMPTS_TOTAL, "Total authentication attempts");

        // Webhooks
        describe_counter!(WEBHOOK_DELIVERIES_TOTAL, "Total webhook delivery attempts");
        describe_histogram!(
            WEBHOOK_DELIVERY_DURATION_SECONDS,
            "Webhook delivery duration in seconds"
        );
        describe_counter!(
            WEBHOOK_DROPPED_TOTAL,
            "Notifications dropped because the delivery queue was full"
        );

        // Event bus
        describe_counter!(
            EVENT_BUS_EVENTS_TOTAL,
            "Total events published to event bus"
        );

        info!("All Prometheus metrics described");
    });

    let mut handle_lock = PROMETHEUS_HANDLE.write().await;
    *handle_lock = Some(handle.clone());

    info!("Prometheus metrics collection initialized successfully");
    Ok(handle)
}

/// Get the Prometheus metrics handle
pub async fn get_prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.read().await.clone()
}

/// Utility functions for recording API metrics from middleware
pub mod api_metrics {
    use std::time::Duration;

    use super::*;

    /// Record API request metrics
    pub fn record_api_request(method: &str, path: &str, status_code: u16, duration: Duration) {
        let status_class = match status_code {
            200..=299 => "2xx",
            300..=399 => "3xx",
            400..=499 => "4xx",
            500..=599 => "5xx",
            _ => "unknown",
        };

        counter!(
            API_REQUESTS_TOTAL,
            "method" => method.to_string(),
            "endpoint" => path.to_string(),
            "status" => status_class.to_string()
        )
        .increment(1);

        histogram!(
            API_REQUEST_DURATION_SECONDS,
            "method" => method.to_string(),
            "endpoint" => path.to_string()
        )
        .record(duration.as_secs_f64());

        debug!(
            method = %method,
            path = %path,
            status_code = status_code,
            duration_ms = duration.as_millis(),
            "Recorded API request metrics"
        );
    }
}

/// Utility functions for recording webhook metrics
pub mod webhook_metrics {
    use std::time::Duration;

    use super::*;

    /// Record webhook delivery metrics
    pub fn record_webhook_delivery(
        endpoint_id: &str,
        event_type: &str,
        success: bool,
        duration: Duration,
    ) {
        let status = if success { "success" } else { "failure" };

        counter!(
            WEBHOOK_DELIVERIES_TOTAL,
            "endpoint_id" => endpoint_id.to_string(),
            "event_type" => event_type.to_string(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            WEBHOOK_DELIVERY_DURATION_SECONDS,
            "event_type" => event_type.to_string()
        )
        .record(duration.as_secs_f64());
    }

    pub fn record_webhook_dropped(event_type: &str) {
        counter!(WEBHOOK_DROPPED_TOTAL, "event_type" => event_type.to_string()).increment(1);
    }
}

/// Scheduler gauges
pub mod scheduler_metrics {
    use super::*;

    pub fn record_armed_timers(count: usize) {
        gauge!(ARMED_TIMERS).set(count as f64);
    }
}
