use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::state::AppState;
use crate::store::IntentFilter;

/// Store round trips slower than this report the store as degraded
const SLOW_STORE_THRESHOLD: Duration = Duration::from_secs(1);

/// How far past its due time an intent may be before renewals count as stalled
const OVERDUE_GRACE_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthState,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub check_duration_ms: u64,
}

impl ComponentHealth {
    fn new(status: HealthState, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            metadata: None,
            check_duration_ms: 0,
        }
    }

    pub fn healthy(message: impl Into<String>) -> Self {
        Self::new(HealthState::Healthy, message)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(HealthState::Degraded, message)
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(HealthState::Unhealthy, message)
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
    pub checks: BTreeMap<String, ComponentHealth>,
    pub total_check_duration_ms: u64,
}

/// Component report for the daemon; 503 once any component is unhealthy
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, StatusCode> {
    let started = Instant::now();
    let mut checks = BTreeMap::new();

    checks.insert("database".to_string(), timed(check_store(&state)).await);
    checks.insert("scheduler".to_string(), timed(check_scheduler(&state)).await);
    checks.insert("webhooks".to_string(), check_notifier(&state));
    checks.insert("event_bus".to_string(), timed(check_event_bus(&state)).await);

    let status = overall(&checks);
    let total = started.elapsed();

    info!(
        status = ?status,
        duration_ms = total.as_millis() as u64,
        "Health check completed"
    );

    if status == HealthState::Unhealthy {
        warn!(
            failing = ?checks
                .iter()
                .filter(|(_, c)| c.status == HealthState::Unhealthy)
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>(),
            "Health check failed"
        );
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(Json(HealthStatus {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime().as_secs(),
        timestamp: Utc::now(),
        checks,
        total_check_duration_ms: total.as_millis() as u64,
    }))
}

/// Liveness: the process can still reach its store
pub async fn liveness_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    if let Err(e) = state.store().ping().await {
        warn!(error = %e, "Liveness check failed");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok("alive")
}

/// Readiness: the store answers and observer notifications can be queued
pub async fn readiness_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    if check_store(&state).await.status == HealthState::Unhealthy {
        warn!("Readiness check failed, store is unhealthy");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    if !state.core.notifier_alive() {
        warn!("Readiness check failed, webhook worker stopped");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    debug!("Readiness check passed");
    Ok("ready")
}

async fn timed(check: impl Future<Output = ComponentHealth>) -> ComponentHealth {
    let started = Instant::now();
    let mut health = check.await;
    health.check_duration_ms = started.elapsed().as_millis() as u64;
    health
}

async fn check_store(state: &AppState) -> ComponentHealth {
    let started = Instant::now();
    let result = state.store().ping().await;
    let elapsed = started.elapsed();
    let metadata = json!({ "connection_time_ms": elapsed.as_millis() as u64 });

    match result {
        Ok(()) if elapsed > SLOW_STORE_THRESHOLD => ComponentHealth::degraded(format!(
            "Store is responding slowly ({:.2}s)",
            elapsed.as_secs_f64()
        ))
        .with_metadata(metadata),
        Ok(()) => ComponentHealth::healthy("Store is reachable").with_metadata(metadata),
        Err(e) => ComponentHealth::unhealthy(format!("Store is unreachable: {}", e))
            .with_metadata(metadata),
    }
}

/// Compares armed timers with the active intents the store holds and flags
/// intents left unrenewed past their due time
async fn check_scheduler(state: &AppState) -> ComponentHealth {
    let armed = state.core.scheduler.armed_count().await;
    let active = match state.store().find_intents(&IntentFilter::active()).await {
        Ok(active) => active,
        Err(e) => {
            return ComponentHealth::degraded(format!("Could not load active intents: {}", e))
                .with_metadata(json!({ "armed_timers": armed }));
        }
    };

    let cutoff = state.core.clock.now() - chrono::Duration::seconds(OVERDUE_GRACE_SECS);
    let overdue = active
        .iter()
        .filter(|intent| intent.next_payment_due < cutoff)
        .count();
    let metadata = json!({
        "armed_timers": armed,
        "active_intents": active.len(),
        "overdue_intents": overdue,
    });

    if overdue > 0 {
        ComponentHealth::degraded(format!("{} active intents are past due", overdue))
            .with_metadata(metadata)
    } else {
        ComponentHealth::healthy(format!("{} renewal timers armed", armed)).with_metadata(metadata)
    }
}

fn check_notifier(state: &AppState) -> ComponentHealth {
    if state.core.notifier_alive() {
        ComponentHealth::healthy("Webhook worker is accepting notifications")
    } else {
        ComponentHealth::unhealthy("Webhook worker stopped")
    }
}

async fn check_event_bus(state: &AppState) -> ComponentHealth {
    let event_bus = state.event_bus();
    ComponentHealth::healthy("Event bus is running").with_metadata(json!({
        "capacity": event_bus.capacity(),
        "handler_count": event_bus.handler_count().await,
    }))
}

/// Worst component state wins; no components at all is unhealthy
fn overall(checks: &BTreeMap<String, ComponentHealth>) -> HealthState {
    checks
        .values()
        .map(|c| c.status)
        .max()
        .unwrap_or(HealthState::Unhealthy)
}
