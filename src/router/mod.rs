//! HTTP surface of the daemon.
//!
//! - `POST /v1/payments`: settle a client-signed payment
//! - `GET /v1/intents/:id`: look up a payment intent
//! - `POST /v1/intents/:id/unsubscribe`: unsubscribe and remove an intent
//! - `/health`, `/health/live`, `/health/ready`, `/metrics`: unauthenticated

use std::future::ready;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::http::Method;
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::handlers::{intents, payments};
use crate::auth::{basic_auth_middleware, BasicAuth};
use crate::config::Config;
use crate::health::{health_check, liveness_check, readiness_check};
use crate::metrics::api_metrics;
use crate::observability::{request_id_middleware, CorrelationGuard};
use crate::state::AppState;

pub fn build_router(state: AppState, config: &Config, metrics_handle: PrometheusHandle) -> Router {
    let basic_auth = Arc::new(BasicAuth::new(config.http_password.clone()));
    let guard = Arc::new(CorrelationGuard::new(config.rate_limiting.clone()));

    let mut v1 = v1_rest().with_state(state.clone());
    if basic_auth.is_enabled() {
        let event_bus = state.event_bus().clone();
        v1 = v1.route_layer(middleware::from_fn(move |request, next| {
            basic_auth_middleware(basic_auth.clone(), event_bus.clone(), request, next)
        }));
    }

    let auth_status = if config.is_auth_enabled() {
        "enabled"
    } else {
        "disabled"
    };
    info!("HTTP API built with authentication {auth_status}");

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any)
        .allow_headers(Any);

    let health = Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness_check))
        .route("/health/ready", get(readiness_check))
        .with_state(state);

    Router::new()
        .nest("/v1", v1)
        .merge(health)
        .route("/metrics", get(move || ready(metrics_handle.render())))
        .layer(middleware::from_fn_with_state(guard, request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .route_layer(middleware::from_fn(track_metrics))
}

fn v1_rest() -> Router<AppState> {
    let intents_router = Router::new()
        .route("/:id", get(intents::handle_get))
        .route("/:id/unsubscribe", post(intents::handle_unsubscribe));

    Router::new()
        .route("/payments", post(payments::handle_rest))
        .nest("/intents", intents_router)
}

async fn track_metrics(req: Request, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };
    let method = req.method().clone();

    let response = next.run(req).await;

    api_metrics::record_api_request(
        method.as_str(),
        &path,
        response.status().as_u16(),
        start.elapsed(),
    );

    response
}
