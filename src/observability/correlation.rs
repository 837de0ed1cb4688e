use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use serde::{Deserialize, Serialize};
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

pub const CORRELATION_ID_HEADER: &str = "X-Correlation-Id";
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Configuration for correlation ID rate limiting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RateLimitConfig {
    /// Maximum length allowed for correlation IDs
    pub max_correlation_id_length: usize,
    /// Maximum requests per correlation ID per time window
    pub max_requests_per_correlation_id: usize,
    /// Time window for rate limiting in seconds
    pub rate_limit_window_secs: u64,
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_correlation_id_length: 200,
            max_requests_per_correlation_id: 100,
            rate_limit_window_secs: 60,
            enabled: true,
        }
    }
}

impl RateLimitConfig {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    /// Create a permissive config for testing environments
    pub fn permissive() -> Self {
        Self {
            max_correlation_id_length: 500,
            max_requests_per_correlation_id: 10000,
            rate_limit_window_secs: 1,
            enabled: false,
        }
    }
}

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: usize,
    window_start: Instant,
}

/// Validates incoming correlation IDs and limits how often one ID may be
/// reused inside a window.
#[derive(Debug)]
pub struct CorrelationGuard {
    config: RateLimitConfig,
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

impl CorrelationGuard {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn validate(&self, correlation_id: &str) -> Result<(), &'static str> {
        if correlation_id.is_empty() {
            return Err("Correlation ID cannot be empty");
        }

        if correlation_id.len() > self.config.max_correlation_id_length {
            return Err("Correlation ID exceeds maximum length");
        }

        if !correlation_id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err("Correlation ID contains invalid characters");
        }

        Ok(())
    }

    fn check_rate_limit(&self, correlation_id: &str) -> Result<(), &'static str> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut entries = self
            .entries
            .lock()
            .map_err(|_| "Rate limiter unavailable")?;
        let now = Instant::now();
        let window = self.config.rate_limit_window();

        entries.retain(|_, entry| now.duration_since(entry.window_start) < window);

        match entries.get_mut(correlation_id) {
            Some(entry) if entry.count >= self.config.max_requests_per_correlation_id => {
                Err("Rate limit exceeded for correlation ID")
            }
            Some(entry) => {
                entry.count += 1;
                Ok(())
            }
            None => {
                entries.insert(
                    correlation_id.to_string(),
                    RateLimitEntry {
                        count: 1,
                        window_start: now,
                    },
                );
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: String,
    pub request_id: String,
}

impl RequestContext {
    pub fn new(correlation_id: Option<String>) -> Self {
        Self {
            correlation_id: correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            request_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Handlers receive the context installed by [`request_id_middleware`]; a
/// fresh one is minted when the middleware is not mounted.
#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(|| RequestContext::new(None)))
    }
}

/// Mount with `axum::middleware::from_fn_with_state(guard, request_id_middleware)`
pub async fn request_id_middleware(
    State(guard): State<Arc<CorrelationGuard>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let correlation_id = req
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());

    if let Some(id) = &correlation_id {
        if let Err(reason) = guard.validate(id) {
            warn!(correlation_id = %id, reason = %reason, "Invalid correlation ID rejected");
            return Err(StatusCode::BAD_REQUEST);
        }

        if let Err(reason) = guard.check_rate_limit(id) {
            warn!(correlation_id = %id, reason = %reason, "Correlation ID rate limit exceeded");
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }

    let context = RequestContext::new(correlation_id);
    req.extensions_mut().insert(context.clone());

    let span = info_span!(
        "request",
        correlation_id = %context.correlation_id,
        request_id = %context.request_id,
        method = %req.method(),
        uri = %req.uri().path(),
    );

    async move {
        let mut response = next.run(req).await;

        response.headers_mut().insert(
            CORRELATION_ID_HEADER,
            HeaderValue::from_str(&context.correlation_id)
                .unwrap_or_else(|_| HeaderValue::from_static("invalid-correlation-id")),
        );
        response.headers_mut().insert(
            REQUEST_ID_HEADER,
            HeaderValue::from_str(&context.request_id)
                .unwrap_or_else(|_| HeaderValue::from_static("invalid-request-id")),
        );

        Ok(response)
    }
    .instrument(span)
    .await
}
