//! Error types.
//!
//! [`SettlementError`] is what the engine returns; [`AppError`] is what the
//! HTTP surface renders. Handlers convert with `AppError::from(err)` and
//! attach the [`RequestContext`] so the body carries correlation ids.

use std::fmt;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

pub mod categories;
pub mod settlement;

pub use categories::ErrorCategory;
pub use settlement::{SettlementError, SettlementResult};

use crate::observability::correlation::RequestContext;

#[cfg(test)]
#[path = "../error_tests.rs"]
mod tests;

/// Seconds a client should wait before retrying a not-yet-indexed lookup
const LEDGER_RETRY_AFTER_SECS: u64 = 2;

#[derive(Debug)]
pub struct AppError {
    pub category: ErrorCategory,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub request_context: Option<RequestContext>,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorBody<'a>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'static str,
    message: &'a str,
    details: Option<&'a serde_json::Value>,
    correlation_id: Option<&'a str>,
    request_id: Option<&'a str>,
}

impl AppError {
    pub fn with_category(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            details: None,
            source: None,
            request_context: None,
        }
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::with_category(ErrorCategory::ValidationError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_category(ErrorCategory::NotFound, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::with_category(ErrorCategory::InternalError, message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.request_context = Some(context);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.category.status_code()
    }

    /// Whether the same request may succeed once the ledger catches up
    pub fn is_retryable(&self) -> bool {
        self.category == ErrorCategory::LedgerNotIndexed
    }

    fn correlation_id(&self) -> Option<&str> {
        self.request_context
            .as_ref()
            .map(|c| c.correlation_id.as_str())
    }

    fn request_id(&self) -> Option<&str> {
        self.request_context.as_ref().map(|c| c.request_id.as_str())
    }

    fn log(&self) {
        let code = self.category.error_code();
        if self.category.is_server_error() {
            error!(
                code,
                message = %self.message,
                details = ?self.details,
                source = ?self.source,
                correlation_id = self.correlation_id(),
                request_id = self.request_id(),
                "Request failed"
            );
        } else {
            warn!(
                code,
                message = %self.message,
                correlation_id = self.correlation_id(),
                request_id = self.request_id(),
                "Request rejected"
            );
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();

        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.category.error_code(),
                message: &self.message,
                details: self.details.as_ref(),
                correlation_id: self.correlation_id(),
                request_id: self.request_id(),
            },
        };
        let mut response = (self.status(), Json(body)).into_response();

        if self.is_retryable() {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(LEDGER_RETRY_AFTER_SECS),
            );
        }
        response
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<SettlementError>() {
            Ok(settlement) => settlement.into(),
            Err(other) => Self::internal_error(other.to_string()),
        }
    }
}
