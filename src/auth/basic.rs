use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use base64::Engine;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::events::{EventBus, SubpayEvent};
use crate::observability::correlation::RequestContext;

pub const USERNAME: &str = "subpayd";

#[derive(Clone)]
pub struct BasicAuth {
    username: String,
    password: String,
    enabled: bool,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl BasicAuth {
    /// Fixed username, optional password; no password disables the check
    pub fn new(password: Option<String>) -> Self {
        Self {
            username: USERNAME.to_string(),
            enabled: password.is_some(),
            password: password.unwrap_or_default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn verify(&self, auth_header: &str) -> bool {
        if !self.enabled {
            return true;
        }

        let Some(credentials) = auth_header.strip_prefix("Basic ") else {
            return false;
        };
        match base64::engine::general_purpose::STANDARD.decode(credentials) {
            Ok(decoded) => {
                let decoded_str = String::from_utf8_lossy(&decoded);
                decoded_str == format!("{}:{}", self.username, self.password)
            }
            Err(_) => false,
        }
    }
}

/// Basic auth middleware; every decision is published as an
/// `authentication_attempt` event
pub async fn basic_auth_middleware(
    auth: Arc<BasicAuth>,
    event_bus: Arc<EventBus>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let remote_addr = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let correlation_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|context| context.correlation_id.clone());

    let publish = |success: bool, reason: Option<&str>| {
        event_bus.publish(SubpayEvent::AuthenticationAttempt {
            ip_address: remote_addr.clone(),
            endpoint: path.clone(),
            success,
            reason: reason.map(str::to_string),
            correlation_id: correlation_id.clone(),
            timestamp: Utc::now(),
        })
    };

    if !auth.enabled {
        debug!(method = %method, path = %path, "Authentication bypassed - auth disabled");
        publish(true, Some("authentication_disabled")).await;
        return next.run(request).await;
    }

    let verdict = match request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
    {
        Some(header) if auth.verify(header) => Ok(()),
        Some(_) => Err("invalid_credentials"),
        None => Err("missing_authorization_header"),
    };

    let failure_reason = match verdict {
        Ok(()) => {
            info!(
                method = %method,
                path = %path,
                remote_addr = %remote_addr,
                auth_result = "success",
                username = %auth.username,
                correlation_id = ?correlation_id,
                "Authentication successful"
            );
            publish(true, None).await;
            return next.run(request).await;
        }
        Err(reason) => reason,
    };

    warn!(
        method = %method,
        path = %path,
        remote_addr = %remote_addr,
        auth_result = "failure",
        failure_reason,
        correlation_id = ?correlation_id,
        "Authentication failed"
    );
    publish(false, Some(failure_reason)).await;

    unauthorized()
}

fn unauthorized() -> Response {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::WWW_AUTHENTICATE, "Basic realm=\"subpayd\"")
        .body(Body::from("Unauthorized"))
        .unwrap_or_else(|_| Response::new(Body::from("Unauthorized")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_for(user: &str, password: &str) -> String {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, password))
        )
    }

    #[test]
    fn test_verify_credentials() {
        let auth = BasicAuth::new(Some("hunter2".to_string()));
        assert!(auth.is_enabled());
        assert!(auth.verify(&header_for("subpayd", "hunter2")));
        assert!(!auth.verify(&header_for("subpayd", "wrong")));
        assert!(!auth.verify(&header_for("admin", "hunter2")));
        assert!(!auth.verify("Bearer token"));
        assert!(!auth.verify("Basic not-base64!!"));
    }

    #[test]
    fn test_disabled_auth_accepts_anything() {
        let auth = BasicAuth::new(None);
        assert!(!auth.is_enabled());
        assert!(auth.verify(""));
    }

    #[test]
    fn test_debug_hides_password() {
        let auth = BasicAuth::new(Some("hunter2".to_string()));
        assert!(!format!("{:?}", auth).contains("hunter2"));
    }
}
