use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::{middleware, Router};
use tower::ServiceExt;

use crate::observability::correlation::{
    request_id_middleware, CorrelationGuard, RateLimitConfig, RequestContext,
    CORRELATION_ID_HEADER, REQUEST_ID_HEADER,
};

async fn echo_correlation(context: RequestContext) -> String {
    context.correlation_id
}

fn app(config: RateLimitConfig) -> Router {
    let guard = Arc::new(CorrelationGuard::new(config));
    Router::new()
        .route("/test", get(echo_correlation))
        .layer(middleware::from_fn_with_state(guard, request_id_middleware))
}

fn request(correlation_id: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri("/test");
    if let Some(id) = correlation_id {
        builder = builder.header(CORRELATION_ID_HEADER, id);
    }
    builder.body(Body::empty()).expect("valid request")
}

#[tokio::test]
async fn test_correlation_id_is_propagated() {
    let response = app(RateLimitConfig::default())
        .oneshot(request(Some("test-correlation-123")))
        .await
        .expect("router is infallible");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CORRELATION_ID_HEADER).unwrap(),
        "test-correlation-123"
    );
    assert!(response.headers().get(REQUEST_ID_HEADER).is_some());

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"test-correlation-123");
}

#[tokio::test]
async fn test_ids_generated_when_absent() {
    let response = app(RateLimitConfig::default())
        .oneshot(request(None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let correlation = response.headers().get(CORRELATION_ID_HEADER).unwrap();
    let request_id = response.headers().get(REQUEST_ID_HEADER).unwrap();
    assert!(!correlation.is_empty());
    assert_ne!(correlation, request_id);
}

#[tokio::test]
async fn test_invalid_correlation_id_rejected() {
    let response = app(RateLimitConfig::default())
        .oneshot(request(Some("invalid-id-with-@#$%")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let long_id = "a".repeat(201);
    let response = app(RateLimitConfig::default())
        .oneshot(request(Some(&long_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_correlation_id_rate_limited() {
    let config = RateLimitConfig {
        max_requests_per_correlation_id: 2,
        ..RateLimitConfig::default()
    };
    let app = app(config);

    for _ in 0..2 {
        let response = app.clone().oneshot(request(Some("burst"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.clone().oneshot(request(Some("burst"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // Other IDs are unaffected
    let response = app.oneshot(request(Some("other"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
