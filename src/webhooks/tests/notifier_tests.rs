#![allow(clippy::unwrap_used)]
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Duration};

use crate::database::MemoryDatabase;
use crate::events::EventBus;
use crate::store::SubscriptionStore;
use crate::webhooks::notifier::{EVENT_ID_HEADER, SIGNATURE_HEADER, USER_AGENT};
use crate::webhooks::*;

const SECRET: &str = "Sup3r-Secret-Key-For-Webhook-Tests";

#[derive(Debug, Clone)]
struct Received {
    headers: HeaderMap,
    body: String,
}

type Inbox = Arc<Mutex<Vec<Received>>>;

async fn record(State(inbox): State<Inbox>, headers: HeaderMap, body: Bytes) -> StatusCode {
    inbox.lock().await.push(Received {
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    });
    StatusCode::OK
}

async fn reject() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

/// Local observer; returns its base URL and inbox
async fn spawn_receiver() -> (String, Inbox) {
    let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/hook", post(record))
        .route("/broken", post(reject))
        .with_state(inbox.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), inbox)
}

async fn wait_for(inbox: &Inbox, count: usize) -> Vec<Received> {
    timeout(Duration::from_secs(5), async {
        loop {
            {
                let received = inbox.lock().await;
                if received.len() >= count {
                    return received.clone();
                }
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("observer did not receive notifications in time")
}

fn local_endpoint(id: &str, url: String) -> WebhookEndpoint {
    WebhookEndpoint {
        id: id.to_string(),
        merchant_id: "m1".to_string(),
        url,
        secret: None,
        events: Vec::new(),
        enabled: true,
        description: None,
    }
}

fn local_config() -> WebhookConfig {
    WebhookConfig {
        allow_private_targets: true,
        timeout_secs: 2,
        ..WebhookConfig::default()
    }
}

fn payload(event: ObserverEvent) -> NotificationPayload {
    NotificationPayload::new(event, "p1", "u1", "0xuser", 1_000, Utc::now())
        .with_ref_id(Some("order-1".to_string()))
}

fn store() -> SubscriptionStore {
    SubscriptionStore::new(Arc::new(MemoryDatabase::new()))
}

#[test]
fn test_webhook_endpoint_event_filtering() {
    let filtered = WebhookEndpoint::new("filtered", "m1", "https://example.com/webhook")
        .unwrap()
        .with_events(vec!["payment_success".to_string()])
        .with_description("Renewals only");

    assert!(filtered.should_receive_event("payment_success"));
    assert!(!filtered.should_receive_event("unsubscribed"));

    let all = WebhookEndpoint::new("all", "m1", "https://example.com/webhook").unwrap();
    assert!(all.should_receive_event("payment_failed"));

    let mut disabled = all.clone();
    disabled.enabled = false;
    assert!(!disabled.should_receive_event("payment_failed"));
}

#[test]
fn test_weak_secret_rejected() {
    let endpoint = WebhookEndpoint::new("e1", "m1", "https://example.com/webhook").unwrap();
    assert!(endpoint.clone().with_secret("short").is_err());
    assert!(endpoint
        .clone()
        .with_secret("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")
        .is_err());
    assert!(endpoint.with_secret(SECRET).is_ok());
}

#[test]
fn test_url_validation_prevents_ssrf() {
    assert!(validate_webhook_url("https://example.com/webhook", false).is_ok());
    assert!(validate_webhook_url("http://192.168.1.1/webhook", false).is_err());
    assert!(validate_webhook_url("http://10.0.0.1/webhook", false).is_err());
    assert!(validate_webhook_url("http://localhost/webhook", false).is_err());
    assert!(validate_webhook_url("http://127.0.0.1/webhook", false).is_err());
    assert!(validate_webhook_url("http://[::1]/webhook", false).is_err());
    assert!(validate_webhook_url("https://example.com:6379/webhook", false).is_err());
    assert!(validate_webhook_url("ftp://example.com/webhook", false).is_err());
    assert!(validate_webhook_url("file:///etc/passwd", false).is_err());

    // Local development opt-in
    assert!(validate_webhook_url("http://127.0.0.1:4000/webhook", true).is_ok());
    assert!(validate_webhook_url("ftp://127.0.0.1/webhook", true).is_err());
}

#[test]
fn test_hmac_signature_calculation() {
    let body = r#"{"event":"payment_success"}"#;
    let signature = calculate_hmac_signature(body, SECRET).unwrap();

    assert!(signature.starts_with("sha256="));
    assert_eq!(signature.len(), 71);
    assert!(verify_hmac_signature(body, &signature, SECRET));
    assert!(!verify_hmac_signature(body, "sha256=invalid", SECRET));
    assert!(!verify_hmac_signature(body, &signature, "wrong-secret"));
    assert!(!verify_hmac_signature("{}", &signature, SECRET));
}

#[test]
fn test_debug_does_not_leak_secrets() {
    let endpoint = WebhookEndpoint::new("e1", "m1", "https://example.com/webhook")
        .unwrap()
        .with_secret(SECRET)
        .unwrap();

    let debug_str = format!("{:?}", endpoint);
    assert!(!debug_str.contains(SECRET));
    assert!(debug_str.contains("[REDACTED]"));
}

#[tokio::test]
async fn test_delivers_signed_payload() {
    let (base, inbox) = spawn_receiver().await;
    let store = store();
    let mut endpoint = local_endpoint("e1", format!("{}/hook", base));
    endpoint.secret = Some(SECRET.to_string());
    store.put_webhook_endpoint(&endpoint).await.unwrap();

    let (notifier, _worker) =
        WebhookNotifier::spawn(local_config(), store, Arc::new(EventBus::new(16))).unwrap();
    notifier.notify(&["e1".to_string()], payload(ObserverEvent::PaymentSuccess));

    let received = wait_for(&inbox, 1).await;
    let request = &received[0];

    assert_eq!(request.headers["user-agent"], USER_AGENT);
    assert!(request.headers.contains_key(EVENT_ID_HEADER.to_lowercase().as_str()));
    let signature = request.headers[SIGNATURE_HEADER.to_lowercase().as_str()]
        .to_str()
        .unwrap();
    assert!(verify_hmac_signature(&request.body, signature, SECRET));

    let json: serde_json::Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(json["event"], "payment_success");
    assert_eq!(json["productId"], "p1");
    assert_eq!(json["ref_id"], "order-1");
    assert_eq!(json["amount"], "1000");
}

#[tokio::test]
async fn test_notifications_delivered_in_enqueue_order() {
    let (base, inbox) = spawn_receiver().await;
    let store = store();
    store
        .put_webhook_endpoint(&local_endpoint("e1", format!("{}/hook", base)))
        .await
        .unwrap();

    let (notifier, _worker) =
        WebhookNotifier::spawn(local_config(), store, Arc::new(EventBus::new(16))).unwrap();
    let observers = vec!["e1".to_string()];
    notifier.notify(&observers, payload(ObserverEvent::PaymentFailed));
    notifier.notify(&observers, payload(ObserverEvent::Unsubscribed));

    let received = wait_for(&inbox, 2).await;
    let events: Vec<String> = received
        .iter()
        .map(|r| {
            let json: serde_json::Value = serde_json::from_str(&r.body).unwrap();
            json["event"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(events, vec!["payment_failed", "unsubscribed"]);
}

#[tokio::test]
async fn test_failed_endpoint_does_not_block_others() {
    let (base, inbox) = spawn_receiver().await;
    let store = store();
    store
        .put_webhook_endpoint(&local_endpoint("broken", format!("{}/broken", base)))
        .await
        .unwrap();
    store
        .put_webhook_endpoint(&local_endpoint("ok", format!("{}/hook", base)))
        .await
        .unwrap();

    let event_bus = Arc::new(EventBus::new(16));
    let mut events = event_bus.subscribe();
    let (notifier, _worker) =
        WebhookNotifier::spawn(local_config(), store, event_bus.clone()).unwrap();

    notifier.notify(
        &["broken".to_string(), "missing".to_string(), "ok".to_string()],
        payload(ObserverEvent::Unsubscribed),
    );

    wait_for(&inbox, 1).await;

    let mut outcomes = Vec::new();
    while outcomes.len() < 2 {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        if let crate::events::SubpayEvent::WebhookDispatched {
            endpoint_id,
            success,
            status_code,
            ..
        } = event
        {
            outcomes.push((endpoint_id, success, status_code));
        }
    }
    outcomes.sort();
    assert_eq!(
        outcomes,
        vec![
            ("broken".to_string(), false, Some(500)),
            ("ok".to_string(), true, Some(200)),
        ]
    );
}

#[tokio::test]
async fn test_event_filter_and_disabled_notifier() {
    let (base, inbox) = spawn_receiver().await;
    let store = store();
    let mut endpoint = local_endpoint("e1", format!("{}/hook", base));
    endpoint.events = vec!["unsubscribed".to_string()];
    store.put_webhook_endpoint(&endpoint).await.unwrap();

    let disabled = WebhookConfig {
        enabled: false,
        ..local_config()
    };
    let (muted, _worker) =
        WebhookNotifier::spawn(disabled, store.clone(), Arc::new(EventBus::new(16))).unwrap();
    muted.notify(&["e1".to_string()], payload(ObserverEvent::Unsubscribed));

    let (notifier, _worker) =
        WebhookNotifier::spawn(local_config(), store, Arc::new(EventBus::new(16))).unwrap();
    let observers = vec!["e1".to_string()];
    notifier.notify(&observers, payload(ObserverEvent::PaymentSuccess));
    notifier.notify(&observers, payload(ObserverEvent::Unsubscribed));

    let received = wait_for(&inbox, 1).await;
    sleep(Duration::from_millis(200)).await;
    let received_after = inbox.lock().await.len();

    assert_eq!(received_after, 1);
    let json: serde_json::Value = serde_json::from_str(&received[0].body).unwrap();
    assert_eq!(json["event"], "unsubscribed");
}

#[tokio::test]
async fn test_notifier_reports_liveness() {
    let (notifier, worker) =
        WebhookNotifier::spawn(local_config(), store(), Arc::new(EventBus::new(16))).unwrap();
    assert!(notifier.is_alive());

    worker.abort();
    let _ = worker.await;
    assert!(!notifier.is_alive());
}
