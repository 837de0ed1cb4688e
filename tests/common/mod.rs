#![allow(clippy::unwrap_used, dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use subpayd::config::Config;
use subpayd::core::clock::ManualClock;
use subpayd::core::CoreOptions;
use subpayd::database::MemoryDatabase;
use subpayd::error::{SettlementError, SettlementResult};
use subpayd::ledger::{
    EventSet, GasEstimate, LedgerClient, LedgerEvent, SettlementCall, SignedTransaction,
    TransactionSigner,
};
use subpayd::types::{Merchant, Product, ProductKind, User};
use subpayd::webhooks::{NotificationPayload, Notifier, WebhookEndpoint};
use subpayd::SubpayCore;

pub const DAY: i64 = 24 * 60 * 60;
pub const PAYMENT_EVENT: &str = "0xpkg::payment::PaymentReceiptEvent";
pub const INTENT_EVENT: &str = "0xpkg::subscription::PaymentIntentCreatedEvent";

pub fn jan(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap()
}

pub fn one_time_events(product_id: &str, amount: u64) -> EventSet {
    EventSet::new(vec![LedgerEvent::new(
        PAYMENT_EVENT,
        json!({"product_id": product_id, "amount": amount.to_string()}),
    )])
}

pub fn subscription_events(
    product_id: &str,
    amount: u64,
    intent_id: &str,
    paid_on: DateTime<Utc>,
) -> EventSet {
    let mut created = LedgerEvent::new(
        INTENT_EVENT,
        json!({"intent_id": intent_id, "product_id": product_id}),
    );
    created.timestamp_ms = Some(paid_on.timestamp_millis().to_string());
    EventSet::new(vec![
        LedgerEvent::new(
            PAYMENT_EVENT,
            json!({"product_id": product_id, "amount": amount.to_string()}),
        ),
        created,
    ])
}

/// Ledger double: digests are handed out in order, events are looked up by
/// digest and default to a renewal confirmation
#[derive(Default)]
pub struct ScriptedLedger {
    submitted: AtomicUsize,
    dry_run_aborts: AtomicBool,
    unindexed_queries: AtomicUsize,
    digests: Mutex<VecDeque<String>>,
    submit_failures: Mutex<VecDeque<String>>,
    events: Mutex<HashMap<String, EventSet>>,
}

impl ScriptedLedger {
    /// Next submission settles as `digest` and emits `events`
    pub fn expect_payment(&self, digest: &str, events: EventSet) {
        self.digests.lock().unwrap().push_back(digest.to_string());
        self.events
            .lock()
            .unwrap()
            .insert(digest.to_string(), events);
    }

    pub fn fail_next_submit(&self, message: &str) {
        self.submit_failures
            .lock()
            .unwrap()
            .push_back(message.to_string());
    }

    /// The next `queries` event lookups report the transaction as not yet
    /// indexed
    pub fn lag_indexing(&self, queries: usize) {
        self.unindexed_queries.store(queries, Ordering::SeqCst);
    }

    pub fn abort_dry_runs(&self) {
        self.dry_run_aborts.store(true, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    async fn submit(&self, _tx: &SignedTransaction) -> SettlementResult<String> {
        let n = self.submitted.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(message) = self.submit_failures.lock().unwrap().pop_front() {
            return Err(SettlementError::Ledger(message));
        }
        Ok(self
            .digests
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| format!("auto-digest-{}", n)))
    }

    async fn query_events(&self, digest: &str) -> SettlementResult<EventSet> {
        let lagging = self
            .unindexed_queries
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lagging {
            return Err(SettlementError::NotYetIndexed {
                digest: digest.to_string(),
            });
        }
        Ok(self
            .events
            .lock()
            .unwrap()
            .get(digest)
            .cloned()
            .unwrap_or_else(|| one_time_events("p-sub", 1_000)))
    }

    async fn dry_run(&self, _tx_bytes: &str) -> SettlementResult<GasEstimate> {
        if self.dry_run_aborts.load(Ordering::SeqCst) {
            return Ok(GasEstimate {
                success: false,
                error: Some("InsufficientGas".to_string()),
                ..GasEstimate::default()
            });
        }
        Ok(GasEstimate {
            success: true,
            computation_cost: 1_000,
            ..GasEstimate::default()
        })
    }
}

#[derive(Default)]
pub struct ScriptedSigner {
    pub calls: Mutex<Vec<SettlementCall>>,
}

#[async_trait]
impl TransactionSigner for ScriptedSigner {
    async fn sign(&self, call: &SettlementCall) -> SettlementResult<SignedTransaction> {
        self.calls.lock().unwrap().push(call.clone());
        Ok(SignedTransaction {
            tx_bytes: format!("{}:{}", call.name(), call.intent_id()),
            signature: "daemon-signature".to_string(),
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(Vec<String>, NotificationPayload)>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<&'static str> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, payload)| payload.event.as_str())
            .collect()
    }

    pub fn payloads(&self) -> Vec<NotificationPayload> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, observer_ids: &[String], payload: NotificationPayload) {
        self.sent
            .lock()
            .unwrap()
            .push((observer_ids.to_vec(), payload));
    }
}

pub struct TestHarness {
    pub core: Arc<SubpayCore>,
    pub ledger: Arc<ScriptedLedger>,
    pub signer: Arc<ScriptedSigner>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
}

impl TestHarness {
    /// Core over an in-memory store seeded with merchant `m1` (observer
    /// `e1`), user `u1`, subscription product `p-sub` (30 days, 1000) and
    /// one-time product `p-once` (500)
    pub async fn new(config: &Config, now: DateTime<Utc>) -> Self {
        let ledger = Arc::new(ScriptedLedger::default());
        let signer = Arc::new(ScriptedSigner::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::new(now));

        let core = SubpayCore::new_with_options(
            config,
            Arc::new(MemoryDatabase::new()),
            ledger.clone(),
            signer.clone(),
            CoreOptions {
                notifier: Some(notifier.clone()),
                clock: Some(clock.clone()),
            },
        )
        .await
        .unwrap();

        let store = &core.store;
        store
            .put_merchant(&Merchant {
                id: "m1".into(),
                wallet_address: "0xmerchant".into(),
            })
            .await
            .unwrap();
        store
            .put_user(&User {
                id: "u1".into(),
                wallet_address: "0xuser".into(),
            })
            .await
            .unwrap();
        store
            .put_product(&Product {
                id: "p-sub".into(),
                merchant_id: "m1".into(),
                name: "Monthly plan".into(),
                price: 1_000,
                kind: ProductKind::Subscription,
                recurring_period_secs: 30 * DAY,
            })
            .await
            .unwrap();
        store
            .put_product(&Product {
                id: "p-once".into(),
                merchant_id: "m1".into(),
                name: "Lifetime pass".into(),
                price: 500,
                kind: ProductKind::OneTime,
                recurring_period_secs: 0,
            })
            .await
            .unwrap();
        store
            .put_webhook_endpoint(
                &WebhookEndpoint::new("e1", "m1", "https://merchant.example/hooks").unwrap(),
            )
            .await
            .unwrap();

        Self {
            core: Arc::new(core),
            ledger,
            signer,
            notifier,
            clock,
        }
    }

    pub async fn with_defaults(now: DateTime<Utc>) -> Self {
        Self::new(&test_config(), now).await
    }
}

/// Default config without a password
pub fn test_config() -> Config {
    Config {
        http_password: None,
        ..Config::default()
    }
}
