#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use super::*;
use crate::core::clock::{Clock, ManualClock};
use crate::database::{BatchOp, DatabaseInterface, MemoryDatabase};
use crate::error::{SettlementError, SettlementResult};
use crate::events::EventBus;
use crate::ledger::{
    EventSet, GasEstimate, LedgerClient, LedgerEvent, LedgerGateway, RetryPolicy, SettlementCall,
    SignedTransaction, TransactionSigner,
};
use crate::store::SubscriptionStore;
use crate::types::{
    IntentStatus, Merchant, PaymentIntent, Product, ProductKind, TransactionDigest, User,
};
use crate::webhooks::{NotificationPayload, Notifier, WebhookEndpoint};

pub(super) const DAY: i64 = 24 * 60 * 60;

pub(super) fn jan(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap()
}

pub(super) fn receipt_events(amount: u64) -> EventSet {
    EventSet::new(vec![LedgerEvent::new(
        "0xpkg::payment::PaymentReceiptEvent",
        json!({"product_id": "p1", "amount": amount.to_string()}),
    )])
}

/// Memory backend whose every call fails while it is offline
#[derive(Default)]
pub(super) struct SwitchableDatabase {
    inner: MemoryDatabase,
    offline: AtomicBool,
}

impl SwitchableDatabase {
    pub(super) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            anyhow::bail!("store offline");
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseInterface for SwitchableDatabase {
    async fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn set_if_absent(&self, key: &[u8], value: &[u8]) -> anyhow::Result<bool> {
        self.check()?;
        self.inner.set_if_absent(key, value).await
    }

    async fn compare_and_swap(
        &self,
        key: &[u8],
        expected: &[u8],
        value: &[u8],
    ) -> anyhow::Result<bool> {
        self.check()?;
        self.inner.compare_and_swap(key, expected, value).await
    }

    async fn delete(&self, key: &[u8]) -> anyhow::Result<()> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &[u8]) -> anyhow::Result<bool> {
        self.check()?;
        self.inner.exists(key).await
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.check()?;
        self.inner.scan_prefix(prefix).await
    }

    async fn apply_batch(&self, batch: Vec<BatchOp>) -> anyhow::Result<()> {
        self.check()?;
        self.inner.apply_batch(batch).await
    }
}

/// Ledger that accepts every submission unless told otherwise
#[derive(Default)]
pub(super) struct ScriptedLedger {
    submitted: AtomicUsize,
    submit_failures: Mutex<VecDeque<SettlementError>>,
    queued_events: Mutex<VecDeque<EventSet>>,
}

impl ScriptedLedger {
    pub(super) fn fail_next_submit(&self, message: &str) {
        self.submit_failures
            .lock()
            .unwrap()
            .push_back(SettlementError::Ledger(message.to_string()));
    }

    pub(super) fn queue_events(&self, events: EventSet) {
        self.queued_events.lock().unwrap().push_back(events);
    }

    pub(super) fn submissions(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    async fn submit(&self, _tx: &SignedTransaction) -> SettlementResult<String> {
        let n = self.submitted.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = self.submit_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(format!("digest-{}", n))
    }

    async fn query_events(&self, _digest: &str) -> SettlementResult<EventSet> {
        let queued = self.queued_events.lock().unwrap().pop_front();
        Ok(queued.unwrap_or_else(|| receipt_events(1_000)))
    }

    async fn dry_run(&self, _tx_bytes: &str) -> SettlementResult<GasEstimate> {
        Ok(GasEstimate {
            success: true,
            ..GasEstimate::default()
        })
    }
}

/// Signs anything; records each call and whether a timer was armed for its
/// intent at signing time
#[derive(Default)]
pub(super) struct RecordingSigner {
    pub(super) calls: Mutex<Vec<(SettlementCall, bool)>>,
    timers: OnceLock<Arc<TimerRegistry>>,
}

impl RecordingSigner {
    pub(super) fn call_names(&self) -> Vec<(&'static str, String)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(call, _)| (call.name(), call.intent_id().to_string()))
            .collect()
    }
}

#[async_trait]
impl TransactionSigner for RecordingSigner {
    async fn sign(&self, call: &SettlementCall) -> SettlementResult<SignedTransaction> {
        let armed = match self.timers.get() {
            Some(timers) => timers.is_armed(call.intent_id()).await,
            None => false,
        };
        self.calls.lock().unwrap().push((call.clone(), armed));
        Ok(SignedTransaction {
            tx_bytes: serde_json::to_string(call).unwrap(),
            signature: "sig".to_string(),
        })
    }
}

#[derive(Default)]
pub(super) struct RecordingNotifier {
    pub(super) sent: Mutex<Vec<(Vec<String>, NotificationPayload)>>,
}

impl RecordingNotifier {
    pub(super) fn events(&self) -> Vec<&'static str> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, payload)| payload.event.as_str())
            .collect()
    }

    pub(super) fn payloads(&self) -> Vec<NotificationPayload> {
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

pub(super) struct Harness {
    pub(super) db: Arc<SwitchableDatabase>,
    pub(super) store: SubscriptionStore,
    pub(super) ledger: Arc<ScriptedLedger>,
    pub(super) signer: Arc<RecordingSigner>,
    pub(super) notifier: Arc<RecordingNotifier>,
    pub(super) clock: Arc<ManualClock>,
    pub(super) timers: Arc<TimerRegistry>,
    pub(super) engine: Arc<RenewalEngine>,
    pub(super) scheduler: PaymentScheduler,
    pub(super) bootstrapper: Bootstrapper,
}

impl Harness {
    /// Product `p1` (30 day period, price 1000) sold by `m1` to `u1`
    pub(super) async fn new(now: DateTime<Utc>) -> Self {
        let db = Arc::new(SwitchableDatabase::default());
        let store = SubscriptionStore::new(db.clone());
        let ledger = Arc::new(ScriptedLedger::default());
        let signer = Arc::new(RecordingSigner::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::new(now));
        let timers = Arc::new(TimerRegistry::new());
        let _ = signer.timers.set(timers.clone());
        let event_bus = Arc::new(EventBus::new(64));

        let gateway = Arc::new(LedgerGateway::new(
            ledger.clone(),
            RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
            },
            event_bus.clone(),
        ));
        let engine = Arc::new(RenewalEngine::new(
            store.clone(),
            gateway,
            signer.clone(),
            notifier.clone(),
            timers.clone(),
            event_bus.clone(),
            clock.clone(),
            SettlementSettings::default(),
        ));
        let scheduler = PaymentScheduler::new(
            store.clone(),
            engine.clone(),
            timers.clone(),
            event_bus,
            clock.clone(),
        );
        let bootstrapper = Bootstrapper::new(
            store.clone(),
            engine.clone(),
            scheduler.clone(),
            clock.clone() as Arc<dyn Clock>,
        );

        store
            .put_product(&Product {
                id: "p1".into(),
                merchant_id: "m1".into(),
                name: "Pro plan".into(),
                price: 1_000,
                kind: ProductKind::Subscription,
                recurring_period_secs: 30 * DAY,
            })
            .await
            .unwrap();
        store
            .put_merchant(&Merchant {
                id: "m1".into(),
                wallet_address: "0xmerchant".into(),
            })
            .await
            .unwrap();
        for user in ["u1", "u2"] {
            store
                .put_user(&User {
                    id: user.into(),
                    wallet_address: format!("0xwallet-{}", user),
                })
                .await
                .unwrap();
        }
        store
            .put_webhook_endpoint(
                &WebhookEndpoint::new("e1", "m1", "https://merchant.example/hooks").unwrap(),
            )
            .await
            .unwrap();

        Self {
            db,
            store,
            ledger,
            signer,
            notifier,
            clock,
            timers,
            engine,
            scheduler,
            bootstrapper,
        }
    }

    /// Replace the billing period of `p1`
    pub(super) async fn set_billing_period(&self, period_secs: i64) {
        let mut product = self.store.get_product("p1").await.unwrap().unwrap();
        product.recurring_period_secs = period_secs;
        self.store.put_product(&product).await.unwrap();
    }

    /// Active intent for `p1` with a digest from its first payment
    pub(super) async fn seed_intent(
        &self,
        id: &str,
        user_id: &str,
        last_paid_on: DateTime<Utc>,
        next_payment_due: DateTime<Utc>,
    ) {
        self.store
            .create_intent(&PaymentIntent {
                id: id.into(),
                user_id: user_id.into(),
                product_id: "p1".into(),
                last_paid_on,
                next_payment_due,
                status: IntentStatus::Active,
                ref_id: Some(format!("ref-{}", id)),
                created_at: last_paid_on,
                updated_at: last_paid_on,
            })
            .await
            .unwrap();
        self.store
            .claim_digest(&TransactionDigest {
                digest: format!("first-{}", id),
                intent_id: Some(id.into()),
                created_at: last_paid_on,
            })
            .await
            .unwrap();
    }
}
