use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};

use super::*;
use crate::database::MemoryDatabase;
use crate::types::IntentStatus;

fn store() -> SubscriptionStore {
    SubscriptionStore::new(Arc::new(MemoryDatabase::new()))
}

fn intent(id: &str, product_id: &str, user_id: &str, due_in_days: i64) -> PaymentIntent {
    let paid = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    PaymentIntent {
        id: id.to_string(),
        user_id: user_id.to_string(),
        product_id: product_id.to_string(),
        last_paid_on: paid,
        next_payment_due: paid + Duration::days(due_in_days),
        status: IntentStatus::Active,
        ref_id: None,
        created_at: paid,
        updated_at: paid,
    }
}

fn digest(digest: &str, intent_id: Option<&str>) -> TransactionDigest {
    TransactionDigest {
        digest: digest.to_string(),
        intent_id: intent_id.map(str::to_string),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_create_and_get_intent() {
    let store = store();
    let created = intent("0x1", "p1", "u1", 30);
    store.create_intent(&created).await.unwrap();

    assert_eq!(store.get_intent("0x1").await.unwrap(), Some(created.clone()));
    assert_eq!(
        store.intent_for_pair("p1", "u1").await.unwrap(),
        Some(created)
    );
}

#[tokio::test]
async fn test_one_intent_per_product_user_pair() {
    let store = store();
    store.create_intent(&intent("0x1", "p1", "u1", 30)).await.unwrap();

    let err = store
        .create_intent(&intent("0x2", "p1", "u1", 30))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::Conflict(_)));

    // A different user may subscribe to the same product
    store.create_intent(&intent("0x3", "p1", "u2", 30)).await.unwrap();
}

#[tokio::test]
async fn test_find_intents_filters() {
    let store = store();
    store.create_intent(&intent("0x1", "p1", "u1", 10)).await.unwrap();
    store.create_intent(&intent("0x2", "p1", "u2", 40)).await.unwrap();
    let mut failed = intent("0x3", "p2", "u1", 5);
    failed.status = IntentStatus::Failed;
    store.create_intent(&failed).await.unwrap();

    let active = store.find_intents(&IntentFilter::active()).await.unwrap();
    assert_eq!(active.len(), 2);

    let cutoff = Utc.with_ymd_and_hms(2025, 1, 20, 0, 0, 0).unwrap();
    let overdue = store
        .find_intents(&IntentFilter::active().due_before(cutoff))
        .await
        .unwrap();
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].id, "0x1");

    let pair = store
        .find_intents(&IntentFilter::default().for_pair("p2", "u1"))
        .await
        .unwrap();
    assert_eq!(pair.len(), 1);
    assert_eq!(pair[0].status, IntentStatus::Failed);
}

#[tokio::test]
async fn test_update_missing_intent_is_not_found() {
    let store = store();
    let err = store
        .update_intent("0xmissing", &IntentUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::NotFound { entity: "intent", .. }));
}

/// Applies a queued write right after `key` is read, the way another task's
/// write lands between a read and the write that depends on it
struct WriteAfterRead {
    inner: MemoryDatabase,
    key: Vec<u8>,
    pending: Mutex<Option<BatchOp>>,
}

impl WriteAfterRead {
    fn new(key: Vec<u8>, op: BatchOp) -> Self {
        Self {
            inner: MemoryDatabase::new(),
            key,
            pending: Mutex::new(Some(op)),
        }
    }
}

#[async_trait]
impl DatabaseInterface for WriteAfterRead {
    async fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        let value = self.inner.get(key).await?;
        if key == self.key.as_slice() {
            let pending = self.pending.lock().unwrap().take();
            if let Some(op) = pending {
                self.inner.apply_batch(vec![op]).await?;
            }
        }
        Ok(value)
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
        self.inner.set(key, value).await
    }

    async fn set_if_absent(&self, key: &[u8], value: &[u8]) -> anyhow::Result<bool> {
        self.inner.set_if_absent(key, value).await
    }

    async fn compare_and_swap(
        &self,
        key: &[u8],
        expected: &[u8],
        value: &[u8],
    ) -> anyhow::Result<bool> {
        self.inner.compare_and_swap(key, expected, value).await
    }

    async fn delete(&self, key: &[u8]) -> anyhow::Result<()> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &[u8]) -> anyhow::Result<bool> {
        self.inner.exists(key).await
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.scan_prefix(prefix).await
    }

    async fn apply_batch(&self, batch: Vec<BatchOp>) -> anyhow::Result<()> {
        self.inner.apply_batch(batch).await
    }
}

/// Seeds `0x1` directly so the interleaved write only hits the update
async fn seeded(db: &Arc<WriteAfterRead>) -> SubscriptionStore {
    let seed = serde_json::to_vec(&intent("0x1", "p1", "u1", 30)).unwrap();
    db.inner.set(&keys::intent("0x1"), &seed).await.unwrap();
    SubscriptionStore::new(db.clone())
}

#[tokio::test]
async fn test_update_does_not_resurrect_deleted_intent() {
    let db = Arc::new(WriteAfterRead::new(
        keys::intent("0x1"),
        BatchOp::Delete {
            key: keys::intent("0x1"),
        },
    ));
    let store = seeded(&db).await;

    let update = IntentUpdate {
        last_paid_on: Some(Utc::now()),
        ..IntentUpdate::default()
    };
    let err = store.update_intent("0x1", &update).await.unwrap_err();
    assert!(matches!(err, SettlementError::NotFound { entity: "intent", .. }));
    assert!(store.get_intent("0x1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_applies_over_concurrent_change() {
    let mut failed = intent("0x1", "p1", "u1", 30);
    failed.status = IntentStatus::Failed;
    let db = Arc::new(WriteAfterRead::new(
        keys::intent("0x1"),
        BatchOp::Set {
            key: keys::intent("0x1"),
            value: serde_json::to_vec(&failed).unwrap(),
        },
    ));
    let store = seeded(&db).await;

    let due = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
    let updated = store
        .update_intent(
            "0x1",
            &IntentUpdate {
                next_payment_due: Some(due),
                ..IntentUpdate::default()
            },
        )
        .await
        .unwrap();

    // The concurrent status change is kept, not overwritten
    assert_eq!(updated.status, IntentStatus::Failed);
    assert_eq!(updated.next_payment_due, due);
    assert_eq!(store.get_intent("0x1").await.unwrap(), Some(updated));
}

#[tokio::test]
async fn test_upsert_updates_existing_and_replaces_pair() {
    let store = store();
    store.create_intent(&intent("0x1", "p1", "u1", 30)).await.unwrap();
    store
        .claim_digest(&digest("d-old", Some("0x1")))
        .await
        .unwrap();

    let due = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
    let update = IntentUpdate {
        next_payment_due: Some(due),
        ..IntentUpdate::default()
    };

    // Same id: plain update
    let outcome = store
        .upsert_intent("0x1", &update, intent("0x1", "p1", "u1", 30))
        .await
        .unwrap();
    assert!(!outcome.created);
    assert_eq!(outcome.intent.next_payment_due, due);

    // New on-chain intent for the same pair replaces the old one
    let outcome = store
        .upsert_intent("0x9", &update, intent("0x9", "p1", "u1", 30))
        .await
        .unwrap();
    assert!(outcome.created);
    assert_eq!(outcome.replaced.as_deref(), Some("0x1"));
    assert!(store.get_intent("0x1").await.unwrap().is_none());
    assert!(store.get_digest("d-old").await.unwrap().is_none());
    assert_eq!(
        store.intent_for_pair("p1", "u1").await.unwrap().map(|i| i.id),
        Some("0x9".to_string())
    );
}

#[tokio::test]
async fn test_duplicate_digest_rejected() {
    let store = store();
    store.claim_digest(&digest("d1", None)).await.unwrap();

    let err = store.claim_digest(&digest("d1", None)).await.unwrap_err();
    assert!(matches!(err, SettlementError::DuplicateDigest(ref d) if d == "d1"));
}

#[tokio::test]
async fn test_released_digest_can_be_claimed_again() {
    let store = store();
    store.claim_digest(&digest("d1", None)).await.unwrap();
    store.release_digest("d1").await.unwrap();
    assert!(store.get_digest("d1").await.unwrap().is_none());

    store.claim_digest(&digest("d1", None)).await.unwrap();
    assert!(store.get_digest("d1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_intent_cascades_digests() {
    let store = store();
    store.create_intent(&intent("0x1", "p1", "u1", 30)).await.unwrap();
    store.claim_digest(&digest("d1", None)).await.unwrap();
    store.attach_digest("d1", "0x1").await.unwrap();
    store
        .claim_digest(&digest("d2", Some("0x1")))
        .await
        .unwrap();
    store.claim_digest(&digest("d3", None)).await.unwrap();

    assert_eq!(store.digests_for_intent("0x1").await.unwrap().len(), 2);

    assert!(store.delete_intent("0x1").await.unwrap());
    assert!(store.get_intent("0x1").await.unwrap().is_none());
    assert!(store.get_digest("d1").await.unwrap().is_none());
    assert!(store.get_digest("d2").await.unwrap().is_none());
    assert!(store.digests_for_intent("0x1").await.unwrap().is_empty());
    // Unrelated digest survives
    assert!(store.get_digest("d3").await.unwrap().is_some());
    // Pair is free again
    store.create_intent(&intent("0x2", "p1", "u1", 30)).await.unwrap();

    // Second delete is a no-op
    assert!(!store.delete_intent("0x1").await.unwrap());
}

#[tokio::test]
async fn test_delete_intents_by_filter() {
    let store = store();
    store.create_intent(&intent("0x1", "p1", "u1", 30)).await.unwrap();
    store.create_intent(&intent("0x2", "p2", "u1", 30)).await.unwrap();
    store.create_intent(&intent("0x3", "p1", "u2", 30)).await.unwrap();

    let filter = IntentFilter {
        user_id: Some("u1".to_string()),
        ..IntentFilter::default()
    };
    let mut deleted = store.delete_intents(&filter).await.unwrap();
    deleted.sort();
    assert_eq!(deleted, vec!["0x1".to_string(), "0x2".to_string()]);
    assert_eq!(store.find_intents(&IntentFilter::default()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_receipts_are_immutable() {
    let store = store();
    let receipt = Receipt {
        id: "r1".to_string(),
        product_id: "p1".to_string(),
        user_id: "u1".to_string(),
        amount: 1_000,
        intent_id: Some("0x1".to_string()),
        digest: "d1".to_string(),
        created_at: Utc::now(),
    };
    store.create_receipt(&receipt).await.unwrap();
    assert!(store.create_receipt(&receipt).await.is_err());

    let found = store
        .find_receipts(&ReceiptFilter {
            intent_id: Some("0x1".to_string()),
            ..ReceiptFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(found, vec![receipt]);
}

#[tokio::test]
async fn test_ids_with_separator_rejected() {
    let store = store();
    let err = store
        .create_intent(&intent("bad/id", "p1", "u1", 30))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::InvalidRequest(_)));
}
