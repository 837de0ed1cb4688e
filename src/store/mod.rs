//! Durable records of the settlement engine.
//!
//! Entities are stored as JSON values in a [`DatabaseInterface`]; the store is
//! the single source of truth for intent state, the scheduler only caches it.

use anyhow::Context;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::database::{BatchOp, DatabaseInterface, SharedDatabase};
use crate::error::{SettlementError, SettlementResult};
use crate::types::{Merchant, PaymentIntent, Product, Receipt, TransactionDigest, User};
use crate::webhooks::WebhookEndpoint;

mod filter;
pub mod keys;

pub use filter::{IntentFilter, IntentUpdate, ReceiptFilter};

/// Attempts of one intent update before giving up on concurrent writers
const UPDATE_ATTEMPTS: usize = 3;

/// Result of [`SubscriptionStore::upsert_intent`]
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub intent: PaymentIntent,
    pub created: bool,
    /// Previous intent for the same (product, user) pair that was removed
    pub replaced: Option<String>,
}

#[derive(Clone)]
pub struct SubscriptionStore {
    db: SharedDatabase,
}

impl std::fmt::Debug for SubscriptionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionStore").finish_non_exhaustive()
    }
}

impl SubscriptionStore {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    async fn read<T: DeserializeOwned>(&self, key: &[u8]) -> anyhow::Result<Option<T>> {
        match self.db.get(key).await? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes).with_context(|| {
                    format!("Corrupt record at {}", String::from_utf8_lossy(key))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn write<T: Serialize>(&self, key: &[u8], value: &T) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.set(key, &bytes).await
    }

    async fn scan<T: DeserializeOwned>(&self, prefix: &str) -> anyhow::Result<Vec<T>> {
        let mut values = Vec::new();
        for (key, bytes) in self.db.scan_prefix(prefix.as_bytes()).await? {
            match serde_json::from_slice(&bytes) {
                Ok(value) => values.push(value),
                Err(e) => warn!(
                    key = %String::from_utf8_lossy(&key),
                    error = %e,
                    "Skipping corrupt record"
                ),
            }
        }
        Ok(values)
    }

    fn check_id(entity: &'static str, id: &str) -> SettlementResult<()> {
        if keys::is_valid_id(id) {
            Ok(())
        } else {
            Err(SettlementError::InvalidRequest(format!(
                "invalid {} id: {:?}",
                entity, id
            )))
        }
    }

    /// Round-trip through the backend, used by readiness checks
    pub async fn ping(&self) -> anyhow::Result<()> {
        self.db.exists(b"ping").await.map(|_| ())
    }

    // Reference entities

    pub async fn put_product(&self, product: &Product) -> SettlementResult<()> {
        Self::check_id("product", &product.id)?;
        Ok(self.write(&keys::product(&product.id), product).await?)
    }

    pub async fn get_product(&self, id: &str) -> anyhow::Result<Option<Product>> {
        self.read(&keys::product(id)).await
    }

    pub async fn put_user(&self, user: &User) -> SettlementResult<()> {
        Self::check_id("user", &user.id)?;
        Ok(self.write(&keys::user(&user.id), user).await?)
    }

    pub async fn get_user(&self, id: &str) -> anyhow::Result<Option<User>> {
        self.read(&keys::user(id)).await
    }

    pub async fn put_merchant(&self, merchant: &Merchant) -> SettlementResult<()> {
        Self::check_id("merchant", &merchant.id)?;
        Ok(self.write(&keys::merchant(&merchant.id), merchant).await?)
    }

    pub async fn get_merchant(&self, id: &str) -> anyhow::Result<Option<Merchant>> {
        self.read(&keys::merchant(id)).await
    }

    pub async fn put_webhook_endpoint(&self, endpoint: &WebhookEndpoint) -> SettlementResult<()> {
        Self::check_id("webhook", &endpoint.id)?;
        Ok(self.write(&keys::webhook(&endpoint.id), endpoint).await?)
    }

    pub async fn get_webhook_endpoint(&self, id: &str) -> anyhow::Result<Option<WebhookEndpoint>> {
        self.read(&keys::webhook(id)).await
    }

    pub async fn webhook_endpoints_for_merchant(
        &self,
        merchant_id: &str,
    ) -> anyhow::Result<Vec<WebhookEndpoint>> {
        let endpoints: Vec<WebhookEndpoint> = self.scan(keys::WEBHOOK).await?;
        Ok(endpoints
            .into_iter()
            .filter(|endpoint| endpoint.merchant_id == merchant_id)
            .collect())
    }

    // Payment intents

    pub async fn get_intent(&self, id: &str) -> anyhow::Result<Option<PaymentIntent>> {
        self.read(&keys::intent(id)).await
    }

    pub async fn find_intents(&self, filter: &IntentFilter) -> anyhow::Result<Vec<PaymentIntent>> {
        let intents: Vec<PaymentIntent> = self.scan(keys::INTENT).await?;
        Ok(intents
            .into_iter()
            .filter(|intent| filter.matches(intent))
            .collect())
    }

    /// Intent currently registered for the (product, user) pair
    pub async fn intent_for_pair(
        &self,
        product_id: &str,
        user_id: &str,
    ) -> anyhow::Result<Option<PaymentIntent>> {
        let Some(bytes) = self.db.get(&keys::intent_pair(product_id, user_id)).await? else {
            return Ok(None);
        };
        let id = String::from_utf8(bytes).context("Corrupt intent pair index")?;
        self.get_intent(&id).await
    }

    /// Fails with `Conflict` when the id or the (product, user) pair is
    /// already taken
    #[instrument(skip(self, intent), fields(intent_id = %intent.id))]
    pub async fn create_intent(&self, intent: &PaymentIntent) -> SettlementResult<()> {
        Self::check_id("intent", &intent.id)?;

        let pair_key = keys::intent_pair(&intent.product_id, &intent.user_id);
        if !self
            .db
            .set_if_absent(&pair_key, intent.id.as_bytes())
            .await?
        {
            return Err(SettlementError::Conflict(format!(
                "an intent already exists for product {} and user {}",
                intent.product_id, intent.user_id
            )));
        }

        let bytes = serde_json::to_vec(intent).map_err(anyhow::Error::from)?;
        if !self.db.set_if_absent(&keys::intent(&intent.id), &bytes).await? {
            self.db.delete(&pair_key).await?;
            return Err(SettlementError::Conflict(format!(
                "intent {} already exists",
                intent.id
            )));
        }

        debug!("Payment intent created");
        Ok(())
    }

    /// Apply `update` over the stored intent.
    ///
    /// The write only lands over the exact record that was read, so an intent
    /// deleted in the meantime stays deleted and the update fails with
    /// `NotFound`.
    #[instrument(skip(self, update))]
    pub async fn update_intent(
        &self,
        id: &str,
        update: &IntentUpdate,
    ) -> SettlementResult<PaymentIntent> {
        let key = keys::intent(id);
        for _ in 0..UPDATE_ATTEMPTS {
            let Some(current) = self.db.get(&key).await? else {
                return Err(SettlementError::not_found("intent", id));
            };
            let mut intent: PaymentIntent = serde_json::from_slice(&current)
                .with_context(|| format!("Corrupt record at {}", String::from_utf8_lossy(&key)))?;

            update.apply(&mut intent, Utc::now());
            let bytes = serde_json::to_vec(&intent).map_err(anyhow::Error::from)?;
            if self.db.compare_and_swap(&key, &current, &bytes).await? {
                return Ok(intent);
            }
            debug!("Intent changed while updating, retrying");
        }

        Err(SettlementError::Conflict(format!(
            "intent {} changed during every update attempt",
            id
        )))
    }

    /// Update the intent `id` when it exists, otherwise create `create`.
    ///
    /// A different intent already registered for the same (product, user)
    /// pair is deleted together with its digests.
    #[instrument(skip(self, update, create))]
    pub async fn upsert_intent(
        &self,
        id: &str,
        update: &IntentUpdate,
        create: PaymentIntent,
    ) -> SettlementResult<UpsertOutcome> {
        Self::check_id("intent", id)?;

        if self.get_intent(id).await?.is_some() {
            let intent = self.update_intent(id, update).await?;
            return Ok(UpsertOutcome {
                intent,
                created: false,
                replaced: None,
            });
        }

        let replaced = match self
            .intent_for_pair(&create.product_id, &create.user_id)
            .await?
        {
            Some(previous) if previous.id != id => {
                self.delete_intent(&previous.id).await?;
                Some(previous.id)
            }
            _ => None,
        };

        self.create_intent(&create).await?;
        Ok(UpsertOutcome {
            intent: create,
            created: true,
            replaced,
        })
    }

    /// Delete an intent with its digests and pair index in one batch.
    /// Returns false when the intent did not exist.
    #[instrument(skip(self))]
    pub async fn delete_intent(&self, id: &str) -> anyhow::Result<bool> {
        let Some(intent) = self.get_intent(id).await? else {
            return Ok(false);
        };

        let mut batch = self.digest_cleanup_ops(id).await?;
        batch.push(BatchOp::Delete {
            key: keys::intent(id),
        });

        let pair_key = keys::intent_pair(&intent.product_id, &intent.user_id);
        if self.db.get(&pair_key).await?.as_deref() == Some(id.as_bytes()) {
            batch.push(BatchOp::Delete { key: pair_key });
        }

        self.db.apply_batch(batch).await?;
        debug!("Payment intent deleted");
        Ok(true)
    }

    /// Returns the ids of the deleted intents
    pub async fn delete_intents(&self, filter: &IntentFilter) -> anyhow::Result<Vec<String>> {
        let mut deleted = Vec::new();
        for intent in self.find_intents(filter).await? {
            if self.delete_intent(&intent.id).await? {
                deleted.push(intent.id);
            }
        }
        Ok(deleted)
    }

    // Transaction digests

    /// Record a digest the first time it is seen.
    ///
    /// Fails with `DuplicateDigest` when the digest was already recorded, so
    /// at most one caller ever proceeds with a given transaction.
    #[instrument(skip(self, record), fields(digest = %record.digest))]
    pub async fn claim_digest(&self, record: &TransactionDigest) -> SettlementResult<()> {
        let bytes = serde_json::to_vec(record).map_err(anyhow::Error::from)?;
        if !self
            .db
            .set_if_absent(&keys::digest(&record.digest), &bytes)
            .await?
        {
            return Err(SettlementError::DuplicateDigest(record.digest.clone()));
        }

        if let Some(intent_id) = &record.intent_id {
            self.db
                .set(&keys::intent_digest(intent_id, &record.digest), b"")
                .await?;
        }
        Ok(())
    }

    /// Drop a claim nothing has been recorded under yet
    pub async fn release_digest(&self, digest: &str) -> anyhow::Result<()> {
        self.db.delete(&keys::digest(digest)).await
    }

    /// Link an already claimed digest to an intent
    pub async fn attach_digest(&self, digest: &str, intent_id: &str) -> SettlementResult<()> {
        let mut record: TransactionDigest = self
            .read(&keys::digest(digest))
            .await?
            .ok_or_else(|| SettlementError::not_found("digest", digest))?;
        record.intent_id = Some(intent_id.to_string());

        let bytes = serde_json::to_vec(&record).map_err(anyhow::Error::from)?;
        self.db
            .apply_batch(vec![
                BatchOp::Set {
                    key: keys::digest(digest),
                    value: bytes,
                },
                BatchOp::Set {
                    key: keys::intent_digest(intent_id, digest),
                    value: Vec::new(),
                },
            ])
            .await?;
        Ok(())
    }

    pub async fn get_digest(&self, digest: &str) -> anyhow::Result<Option<TransactionDigest>> {
        self.read(&keys::digest(digest)).await
    }

    pub async fn digests_for_intent(
        &self,
        intent_id: &str,
    ) -> anyhow::Result<Vec<TransactionDigest>> {
        let mut records = Vec::new();
        for digest in self.indexed_digests(intent_id).await? {
            if let Some(record) = self.get_digest(&digest).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn indexed_digests(&self, intent_id: &str) -> anyhow::Result<Vec<String>> {
        let prefix = keys::intent_digest_prefix(intent_id);
        Ok(self
            .db
            .scan_prefix(&prefix)
            .await?
            .into_iter()
            .map(|(key, _)| String::from_utf8_lossy(&key[prefix.len()..]).into_owned())
            .collect())
    }

    async fn digest_cleanup_ops(&self, intent_id: &str) -> anyhow::Result<Vec<BatchOp>> {
        Ok(self
            .indexed_digests(intent_id)
            .await?
            .into_iter()
            .flat_map(|digest| {
                [
                    BatchOp::Delete {
                        key: keys::digest(&digest),
                    },
                    BatchOp::Delete {
                        key: keys::intent_digest(intent_id, &digest),
                    },
                ]
            })
            .collect())
    }

    // Receipts

    pub async fn create_receipt(&self, receipt: &Receipt) -> SettlementResult<()> {
        let bytes = serde_json::to_vec(receipt).map_err(anyhow::Error::from)?;
        if !self
            .db
            .set_if_absent(&keys::receipt(&receipt.id), &bytes)
            .await?
        {
            return Err(SettlementError::Conflict(format!(
                "receipt {} already exists",
                receipt.id
            )));
        }
        Ok(())
    }

    pub async fn get_receipt(&self, id: &str) -> anyhow::Result<Option<Receipt>> {
        self.read(&keys::receipt(id)).await
    }

    pub async fn find_receipts(&self, filter: &ReceiptFilter) -> anyhow::Result<Vec<Receipt>> {
        let receipts: Vec<Receipt> = self.scan(keys::RECEIPT).await?;
        Ok(receipts
            .into_iter()
            .filter(|receipt| filter.matches(receipt))
            .collect())
    }
}

#[cfg(test)]
mod tests;
