use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::core::clock::Clock;
use crate::core::services::{observer_ids, PaymentScheduler, SettlementSettings};
use crate::error::{SettlementError, SettlementResult};
use crate::events::{EventBus, SubpayEvent};
use crate::ledger::{LedgerEvent, LedgerGateway, SignedTransaction};
use crate::observability::correlation::RequestContext;
use crate::store::{IntentUpdate, SubscriptionStore};
use crate::types::{IntentStatus, PaymentIntent, Product, Receipt, TransactionDigest, User};
use crate::webhooks::{NotificationPayload, Notifier, ObserverEvent};

/// Client-signed payment submitted for settlement
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub tx_bytes: String,
    pub signature: String,
    pub user_id: String,
    pub ref_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeResponse {
    pub digest: String,
    pub receipt_id: String,
    pub product_id: String,
    pub amount: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_payment_due: Option<DateTime<Utc>>,
}

/// Settles client payments and registers the subscriptions they create
pub struct PaymentIntake {
    store: SubscriptionStore,
    gateway: Arc<LedgerGateway>,
    scheduler: PaymentScheduler,
    notifier: Arc<dyn Notifier>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    settings: SettlementSettings,
}

impl std::fmt::Debug for PaymentIntake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentIntake")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl PaymentIntake {
    pub fn new(
        store: SubscriptionStore,
        gateway: Arc<LedgerGateway>,
        scheduler: PaymentScheduler,
        notifier: Arc<dyn Notifier>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        settings: SettlementSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            scheduler,
            notifier,
            event_bus,
            clock,
            settings,
        }
    }

    /// Submit the payment, record its receipt and, for subscription
    /// products, register and schedule the intent it created.
    ///
    /// A digest is processed at most once; replays fail with
    /// `DuplicateDigest`. A failure before the receipt is written releases
    /// the digest again, so the client can resubmit the same transaction.
    #[instrument(skip(self, request, context), fields(user_id = %request.user_id))]
    pub async fn process_payment(
        &self,
        request: PaymentRequest,
        context: Option<RequestContext>,
    ) -> SettlementResult<IntakeResponse> {
        let correlation_id = context.map(|c| c.correlation_id);
        validate(&request)?;

        let user = self
            .store
            .get_user(&request.user_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("user", &request.user_id))?;

        let estimate = self.gateway.dry_run(&request.tx_bytes).await?;
        if !estimate.success {
            return Err(SettlementError::InvalidRequest(format!(
                "transaction would abort: {}",
                estimate.error.unwrap_or_else(|| "unknown error".to_string())
            )));
        }

        let digest = self
            .gateway
            .submit(&SignedTransaction {
                tx_bytes: request.tx_bytes,
                signature: request.signature,
            })
            .await?;

        let now = self.clock.now();
        self.store
            .claim_digest(&TransactionDigest {
                digest: digest.clone(),
                intent_id: None,
                created_at: now,
            })
            .await?;

        let Settlement {
            product,
            amount,
            receipt,
            intent,
        } = match self.settle(&digest, &user, now).await {
            Ok(settlement) => settlement,
            Err(e) => {
                // Nothing references the digest yet; free it for a retry
                if let Err(release_error) = self.store.release_digest(&digest).await {
                    error!(error = ?release_error, "Failed to release digest claim");
                }
                return Err(e);
            }
        };
        let intent_id = intent.as_ref().map(|intent| intent.id.clone());

        let mut next_payment_due = None;
        if let Some(pending) = &intent {
            let (intent_id, last_paid_on, due) = (&pending.id, pending.last_paid_on, pending.due);
            let outcome = self
                .store
                .upsert_intent(
                    intent_id,
                    &IntentUpdate {
                        last_paid_on: Some(last_paid_on),
                        next_payment_due: Some(due),
                        status: Some(IntentStatus::Active),
                        ref_id: request.ref_id.clone(),
                    },
                    PaymentIntent {
                        id: intent_id.clone(),
                        user_id: user.id.clone(),
                        product_id: product.id.clone(),
                        last_paid_on,
                        next_payment_due: due,
                        status: IntentStatus::Active,
                        ref_id: request.ref_id.clone(),
                        created_at: now,
                        updated_at: now,
                    },
                )
                .await?;

            if let Some(replaced) = &outcome.replaced {
                self.scheduler.cancel(replaced).await;
                info!(replaced = %replaced, "Previous intent for this subscription replaced");
            }

            self.store.attach_digest(&digest, intent_id).await?;
            self.scheduler.schedule_payment_job(intent_id, due).await?;

            self.event_bus
                .publish(SubpayEvent::IntentCreated {
                    intent_id: intent_id.clone(),
                    product_id: product.id.clone(),
                    user_id: user.id.clone(),
                    next_payment_due: due,
                    correlation_id: correlation_id.clone(),
                    timestamp: Utc::now(),
                })
                .await;
            next_payment_due = Some(due);
        }

        let merchant_wallet = match self.store.get_merchant(&product.merchant_id).await {
            Ok(merchant) => merchant.map(|m| m.wallet_address).unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Failed to load merchant for notification");
                String::new()
            }
        };
        let mut payload = NotificationPayload::new(
            ObserverEvent::PaymentSuccess,
            &product.id,
            &user.id,
            &user.wallet_address,
            amount,
            now,
        )
        .with_ref_id(request.ref_id.clone())
        .with_receipt(&receipt.id, merchant_wallet);
        if let Some(intent_id) = &intent_id {
            payload = payload.with_intent(intent_id);
        }
        let observers = observer_ids(&self.store, &product.merchant_id).await;
        self.notifier.notify(&observers, payload);

        self.event_bus
            .publish(SubpayEvent::PaymentReceived {
                digest: digest.clone(),
                product_id: product.id.clone(),
                user_id: user.id.clone(),
                amount,
                receipt_id: receipt.id.clone(),
                correlation_id,
                timestamp: Utc::now(),
            })
            .await;

        Ok(IntakeResponse {
            digest,
            receipt_id: receipt.id,
            product_id: product.id,
            amount,
            intent_id,
            next_payment_due,
        })
    }

    /// Confirm the settled payment and write its receipt
    async fn settle(
        &self,
        digest: &str,
        user: &User,
        now: DateTime<Utc>,
    ) -> SettlementResult<Settlement> {
        let events = self.gateway.query_events(digest).await?;
        let payment = events.find(&self.settings.payment_event).ok_or_else(|| {
            SettlementError::ConfirmationMissing {
                digest: digest.to_string(),
                event_type: self.settings.payment_event.clone(),
            }
        })?;

        let product_id = required_str(payment, "product_id")?;
        let product = self
            .store
            .get_product(product_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("product", product_id))?;
        let amount = payment.u64_field("amount").unwrap_or(product.price);

        let intent = if product.is_subscription() {
            let event = events.find(&self.settings.intent_created_event).ok_or_else(|| {
                SettlementError::ConfirmationMissing {
                    digest: digest.to_string(),
                    event_type: self.settings.intent_created_event.clone(),
                }
            })?;
            let last_paid_on = event.timestamp().unwrap_or(now);
            let due = product.next_payment_after(last_paid_on).ok_or_else(|| {
                SettlementError::invalid_period(&product.id, product.recurring_period_secs)
            })?;
            Some(PendingIntent {
                id: required_str(event, "intent_id")?.to_string(),
                last_paid_on,
                due,
            })
        } else {
            None
        };

        let receipt = Receipt {
            id: Uuid::new_v4().to_string(),
            product_id: product.id.clone(),
            user_id: user.id.clone(),
            amount,
            intent_id: intent.as_ref().map(|intent| intent.id.clone()),
            digest: digest.to_string(),
            created_at: now,
        };
        self.store.create_receipt(&receipt).await?;

        Ok(Settlement {
            product,
            amount,
            receipt,
            intent,
        })
    }
}

/// Payment whose receipt is recorded
struct Settlement {
    product: Product,
    amount: u64,
    receipt: Receipt,
    intent: Option<PendingIntent>,
}

/// Intent announced by the payment transaction
struct PendingIntent {
    id: String,
    last_paid_on: DateTime<Utc>,
    due: DateTime<Utc>,
}

fn validate(request: &PaymentRequest) -> SettlementResult<()> {
    for (field, value) in [
        ("txBytes", &request.tx_bytes),
        ("signature", &request.signature),
        ("userId", &request.user_id),
    ] {
        if value.trim().is_empty() {
            return Err(SettlementError::InvalidRequest(format!("{} is required", field)));
        }
    }
    Ok(())
}

fn required_str<'a>(event: &'a LedgerEvent, field: &str) -> SettlementResult<&'a str> {
    event.str_field(field).ok_or_else(|| {
        SettlementError::Ledger(format!("{} event has no {} field", event.event_type, field))
    })
}
