use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::timers::TimerRegistry;
use crate::core::clock::Clock;
use crate::error::{SettlementError, SettlementResult};
use crate::events::{EventBus, SubpayEvent};
use crate::ledger::{LedgerConfig, LedgerGateway, SettlementCall, TransactionSigner};
use crate::observability::sanitize_wallet;
use crate::store::{IntentUpdate, SubscriptionStore};
use crate::types::{Merchant, PaymentIntent, Product, Receipt, TransactionDigest, User};
use crate::webhooks::{NotificationPayload, Notifier, ObserverEvent};

/// On-chain coordinates of the settlement calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementSettings {
    pub package_id: String,
    pub registry_id: String,
    /// Type suffix of the payment confirmation event
    pub payment_event: String,
    /// Type suffix of the intent creation event
    pub intent_created_event: String,
}

impl From<&LedgerConfig> for SettlementSettings {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            package_id: config.package_id.clone(),
            registry_id: config.registry_id.clone(),
            payment_event: config.payment_event.clone(),
            intent_created_event: config.intent_created_event.clone(),
        }
    }
}

impl Default for SettlementSettings {
    fn default() -> Self {
        Self::from(&LedgerConfig::default())
    }
}

/// Result handed back to the scheduler after a renewal attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RenewalOutcome {
    Renewed {
        next_payment_due: DateTime<Utc>,
        receipt_id: String,
        digest: String,
    },
    /// The intent has been unsubscribed and removed
    Failed { cause: String },
}

impl RenewalOutcome {
    pub fn is_renewed(&self) -> bool {
        matches!(self, Self::Renewed { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeOutcome {
    /// False when the intent was already gone
    pub existed: bool,
    /// Diagnostic only; store cleanup is authoritative
    pub onchain_unsubscribed: bool,
    pub cleaned_up: bool,
}

/// Records an intent renewal or cleanup needs besides the intent itself
#[derive(Debug, Default)]
struct Parties {
    product: Option<Product>,
    user: Option<User>,
    merchant: Option<Merchant>,
    observers: Vec<String>,
}

/// Marks an intent as being unsubscribed for the lifetime of the guard
struct CleanupGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    intent_id: String,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.intent_id);
    }
}

/// State machine of a subscription: an active intent is either advanced to
/// its next period or removed entirely.
pub struct RenewalEngine {
    store: SubscriptionStore,
    gateway: Arc<LedgerGateway>,
    signer: Arc<dyn TransactionSigner>,
    notifier: Arc<dyn Notifier>,
    timers: Arc<TimerRegistry>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    settings: SettlementSettings,
    cleanups_in_flight: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for RenewalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RenewalEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SubscriptionStore,
        gateway: Arc<LedgerGateway>,
        signer: Arc<dyn TransactionSigner>,
        notifier: Arc<dyn Notifier>,
        timers: Arc<TimerRegistry>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        settings: SettlementSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            signer,
            notifier,
            timers,
            event_bus,
            clock,
            settings,
            cleanups_in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Collect the next period of `intent_id`.
    ///
    /// Fails with `NotActive` when the intent is missing or not active, and
    /// with `Store` when it cannot be read; nothing is charged in either
    /// case. Every later failure is converted into a `payment_failed`
    /// notification plus a full unsubscribe, and reported as
    /// [`RenewalOutcome::Failed`].
    #[instrument(skip(self))]
    pub async fn process_renewal(&self, intent_id: &str) -> SettlementResult<RenewalOutcome> {
        let intent = match self.store.get_intent(intent_id).await? {
            Some(intent) if intent.is_active() => intent,
            _ => return Err(SettlementError::NotActive(intent_id.to_string())),
        };

        let parties = match self.load_parties(&intent).await {
            Ok(parties) => parties,
            Err(e) => return Ok(self.fail(&intent, &Parties::default(), e).await),
        };

        match self.renew(&intent, &parties).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => Ok(self.fail(&intent, &parties, e).await),
        }
    }

    async fn renew(
        &self,
        intent: &PaymentIntent,
        parties: &Parties,
    ) -> SettlementResult<RenewalOutcome> {
        let product = parties
            .product
            .as_ref()
            .ok_or_else(|| SettlementError::not_found("product", &intent.product_id))?;
        let user = parties
            .user
            .as_ref()
            .ok_or_else(|| SettlementError::not_found("user", &intent.user_id))?;
        let merchant = parties
            .merchant
            .as_ref()
            .ok_or_else(|| SettlementError::not_found("merchant", &product.merchant_id))?;
        let invalid_period =
            || SettlementError::invalid_period(&product.id, product.recurring_period_secs);
        // Checked before the charge
        product
            .next_payment_after(self.clock.now())
            .ok_or_else(invalid_period)?;

        debug!(
            payer = %sanitize_wallet(&user.wallet_address),
            payee = %sanitize_wallet(&merchant.wallet_address),
            amount = product.price,
            "Submitting renewal"
        );

        let call = SettlementCall::Renew {
            package_id: self.settings.package_id.clone(),
            registry_id: self.settings.registry_id.clone(),
            intent_id: intent.id.clone(),
            payer_wallet: user.wallet_address.clone(),
            payee_wallet: merchant.wallet_address.clone(),
            amount: product.price,
        };
        let tx = self.signer.sign(&call).await?;
        let confirmed = self.gateway.submit_and_confirm(&tx).await?;

        // The transaction can succeed without settling the payment
        let confirmation = confirmed
            .events
            .find(&self.settings.payment_event)
            .ok_or_else(|| SettlementError::ConfirmationMissing {
                digest: confirmed.digest.clone(),
                event_type: self.settings.payment_event.clone(),
            })?;
        let amount = confirmation.u64_field("amount").unwrap_or(product.price);

        let paid_on = self.clock.now();
        let next_payment_due = product
            .next_payment_after(paid_on)
            .ok_or_else(invalid_period)?;
        self.store
            .update_intent(
                &intent.id,
                &IntentUpdate {
                    last_paid_on: Some(paid_on),
                    next_payment_due: Some(next_payment_due),
                    ..IntentUpdate::default()
                },
            )
            .await?;
        self.store
            .claim_digest(&TransactionDigest {
                digest: confirmed.digest.clone(),
                intent_id: Some(intent.id.clone()),
                created_at: paid_on,
            })
            .await?;

        let receipt = Receipt {
            id: Uuid::new_v4().to_string(),
            product_id: product.id.clone(),
            user_id: user.id.clone(),
            amount,
            intent_id: Some(intent.id.clone()),
            digest: confirmed.digest.clone(),
            created_at: paid_on,
        };
        self.store.create_receipt(&receipt).await?;

        let mut payload = self.payload(ObserverEvent::PaymentSuccess, intent, parties, paid_on);
        payload.amount = amount.to_string();
        self.notifier.notify(
            &parties.observers,
            payload.with_receipt(&receipt.id, &merchant.wallet_address),
        );

        self.event_bus
            .publish(SubpayEvent::RenewalSucceeded {
                intent_id: intent.id.clone(),
                digest: confirmed.digest.clone(),
                amount,
                receipt_id: receipt.id.clone(),
                next_payment_due,
                timestamp: Utc::now(),
            })
            .await;

        info!(
            digest = %confirmed.digest,
            receipt_id = %receipt.id,
            next_payment_due = %next_payment_due,
            "Subscription renewed"
        );

        Ok(RenewalOutcome::Renewed {
            next_payment_due,
            receipt_id: receipt.id,
            digest: confirmed.digest,
        })
    }

    async fn fail(
        &self,
        intent: &PaymentIntent,
        parties: &Parties,
        cause: SettlementError,
    ) -> RenewalOutcome {
        warn!(
            intent_id = %intent.id,
            kind = cause.kind(),
            error = %cause,
            "Renewal failed, unsubscribing"
        );

        self.event_bus
            .publish(SubpayEvent::RenewalFailed {
                intent_id: intent.id.clone(),
                reason: cause.to_string(),
                timestamp: Utc::now(),
            })
            .await;

        // Reported with the last successful payment, not the failed attempt
        self.notifier.notify(
            &parties.observers,
            self.payload(ObserverEvent::PaymentFailed, intent, parties, intent.last_paid_on),
        );

        if let Err(e) = self
            .handle_unsubscribe(&intent.id, true, ObserverEvent::Unsubscribed)
            .await
        {
            error!(intent_id = %intent.id, error = %e, "Cleanup after failed renewal did not complete");
        }

        RenewalOutcome::Failed {
            cause: cause.to_string(),
        }
    }

    /// Unsubscribe `intent_id` and remove it with its digests and timer.
    ///
    /// Idempotent: a missing intent is a no-op success. The on-chain
    /// unsubscribe is best effort and never blocks store cleanup. When
    /// `notify` is set, observers receive `reason` before the intent is
    /// deleted.
    #[instrument(skip(self))]
    pub async fn handle_unsubscribe(
        &self,
        intent_id: &str,
        notify: bool,
        reason: ObserverEvent,
    ) -> SettlementResult<UnsubscribeOutcome> {
        let Some(_guard) = self.begin_cleanup(intent_id) else {
            debug!("Unsubscribe already in progress");
            return Ok(UnsubscribeOutcome::default());
        };

        let Some(intent) = self.store.get_intent(intent_id).await? else {
            self.timers.cancel(intent_id).await;
            debug!("Intent already removed, nothing to unsubscribe");
            return Ok(UnsubscribeOutcome::default());
        };

        let parties = self.load_parties(&intent).await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load intent parties, continuing cleanup");
            Parties::default()
        });

        let onchain_unsubscribed = if intent.is_active() {
            self.unsubscribe_onchain(&intent, &parties).await
        } else {
            false
        };

        if notify {
            self.notifier.notify(
                &parties.observers,
                self.payload(reason, &intent, &parties, intent.last_paid_on),
            );
        }

        self.timers.cancel(intent_id).await;
        let cleaned_up = match self.store.delete_intent(intent_id).await {
            Ok(deleted) => deleted,
            Err(e) => {
                error!(error = ?e, "Failed to delete intent during unsubscribe");
                return Err(SettlementError::Store(e));
            }
        };

        self.event_bus
            .publish(SubpayEvent::IntentUnsubscribed {
                intent_id: intent_id.to_string(),
                reason: reason.to_string(),
                onchain_unsubscribed,
                timestamp: Utc::now(),
            })
            .await;

        info!(reason = %reason, onchain_unsubscribed, "Intent unsubscribed");

        Ok(UnsubscribeOutcome {
            existed: true,
            onchain_unsubscribed,
            cleaned_up,
        })
    }

    async fn unsubscribe_onchain(&self, intent: &PaymentIntent, parties: &Parties) -> bool {
        let Some(user) = &parties.user else {
            warn!(intent_id = %intent.id, "Payer unknown, skipping on-chain unsubscribe");
            return false;
        };

        let call = SettlementCall::Unsubscribe {
            package_id: self.settings.package_id.clone(),
            registry_id: self.settings.registry_id.clone(),
            intent_id: intent.id.clone(),
            payer_wallet: user.wallet_address.clone(),
        };

        let result = async {
            let tx = self.signer.sign(&call).await?;
            self.gateway.submit(&tx).await
        }
        .await;

        match result {
            Ok(digest) => {
                debug!(intent_id = %intent.id, digest = %digest, "On-chain unsubscribe submitted");
                true
            }
            Err(e) => {
                warn!(
                    intent_id = %intent.id,
                    error = %e,
                    "On-chain unsubscribe failed, continuing cleanup"
                );
                false
            }
        }
    }

    fn begin_cleanup(&self, intent_id: &str) -> Option<CleanupGuard<'_>> {
        let mut in_flight = self
            .cleanups_in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(intent_id.to_string()) {
            return None;
        }
        Some(CleanupGuard {
            in_flight: &self.cleanups_in_flight,
            intent_id: intent_id.to_string(),
        })
    }

    async fn load_parties(&self, intent: &PaymentIntent) -> SettlementResult<Parties> {
        let product = self.store.get_product(&intent.product_id).await?;
        let user = self.store.get_user(&intent.user_id).await?;

        let (merchant, observers) = match &product {
            Some(product) => (
                self.store.get_merchant(&product.merchant_id).await?,
                super::observer_ids(&self.store, &product.merchant_id).await,
            ),
            None => (None, Vec::new()),
        };

        Ok(Parties {
            product,
            user,
            merchant,
            observers,
        })
    }

    fn payload(
        &self,
        event: ObserverEvent,
        intent: &PaymentIntent,
        parties: &Parties,
        paid_on: DateTime<Utc>,
    ) -> NotificationPayload {
        NotificationPayload::new(
            event,
            &intent.product_id,
            &intent.user_id,
            parties
                .user
                .as_ref()
                .map(|u| u.wallet_address.clone())
                .unwrap_or_default(),
            parties.product.as_ref().map(|p| p.price).unwrap_or(0),
            paid_on,
        )
        .with_ref_id(intent.ref_id.clone())
        .with_intent(&intent.id)
    }
}
