use chrono::{DateTime, Utc};

use crate::types::{IntentStatus, PaymentIntent, Receipt};

/// Predicate over payment intents; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntentFilter {
    pub status: Option<IntentStatus>,
    /// Matches intents whose `next_payment_due` is strictly earlier
    pub due_before: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub product_id: Option<String>,
}

impl IntentFilter {
    pub fn active() -> Self {
        Self {
            status: Some(IntentStatus::Active),
            ..Self::default()
        }
    }

    pub fn due_before(mut self, when: DateTime<Utc>) -> Self {
        self.due_before = Some(when);
        self
    }

    pub fn for_pair(mut self, product_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self.user_id = Some(user_id.into());
        self
    }

    pub fn matches(&self, intent: &PaymentIntent) -> bool {
        self.status.map_or(true, |status| intent.status == status)
            && self
                .due_before
                .map_or(true, |when| intent.next_payment_due < when)
            && self
                .user_id
                .as_ref()
                .map_or(true, |user_id| &intent.user_id == user_id)
            && self
                .product_id
                .as_ref()
                .map_or(true, |product_id| &intent.product_id == product_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiptFilter {
    pub intent_id: Option<String>,
    pub user_id: Option<String>,
    pub digest: Option<String>,
}

impl ReceiptFilter {
    pub fn matches(&self, receipt: &Receipt) -> bool {
        self.intent_id
            .as_ref()
            .map_or(true, |id| receipt.intent_id.as_ref() == Some(id))
            && self
                .user_id
                .as_ref()
                .map_or(true, |id| &receipt.user_id == id)
            && self
                .digest
                .as_ref()
                .map_or(true, |digest| &receipt.digest == digest)
    }
}

/// Partial update applied by [`super::SubscriptionStore::update_intent`]
#[derive(Debug, Clone, Default)]
pub struct IntentUpdate {
    pub last_paid_on: Option<DateTime<Utc>>,
    pub next_payment_due: Option<DateTime<Utc>>,
    pub status: Option<IntentStatus>,
    pub ref_id: Option<String>,
}

impl IntentUpdate {
    pub fn apply(&self, intent: &mut PaymentIntent, now: DateTime<Utc>) {
        if let Some(last_paid_on) = self.last_paid_on {
            intent.last_paid_on = last_paid_on;
        }
        if let Some(next_payment_due) = self.next_payment_due {
            intent.next_payment_due = next_payment_due;
        }
        if let Some(status) = self.status {
            intent.status = status;
        }
        if let Some(ref_id) = &self.ref_id {
            intent.ref_id = Some(ref_id.clone());
        }
        intent.updated_at = now;
    }
}
