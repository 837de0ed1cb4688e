// Domain records shared by the store, the engine and the HTTP layer

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Standard result type used throughout the library
pub type SubpayResult<T> = anyhow::Result<T>;

/// Unit name reported to observers alongside every amount
pub const CURRENCY: &str = "SUI";

/// Longest billing period a subscription product may have (100 years)
pub const MAX_RECURRING_PERIOD_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// Subscription state of a payment intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    Active,
    Failed,
}

/// A recorded promise to collect a recurring payment on a schedule.
///
/// The id matches the on-chain object identifier of the intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub id: String,
    pub user_id: String,
    pub product_id: String,
    pub last_paid_on: DateTime<Utc>,
    pub next_payment_due: DateTime<Utc>,
    pub status: IntentStatus,
    pub ref_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    pub fn is_active(&self) -> bool {
        self.status == IntentStatus::Active
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_payment_due <= now
    }
}

/// Append-only link between a ledger transaction and a payment intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDigest {
    pub digest: String,
    pub intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Immutable record of a completed payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub id: String,
    pub product_id: String,
    pub user_id: String,
    pub amount: u64,
    pub intent_id: Option<String>,
    pub digest: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    OneTime,
    Subscription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub merchant_id: String,
    pub name: String,
    /// Price in the ledger's base unit
    pub price: u64,
    pub kind: ProductKind,
    /// Length of one billing period in seconds; zero for one-time products
    pub recurring_period_secs: i64,
}

impl Product {
    pub fn is_subscription(&self) -> bool {
        self.kind == ProductKind::Subscription
    }

    /// Length of one billing period; `None` unless it lies between one
    /// second and [`MAX_RECURRING_PERIOD_SECS`]
    pub fn recurring_period(&self) -> Option<Duration> {
        (1..=MAX_RECURRING_PERIOD_SECS)
            .contains(&self.recurring_period_secs)
            .then(|| Duration::seconds(self.recurring_period_secs))
    }

    /// Due date of the period paid for at `paid_on`
    pub fn next_payment_after(&self, paid_on: DateTime<Utc>) -> Option<DateTime<Utc>> {
        paid_on.checked_add_signed(self.recurring_period()?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub wallet_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Merchant {
    pub id: String,
    pub wallet_address: String,
}
