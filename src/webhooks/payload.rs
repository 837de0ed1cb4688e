use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::types::CURRENCY;

/// Event names delivered to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserverEvent {
    PaymentSuccess,
    PaymentFailed,
    Unsubscribed,
}

impl ObserverEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentSuccess => "payment_success",
            Self::PaymentFailed => "payment_failed",
            Self::Unsubscribed => "unsubscribed",
        }
    }
}

impl fmt::Display for ObserverEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of every observer notification.
///
/// The first eight fields are always present; receipt and merchant wallet
/// accompany `payment_success` only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    #[serde(rename = "productId")]
    pub product_id: String,
    pub ref_id: Option<String>,
    pub event: ObserverEvent,
    /// Base units, string encoded
    pub amount: String,
    #[serde(rename = "paidOn", serialize_with = "serialize_rfc3339")]
    pub paid_on: DateTime<Utc>,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "userWallet")]
    pub user_wallet: String,
    pub currency: &'static str,
    #[serde(rename = "intentId", skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<String>,
    #[serde(rename = "receiptId", skip_serializing_if = "Option::is_none")]
    pub receipt_id: Option<String>,
    #[serde(rename = "merchantWallet", skip_serializing_if = "Option::is_none")]
    pub merchant_wallet: Option<String>,
}

impl NotificationPayload {
    pub fn new(
        event: ObserverEvent,
        product_id: impl Into<String>,
        user_id: impl Into<String>,
        user_wallet: impl Into<String>,
        amount: u64,
        paid_on: DateTime<Utc>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            ref_id: None,
            event,
            amount: amount.to_string(),
            paid_on,
            user_id: user_id.into(),
            user_wallet: user_wallet.into(),
            currency: CURRENCY,
            intent_id: None,
            receipt_id: None,
            merchant_wallet: None,
        }
    }

    pub fn with_ref_id(mut self, ref_id: Option<String>) -> Self {
        self.ref_id = ref_id;
        self
    }

    pub fn with_intent(mut self, intent_id: impl Into<String>) -> Self {
        self.intent_id = Some(intent_id.into());
        self
    }

    pub fn with_receipt(
        mut self,
        receipt_id: impl Into<String>,
        merchant_wallet: impl Into<String>,
    ) -> Self {
        self.receipt_id = Some(receipt_id.into());
        self.merchant_wallet = Some(merchant_wallet.into());
        self
    }
}

fn serialize_rfc3339<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_payload_fixed_fields() {
        let paid_on = Utc.with_ymd_and_hms(2025, 1, 31, 12, 0, 0).unwrap();
        let payload = NotificationPayload::new(
            ObserverEvent::PaymentFailed,
            "p1",
            "u1",
            "0xuser",
            1_500_000_000,
            paid_on,
        )
        .with_ref_id(Some("order-7".to_string()));

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["productId"], "p1");
        assert_eq!(json["ref_id"], "order-7");
        assert_eq!(json["event"], "payment_failed");
        assert_eq!(json["amount"], "1500000000");
        assert_eq!(json["paidOn"], "2025-01-31T12:00:00.000Z");
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["userWallet"], "0xuser");
        assert_eq!(json["currency"], "SUI");
        assert!(json.get("receiptId").is_none());
        assert!(json.get("merchantWallet").is_none());
    }

    #[test]
    fn test_success_payload_carries_receipt() {
        let payload = NotificationPayload::new(
            ObserverEvent::PaymentSuccess,
            "p1",
            "u1",
            "0xuser",
            10,
            Utc::now(),
        )
        .with_receipt("r1", "0xmerchant");

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["receiptId"], "r1");
        assert_eq!(json["merchantWallet"], "0xmerchant");
        // ref_id is always present, null when unknown
        assert!(json["ref_id"].is_null());
    }
}
