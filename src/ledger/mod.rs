//! Narrow request/response contract with the external ledger.
//!
//! [`LedgerClient`] is the raw transport, [`LedgerGateway`] layers the
//! read-after-write retry policy on top of it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SettlementResult;

pub mod gateway;
pub mod rpc;
pub mod signer;

pub use gateway::{LedgerGateway, RetryPolicy};
pub use rpc::RpcLedgerClient;
pub use signer::{RemoteSigner, SettlementCall, SignedTransaction, TransactionSigner};

pub const PAYMENT_EVENT_SUFFIX: &str = "::payment::PaymentReceiptEvent";
pub const INTENT_CREATED_EVENT_SUFFIX: &str = "::subscription::PaymentIntentCreatedEvent";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetryConfig {
    /// Total query attempts, the first one included
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub signer_url: String,
    /// Package holding the payment and subscription modules
    pub package_id: String,
    /// Shared subscription registry object
    pub registry_id: String,
    pub request_timeout_secs: u64,
    /// Type suffix of the payment confirmation event
    pub payment_event: String,
    /// Type suffix of the intent creation event
    pub intent_created_event: String,
    pub retry: RetryConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://fullnode.testnet.sui.io:443".to_string(),
            signer_url: "http://127.0.0.1:7171/sign".to_string(),
            package_id: String::new(),
            registry_id: String::new(),
            request_timeout_secs: 30,
            payment_event: PAYMENT_EVENT_SUFFIX.to_string(),
            intent_created_event: INTENT_CREATED_EVENT_SUFFIX.to_string(),
            retry: RetryConfig::default(),
        }
    }
}

/// Application event emitted by an executed transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEvent {
    /// Fully qualified type, `<package>::<module>::<Name>`
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub parsed_json: Value,
    #[serde(default)]
    pub timestamp_ms: Option<String>,
}

impl LedgerEvent {
    pub fn new(event_type: impl Into<String>, parsed_json: Value) -> Self {
        Self {
            event_type: event_type.into(),
            parsed_json,
            timestamp_ms: None,
        }
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.parsed_json.get(name)?.as_str()
    }

    /// u64 fields arrive string encoded; plain numbers are accepted too
    pub fn u64_field(&self, name: &str) -> Option<u64> {
        match self.parsed_json.get(name)? {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let millis: i64 = self.timestamp_ms.as_deref()?.parse().ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }
}

/// Events of one transaction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventSet(Vec<LedgerEvent>);

impl EventSet {
    pub fn new(events: Vec<LedgerEvent>) -> Self {
        Self(events)
    }

    /// First event whose type contains `suffix`
    pub fn find(&self, suffix: &str) -> Option<&LedgerEvent> {
        self.0.iter().find(|event| event.event_type.contains(suffix))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LedgerEvent> {
        self.0.iter()
    }
}

impl From<Vec<LedgerEvent>> for EventSet {
    fn from(events: Vec<LedgerEvent>) -> Self {
        Self(events)
    }
}

/// Outcome of a simulated execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GasEstimate {
    pub success: bool,
    pub error: Option<String>,
    pub computation_cost: u64,
    pub storage_cost: u64,
    pub storage_rebate: u64,
}

impl GasEstimate {
    pub fn total(&self) -> u64 {
        (self.computation_cost + self.storage_cost).saturating_sub(self.storage_rebate)
    }
}

/// Transaction submitted and its confirmation events indexed
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedTransaction {
    pub digest: String,
    pub events: EventSet,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Execute a signed transaction, returning its digest
    async fn submit(&self, tx: &SignedTransaction) -> SettlementResult<String>;

    /// Fails with `NotYetIndexed` while the transaction is not queryable
    async fn query_events(&self, digest: &str) -> SettlementResult<EventSet>;

    async fn dry_run(&self, tx_bytes: &str) -> SettlementResult<GasEstimate>;
}

#[async_trait]
impl<T: LedgerClient + ?Sized> LedgerClient for Arc<T> {
    async fn submit(&self, tx: &SignedTransaction) -> SettlementResult<String> {
        (**self).submit(tx).await
    }

    async fn query_events(&self, digest: &str) -> SettlementResult<EventSet> {
        (**self).query_events(digest).await
    }

    async fn dry_run(&self, tx_bytes: &str) -> SettlementResult<GasEstimate> {
        (**self).dry_run(tx_bytes).await
    }
}
