use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{SettlementError, SettlementResult};
use crate::observability::{sanitize_signature, sanitize_tx_bytes};

/// Transaction ready for submission
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    /// Base64 BCS transaction data
    pub tx_bytes: String,
    pub signature: String,
}

impl std::fmt::Debug for SignedTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedTransaction")
            .field("tx_bytes", &sanitize_tx_bytes(&self.tx_bytes))
            .field("signature", &sanitize_signature(&self.signature))
            .finish()
    }
}

/// Settlement calls the daemon issues on its own behalf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum SettlementCall {
    /// Collect the next period of a subscription
    Renew {
        package_id: String,
        registry_id: String,
        intent_id: String,
        payer_wallet: String,
        payee_wallet: String,
        amount: u64,
    },
    /// Close a subscription on-chain
    Unsubscribe {
        package_id: String,
        registry_id: String,
        intent_id: String,
        payer_wallet: String,
    },
}

impl SettlementCall {
    pub fn intent_id(&self) -> &str {
        match self {
            Self::Renew { intent_id, .. } | Self::Unsubscribe { intent_id, .. } => intent_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Renew { .. } => "renew",
            Self::Unsubscribe { .. } => "unsubscribe",
        }
    }
}

/// Builds and signs settlement transactions
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign(&self, call: &SettlementCall) -> SettlementResult<SignedTransaction>;
}

#[async_trait]
impl<T: TransactionSigner + ?Sized> TransactionSigner for Arc<T> {
    async fn sign(&self, call: &SettlementCall) -> SettlementResult<SignedTransaction> {
        (**self).sign(call).await
    }
}

/// Signing service reached over HTTP; keys never enter this process
#[derive(Debug, Clone)]
pub struct RemoteSigner {
    client: Client,
    url: String,
}

impl RemoteSigner {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl TransactionSigner for RemoteSigner {
    #[instrument(skip(self, call), fields(call = call.name(), intent_id = %call.intent_id()))]
    async fn sign(&self, call: &SettlementCall) -> SettlementResult<SignedTransaction> {
        let response = self
            .client
            .post(&self.url)
            .json(call)
            .send()
            .await
            .map_err(|e| SettlementError::Signer(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SettlementError::Signer(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let signed: SignedTransaction = response
            .json()
            .await
            .map_err(|e| SettlementError::Signer(format!("bad response: {}", e)))?;

        debug!("Settlement transaction signed");
        Ok(signed)
    }
}
