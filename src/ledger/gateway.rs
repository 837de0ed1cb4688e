use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, instrument, warn};

use super::{
    ConfirmedTransaction, EventSet, GasEstimate, LedgerClient, RetryConfig, SignedTransaction,
};
use crate::error::SettlementResult;
use crate::events::{EventBus, SubpayEvent};

/// Exponential backoff for reads that race the ledger indexer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay.saturating_mul(1u32 << exponent)
    }
}

/// Ledger access used by the settlement path
pub struct LedgerGateway {
    client: Arc<dyn LedgerClient>,
    policy: RetryPolicy,
    event_bus: Arc<EventBus>,
}

impl std::fmt::Debug for LedgerGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerGateway")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl LedgerGateway {
    pub fn new(client: Arc<dyn LedgerClient>, policy: RetryPolicy, event_bus: Arc<EventBus>) -> Self {
        Self {
            client,
            policy,
            event_bus,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn submit(&self, tx: &SignedTransaction) -> SettlementResult<String> {
        self.client.submit(tx).await
    }

    pub async fn dry_run(&self, tx_bytes: &str) -> SettlementResult<GasEstimate> {
        self.client.dry_run(tx_bytes).await
    }

    /// Query events, retrying only while the transaction is not yet indexed.
    /// Every other error propagates at once; exhausting the attempts
    /// propagates the last `NotYetIndexed`.
    #[instrument(skip(self))]
    pub async fn query_events(&self, digest: &str) -> SettlementResult<EventSet> {
        let mut attempt = 1;
        loop {
            match self.client.query_events(digest).await {
                Ok(events) => {
                    if attempt > 1 {
                        debug!(attempt, "Transaction indexed after retry");
                    }
                    return Ok(events);
                }
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_after(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "Transaction not yet indexed, retrying");

                    self.event_bus
                        .publish(SubpayEvent::LedgerQueryRetried {
                            digest: digest.to_string(),
                            attempt,
                            delay_ms: delay.as_millis() as u64,
                            timestamp: Utc::now(),
                        })
                        .await;

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(attempts = attempt, "Transaction still not indexed, giving up");
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Submit, then wait for the transaction's events to become queryable
    pub async fn submit_and_confirm(
        &self,
        tx: &SignedTransaction,
    ) -> SettlementResult<ConfirmedTransaction> {
        let digest = self.submit(tx).await?;
        let events = self.query_events(&digest).await?;
        Ok(ConfirmedTransaction { digest, events })
    }
}
