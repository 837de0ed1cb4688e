use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use super::{EventSet, GasEstimate, LedgerClient, LedgerEvent, SignedTransaction};
use crate::error::{SettlementError, SettlementResult};

/// Fragment of the RPC error message for a transaction the node has not
/// indexed yet
const NOT_FOUND_MARKER: &str = "could not find";

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ExecutionStatus {
    status: String,
    error: Option<String>,
}

impl ExecutionStatus {
    fn is_success(&self) -> bool {
        self.status == "success"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GasUsed {
    computation_cost: String,
    storage_cost: String,
    storage_rebate: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Effects {
    status: ExecutionStatus,
    gas_used: Option<GasUsed>,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    digest: String,
    effects: Option<Effects>,
}

#[derive(Debug, Deserialize)]
struct DryRunResponse {
    effects: Effects,
}

#[derive(Debug, Deserialize)]
struct EventPage {
    data: Vec<LedgerEvent>,
}

/// JSON-RPC 2.0 client for a Sui full node
#[derive(Debug)]
pub struct RpcLedgerClient {
    client: Client,
    rpc_url: String,
    request_id: AtomicU64,
}

impl RpcLedgerClient {
    pub fn new(rpc_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            rpc_url: rpc_url.into(),
            request_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> SettlementResult<T> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        debug!(method, id, "Ledger RPC call");

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| SettlementError::Ledger(format!("{} request failed: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SettlementError::Ledger(format!(
                "{} returned HTTP {}: {}",
                method, status, body
            )));
        }

        let rpc_response: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| SettlementError::Ledger(format!("{} bad response: {}", method, e)))?;

        if let Some(error) = rpc_response.error {
            return Err(SettlementError::Ledger(format!(
                "{} failed ({}): {}",
                method, error.code, error.message
            )));
        }

        rpc_response
            .result
            .ok_or_else(|| SettlementError::Ledger(format!("{} returned no result", method)))
    }
}

/// Errors reporting an unknown transaction become `NotYetIndexed`
fn classify_query_error(digest: &str, err: SettlementError) -> SettlementError {
    match err {
        SettlementError::Ledger(message) if message.to_lowercase().contains(NOT_FOUND_MARKER) => {
            SettlementError::NotYetIndexed {
                digest: digest.to_string(),
            }
        }
        other => other,
    }
}

fn parse_cost(value: &str, field: &str) -> SettlementResult<u64> {
    value
        .parse()
        .map_err(|_| SettlementError::Ledger(format!("invalid {} {:?}", field, value)))
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    #[instrument(skip(self, tx))]
    async fn submit(&self, tx: &SignedTransaction) -> SettlementResult<String> {
        let response: ExecuteResponse = self
            .call(
                "sui_executeTransactionBlock",
                json!([
                    tx.tx_bytes,
                    [tx.signature],
                    { "showEffects": true },
                    "WaitForLocalExecution"
                ]),
            )
            .await?;

        if let Some(effects) = response.effects {
            if !effects.status.is_success() {
                return Err(SettlementError::Ledger(format!(
                    "transaction {} aborted: {}",
                    response.digest,
                    effects.status.error.unwrap_or_else(|| "unknown error".to_string())
                )));
            }
        }

        Ok(response.digest)
    }

    #[instrument(skip(self))]
    async fn query_events(&self, digest: &str) -> SettlementResult<EventSet> {
        let page: EventPage = self
            .call(
                "suix_queryEvents",
                json!([{ "Transaction": digest }, null, null, false]),
            )
            .await
            .map_err(|e| classify_query_error(digest, e))?;

        Ok(EventSet::new(page.data))
    }

    #[instrument(skip(self, tx_bytes))]
    async fn dry_run(&self, tx_bytes: &str) -> SettlementResult<GasEstimate> {
        let response: DryRunResponse = self
            .call("sui_dryRunTransactionBlock", json!([tx_bytes]))
            .await?;

        let mut estimate = GasEstimate {
            success: response.effects.status.is_success(),
            error: response.effects.status.error,
            ..GasEstimate::default()
        };
        if let Some(gas) = response.effects.gas_used {
            estimate.computation_cost = parse_cost(&gas.computation_cost, "computationCost")?;
            estimate.storage_cost = parse_cost(&gas.storage_cost, "storageCost")?;
            estimate.storage_rebate = parse_cost(&gas.storage_rebate, "storageRebate")?;
        }
        Ok(estimate)
    }
}
