//! Soroban JSON-RPC escrow client.
//!
//! Concrete [`EscrowClient`] implementation speaking JSON-RPC 2.0 to a
//! Soroban-style endpoint.  The sign+submit round trip for write calls
//! lives behind the endpoint; the core sees one atomic success/failure
//! result per call.
//!
//! No automatic retry: transport errors and RPC error objects surface to
//! the caller, and timeouts are enforced by the underlying HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Config;
use crate::errors::{CoreError, Result};
use crate::ports::{
    ApproveRequest, CompleteRequest, EscrowBalance, EscrowClient, EscrowMilestoneSet,
};

pub struct SorobanEscrowClient {
    http: Client,
    rpc_url: String,
}

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct BalancesResult {
    balances: Vec<EscrowBalance>,
}

#[derive(Debug, Deserialize)]
struct MilestonesResult {
    escrows: Vec<EscrowMilestoneSet>,
}

#[derive(Debug, Deserialize)]
struct WriteResult {
    #[serde(default)]
    accepted: bool,
}

impl SorobanEscrowClient {
    pub fn new(rpc_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(SorobanEscrowClient {
            http,
            rpc_url: rpc_url.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.rpc_url.clone(),
            Duration::from_secs(config.rpc_timeout_secs),
        )
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        debug!("RPC {method}");
        let body: RpcEnvelope<T> = self
            .http
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            }))
            .send()
            .await?
            .json()
            .await?;

        if let Some(err) = body.error {
            return Err(CoreError::ChainCall(format!(
                "RPC error {}: {}",
                err.code, err.message
            )));
        }
        body.result
            .ok_or_else(|| CoreError::ChainCall(format!("Empty result from {method}")))
    }
}

#[async_trait]
impl EscrowClient for SorobanEscrowClient {
    async fn get_milestone_flags(&self, escrow_ids: &[String]) -> Result<Vec<EscrowMilestoneSet>> {
        let result: MilestonesResult = self
            .call("getEscrowMilestones", json!({ "contractIds": escrow_ids }))
            .await?;
        Ok(result.escrows)
    }

    async fn get_balances(&self, signer: &str, addresses: &[String]) -> Result<Vec<EscrowBalance>> {
        let result: BalancesResult = self
            .call(
                "getEscrowBalances",
                json!({ "signer": signer, "addresses": addresses }),
            )
            .await?;
        Ok(result.balances)
    }

    async fn approve_milestone(&self, req: ApproveRequest) -> Result<bool> {
        let result: WriteResult = self
            .call("approveMilestone", serde_json::to_value(&req)?)
            .await?;
        Ok(result.accepted)
    }

    async fn complete_milestone(&self, req: CompleteRequest) -> Result<bool> {
        let result: WriteResult = self
            .call("completeMilestone", serde_json::to_value(&req)?)
            .await?;
        Ok(result.accepted)
    }
}
