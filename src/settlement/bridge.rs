use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::routes::Route;
use crate::error::AppResult;
use crate::ledger::models::{Chain, Wei};

/// Fee breakdown quoted by the bridge network for one transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub solver_fee: Wei,
    pub network_fee: Wei,
    pub total_fee: Wei,
    /// Amount the recipient receives on the destination chain
    pub transfer_amount: Wei,
    /// Amount the source-chain token approval must cover (transfer plus fees)
    pub approval_amount: Wei,
}

/// A value-transfer intent as submitted to the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub source_chain: Chain,
    pub destination_chain: Chain,
    pub token_symbol: String,
    pub amount: Wei,
    pub recipient: String,
    pub solver_fee: Wei,
}

/// Intent parameters as the bridge reports them back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentParams {
    pub request_id: String,
    pub source_chain: Chain,
    pub destination_chain: Chain,
    pub token_symbol: String,
    pub amount_in: Wei,
    pub amount_out: Wei,
    pub solver_fee: Wei,
    pub recipient: String,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Execution status, verified by the settlement network's signing quorum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentStatus {
    pub executed: bool,
    #[serde(default)]
    pub params: Option<IntentParams>,
}

/// Fulfillment receipt, observed by the solver/relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentReceipt {
    pub fulfilled: bool,
    #[serde(default)]
    pub amount_out: Option<Wei>,
    #[serde(default)]
    pub solver: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub fulfilled_at: Option<DateTime<Utc>>,
}

/// Bridge/settlement network client.
///
/// `submit` moves real funds and is NOT idempotent: implementations must never retry it.
#[async_trait]
pub trait BridgeClient: Send + Sync {
    /// Live fee quote; implementations must not cache
    async fn estimate_fees(&self, route: &Route, amount: Wei) -> AppResult<FeeEstimate>;

    /// Submit an intent, returning the bridge's request id
    async fn submit(&self, request: &TransferRequest) -> AppResult<String>;

    async fn fetch_status(&self, request_id: &str) -> AppResult<IntentStatus>;

    async fn fetch_fulfillment(&self, request_id: &str) -> AppResult<FulfillmentReceipt>;
}

/// Destination-chain-native read of whether an intent has been fulfilled.
///
/// The bridge can lag behind destination state; a `true` here is authoritative.
#[async_trait]
pub trait FulfillmentSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn is_fulfilled(&self, request_id: &str) -> AppResult<bool>;
}
