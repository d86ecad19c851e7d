use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::bridge::{
    BridgeClient, FeeEstimate, FulfillmentReceipt, FulfillmentSource, IntentStatus,
    TransferRequest,
};
use super::routes::Route;
use crate::error::AppResult;
use crate::ledger::models::Wei;

#[derive(Serialize)]
struct FeeQuery<'a> {
    source_chain_id: u64,
    destination_chain_id: u64,
    token: &'a str,
    amount: Wei,
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    source_chain_id: u64,
    destination_chain_id: u64,
    #[serde(flatten)]
    request: &'a TransferRequest,
}

#[derive(Deserialize)]
struct Submitted {
    request_id: String,
}

/// Bridge network API client (JSON over HTTP).
///
/// Requests are sent once; nothing here retries, in particular not `submit`.
pub struct HttpBridgeClient {
    client: Client,
    base_url: String,
}

impl HttpBridgeClient {
    pub fn new(base_url: String, request_timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BridgeClient for HttpBridgeClient {
    async fn estimate_fees(&self, route: &Route, amount: Wei) -> AppResult<FeeEstimate> {
        let query = FeeQuery {
            source_chain_id: route.source_chain.chain_id(),
            destination_chain_id: route.destination_chain.chain_id(),
            token: &route.token_symbol,
            amount,
        };

        let estimate = self
            .client
            .post(format!("{}/v1/fees", self.base_url))
            .json(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(estimate)
    }

    async fn submit(&self, request: &TransferRequest) -> AppResult<String> {
        let body = SubmitBody {
            source_chain_id: request.source_chain.chain_id(),
            destination_chain_id: request.destination_chain.chain_id(),
            request,
        };

        let submitted: Submitted = self
            .client
            .post(format!("{}/v1/requests", self.base_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!("Bridge accepted request {}", submitted.request_id);
        Ok(submitted.request_id)
    }

    async fn fetch_status(&self, request_id: &str) -> AppResult<IntentStatus> {
        let status = self
            .client
            .get(format!("{}/v1/requests/{}/status", self.base_url, request_id))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(status)
    }

    async fn fetch_fulfillment(&self, request_id: &str) -> AppResult<FulfillmentReceipt> {
        let receipt = self
            .client
            .get(format!("{}/v1/requests/{}/fulfillment", self.base_url, request_id))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(receipt)
    }
}

#[derive(Deserialize)]
struct DestinationReceipt {
    fulfilled: bool,
}

/// Destination-chain indexer read (`GET {base}/fulfillments/{request_id}`)
pub struct HttpFulfillmentSource {
    client: Client,
    base_url: String,
}

impl HttpFulfillmentSource {
    pub fn new(base_url: String, request_timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl FulfillmentSource for HttpFulfillmentSource {
    fn name(&self) -> &'static str {
        "destination indexer"
    }

    async fn is_fulfilled(&self, request_id: &str) -> AppResult<bool> {
        let receipt: DestinationReceipt = self
            .client
            .get(format!("{}/fulfillments/{}", self.base_url, request_id))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(receipt.fulfilled)
    }
}
