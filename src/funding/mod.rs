// Credit funding: a cross-chain settlement that ends in a ledger deposit

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::error::{AppError, AppResult, LedgerError, SettlementError};
use crate::ledger::models::{normalize_address, Chain, Wei};
use crate::ledger::Ledger;
use crate::settlement::{FeeEstimate, PollOptions, ResolvedSettlement, SettlementOrchestrator, Signal};

/// What a completed funding run produced
#[derive(Debug, Clone, Serialize)]
pub struct FundingReceipt {
    pub request_id: String,
    pub credited_amount: Wei,
    pub new_balance: Wei,
    pub fees: Option<FeeEstimate>,
    pub signal: Signal,
}

pub struct FundingService {
    orchestrator: Arc<SettlementOrchestrator>,
    ledger: Arc<Ledger>,
    destination_chain: Chain,
    /// Platform wallet on the destination chain that receives the transfer
    recipient: String,
    poll_options: PollOptions,
}

impl FundingService {
    pub fn new(
        orchestrator: Arc<SettlementOrchestrator>,
        ledger: Arc<Ledger>,
        destination_chain: Chain,
        recipient: String,
        poll_options: PollOptions,
    ) -> Self {
        Self {
            orchestrator,
            ledger,
            destination_chain,
            recipient,
            poll_options,
        }
    }

    /// Quote, submit, wait for settlement, then credit `address`.
    ///
    /// The ledger is only touched once the settlement has resolved. A timeout leaves the
    /// intent in flight; pick it up later with `resume`, never by calling this again.
    #[instrument(skip(self, amount), fields(amount = %amount))]
    pub async fn fund_account(
        &self,
        address: &str,
        amount: Wei,
        source_chain: Chain,
        token: &str,
    ) -> AppResult<FundingReceipt> {
        let address = normalize_address(address)?;

        let fees = self
            .orchestrator
            .estimate_fees(source_chain, self.destination_chain, token, amount)
            .await?;

        let request_id = self
            .orchestrator
            .submit(
                source_chain,
                self.destination_chain,
                token,
                amount,
                &self.recipient,
                fees.solver_fee,
            )
            .await?;

        let resolved = self
            .orchestrator
            .poll_until_resolved(&request_id, self.poll_options.clone())
            .await?;

        let credited = resolved.delivered_amount().unwrap_or(fees.transfer_amount);
        self.credit(&address, credited, resolved, Some(fees)).await
    }

    /// Re-poll an intent that was already submitted and credit it once it resolves.
    ///
    /// `expected_amount` is credited only when the bridge reports no delivered amount.
    #[instrument(skip(self, expected_amount))]
    pub async fn resume(
        &self,
        request_id: &str,
        address: &str,
        expected_amount: Wei,
    ) -> AppResult<FundingReceipt> {
        let address = normalize_address(address)?;
        info!("🔄 Resuming settlement {} for {}", request_id, address);

        let resolved = self
            .orchestrator
            .poll_until_resolved(request_id, self.poll_options.clone())
            .await?;

        let credited = match resolved.delivered_amount() {
            Some(amount) => amount,
            None => {
                warn!(
                    "⚠️  Settlement {} reported no delivered amount, crediting expected {}",
                    request_id, expected_amount
                );
                expected_amount
            }
        };
        self.credit(&address, credited, resolved, None).await
    }

    /// A replayed settlement surfaces as `SettlementAlreadyCredited`; any other ledger
    /// failure becomes `CreditFailed` so the caller keeps the request id for `resume`.
    async fn credit(
        &self,
        address: &str,
        amount: Wei,
        resolved: ResolvedSettlement,
        fees: Option<FeeEstimate>,
    ) -> AppResult<FundingReceipt> {
        let new_balance = match self
            .ledger
            .credit(address, amount, &resolved.request_id)
            .await
        {
            Ok(balance) => balance,
            Err(e @ AppError::Ledger(LedgerError::SettlementAlreadyCredited { .. })) => {
                return Err(e)
            }
            Err(e) => {
                error!(
                    "❌ Settlement {} resolved ({:?}) but crediting {} wei to {} failed: {}",
                    resolved.request_id, resolved.signal, amount, address, e
                );
                return Err(SettlementError::CreditFailed {
                    request_id: resolved.request_id,
                    amount,
                    message: e.to_string(),
                }
                .into());
            }
        };

        info!(
            "💰 Funded {} with {} wei via {} ({:?})",
            address, amount, resolved.request_id, resolved.signal
        );

        Ok(FundingReceipt {
            request_id: resolved.request_id,
            credited_amount: amount,
            new_balance,
            fees,
            signal: resolved.signal,
        })
    }
}
