use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::models::*;
use super::store::LedgerStore;
use crate::error::{AppError, AppResult};

/// Credit ledger - the only way balances change.
///
/// Validates and normalizes input, then delegates the atomic mutation to the store.
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    fn require_positive(amount: Wei) -> AppResult<()> {
        if amount.is_zero() {
            return Err(AppError::InvalidInput(
                "Ledger amounts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    // ========== READS ==========

    /// Balance for an address; an account that was never credited reads as zero
    pub async fn get_balance(&self, address: &str) -> AppResult<Wei> {
        let address = normalize_address(address)?;
        Ok(self
            .store
            .balance(&address)
            .await?
            .map(|b| b.balance_wei)
            .unwrap_or(Wei::ZERO))
    }

    /// Transaction history, newest first
    pub async fn history(
        &self,
        address: &str,
        limit: Option<usize>,
    ) -> AppResult<Vec<TransactionRecord>> {
        let address = normalize_address(address)?;
        self.store.history(&address, limit).await
    }

    // ========== MUTATIONS ==========

    /// Credit a completed settlement.
    ///
    /// A settlement id is credited at most once; a replay fails with
    /// `LedgerError::SettlementAlreadyCredited` and leaves the balance untouched.
    #[instrument(skip(self, amount), fields(amount = %amount))]
    pub async fn credit(&self, address: &str, amount: Wei, settlement_id: &str) -> AppResult<Wei> {
        Self::require_positive(amount)?;
        let address = normalize_address(address)?;

        let balance = self
            .store
            .credit(NewEntry {
                address: address.clone(),
                amount,
                related_file_id: None,
                related_settlement_id: Some(settlement_id.to_string()),
                description: format!("Deposit from settlement {}", settlement_id),
            })
            .await?;

        info!(
            "💰 Credited {} wei to {} (settlement {}), balance now {}",
            amount, address, settlement_id, balance.balance_wei
        );
        Ok(balance.balance_wei)
    }

    /// Atomically check and deduct.
    ///
    /// Returns `DebitOutcome::InsufficientFunds` instead of an error when the balance is
    /// too low; in that case nothing is written.
    #[instrument(skip(self, amount, description), fields(amount = %amount))]
    pub async fn debit(
        &self,
        address: &str,
        amount: Wei,
        file_id: Uuid,
        description: &str,
    ) -> AppResult<DebitOutcome> {
        Self::require_positive(amount)?;
        let address = normalize_address(address)?;

        let outcome = self
            .store
            .debit(NewEntry {
                address: address.clone(),
                amount,
                related_file_id: Some(file_id),
                related_settlement_id: None,
                description: description.to_string(),
            })
            .await?;

        match &outcome {
            DebitOutcome::Debited { new_balance, .. } => info!(
                "💸 Debited {} wei from {} for file {}, balance now {}",
                amount, address, file_id, new_balance
            ),
            DebitOutcome::InsufficientFunds {
                current_balance,
                required,
            } => warn!(
                "⚠️  Insufficient funds for {}: balance {}, required {}",
                address, current_balance, required
            ),
        }

        Ok(outcome)
    }

    /// Compensating deposit for a file that was paid for but never stored
    #[instrument(skip(self, amount, description), fields(amount = %amount))]
    pub async fn refund(
        &self,
        address: &str,
        amount: Wei,
        file_id: Uuid,
        description: &str,
    ) -> AppResult<Wei> {
        Self::require_positive(amount)?;
        let address = normalize_address(address)?;

        let balance = self
            .store
            .credit(NewEntry {
                address: address.clone(),
                amount,
                related_file_id: Some(file_id),
                related_settlement_id: None,
                description: description.to_string(),
            })
            .await?;

        info!(
            "↩️  Refunded {} wei to {} for file {}, balance now {}",
            amount, address, file_id, balance.balance_wei
        );
        Ok(balance.balance_wei)
    }
}
