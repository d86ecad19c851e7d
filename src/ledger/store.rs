use async_trait::async_trait;

use super::models::{AccountBalance, DebitOutcome, NewEntry, TransactionRecord};
use crate::error::AppResult;

/// Durable backing store for balances and the append-only transaction log.
///
/// INVARIANTS every implementation must hold:
/// - `credit` and `debit` are atomic check-then-mutate operations per address,
///   enforced by the store itself (not only by in-process locking)
/// - a balance never goes negative; an oversized debit is rejected, never clamped
/// - a rejected debit writes no transaction record
/// - `related_settlement_id` is unique across all records that carry one
/// - reads never change state
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Current balance row, `None` if the address has never been credited
    async fn balance(&self, address: &str) -> AppResult<Option<AccountBalance>>;

    /// Append a deposit and add it to the balance, creating the account if needed
    async fn credit(&self, entry: NewEntry) -> AppResult<AccountBalance>;

    /// Append a deduction and subtract it, or report the shortfall
    async fn debit(&self, entry: NewEntry) -> AppResult<DebitOutcome>;

    /// Transaction records for an address, newest first
    async fn history(&self, address: &str, limit: Option<usize>)
        -> AppResult<Vec<TransactionRecord>>;
}
