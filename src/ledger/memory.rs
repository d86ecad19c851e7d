use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::models::{
    AccountBalance, DebitOutcome, NewEntry, TransactionKind, TransactionRecord, Wei,
};
use super::store::LedgerStore;
use crate::error::{AppResult, LedgerError};

#[derive(Debug)]
struct AccountState {
    balance: Wei,
    updated_at: DateTime<Utc>,
    entries: Vec<TransactionRecord>,
}

impl AccountState {
    fn snapshot(&self, address: &str) -> AccountBalance {
        AccountBalance {
            address: address.to_string(),
            balance_wei: self.balance,
            updated_at: self.updated_at,
        }
    }
}

/// In-process ledger store.
///
/// Each address owns its own async mutex, so mutations on one address are totally
/// ordered while different addresses never contend. The outer map lock is only held
/// long enough to look up (or create) an account slot.
#[derive(Default)]
pub struct MemoryLedgerStore {
    accounts: Mutex<HashMap<String, Arc<tokio::sync::Mutex<AccountState>>>>,
    credited_settlements: Mutex<HashSet<String>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn existing(&self, address: &str) -> Option<Arc<tokio::sync::Mutex<AccountState>>> {
        self.accounts.lock().get(address).cloned()
    }

    fn get_or_create(&self, address: &str) -> Arc<tokio::sync::Mutex<AccountState>> {
        self.accounts
            .lock()
            .entry(address.to_string())
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(AccountState {
                    balance: Wei::ZERO,
                    updated_at: Utc::now(),
                    entries: Vec::new(),
                }))
            })
            .clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn balance(&self, address: &str) -> AppResult<Option<AccountBalance>> {
        match self.existing(address) {
            Some(account) => Ok(Some(account.lock().await.snapshot(address))),
            None => Ok(None),
        }
    }

    async fn credit(&self, entry: NewEntry) -> AppResult<AccountBalance> {
        let account = self.get_or_create(&entry.address);
        let mut state = account.lock().await;

        let new_balance = state.balance.checked_add(entry.amount).ok_or_else(|| {
            LedgerError::AmountOverflow {
                address: entry.address.clone(),
            }
        })?;

        if let Some(settlement_id) = &entry.related_settlement_id {
            let mut credited = self.credited_settlements.lock();
            if !credited.insert(settlement_id.clone()) {
                return Err(LedgerError::SettlementAlreadyCredited {
                    settlement_id: settlement_id.clone(),
                }
                .into());
            }
        }

        let address = entry.address.clone();
        let record = entry.into_record(TransactionKind::Deposit);
        state.balance = new_balance;
        state.updated_at = record.created_at;
        state.entries.push(record);

        Ok(state.snapshot(&address))
    }

    async fn debit(&self, entry: NewEntry) -> AppResult<DebitOutcome> {
        let Some(account) = self.existing(&entry.address) else {
            return Ok(DebitOutcome::InsufficientFunds {
                current_balance: Wei::ZERO,
                required: entry.amount,
            });
        };
        let mut state = account.lock().await;

        let Some(new_balance) = state.balance.checked_sub(entry.amount) else {
            return Ok(DebitOutcome::InsufficientFunds {
                current_balance: state.balance,
                required: entry.amount,
            });
        };

        let record = entry.into_record(TransactionKind::Deduct);
        let transaction_id = record.id;
        state.balance = new_balance;
        state.updated_at = record.created_at;
        state.entries.push(record);

        Ok(DebitOutcome::Debited {
            new_balance,
            transaction_id,
        })
    }

    async fn history(
        &self,
        address: &str,
        limit: Option<usize>,
    ) -> AppResult<Vec<TransactionRecord>> {
        let Some(account) = self.existing(address) else {
            return Ok(Vec::new());
        };
        let state = account.lock().await;

        Ok(state
            .entries
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}
