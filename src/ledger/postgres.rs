use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::models::{
    AccountBalance, DebitOutcome, NewEntry, TransactionKind, TransactionRecord, Wei,
};
use super::store::LedgerStore;
use crate::error::{AppResult, LedgerError};

/// Postgres ledger store - THE source of truth when running more than one instance.
///
/// Atomicity comes from the database, not from process-local locks:
/// a debit is a conditional `UPDATE ... WHERE balance_wei >= amount` and the ledger row
/// is written in the same transaction. `CHECK (balance_wei >= 0)` backs it up.
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_record(
        tx: &mut Transaction<'_, Postgres>,
        record: &TransactionRecord,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO ledger_transactions (
                id, address, kind, amount_wei, related_file_id,
                related_settlement_id, description, created_at
            )
            VALUES ($1, $2, $3, CAST($4 AS NUMERIC), $5, $6, $7, $8)
            ON CONFLICT (related_settlement_id) WHERE related_settlement_id IS NOT NULL
            DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(&record.address)
        .bind(record.kind)
        .bind(record.amount_wei.to_string())
        .bind(record.related_file_id)
        .bind(&record.related_settlement_id)
        .bind(&record.description)
        .bind(record.created_at)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    fn parse_balance(address: &str, raw: &str) -> AppResult<Wei> {
        Wei::parse_decimal(raw).map_err(|_| {
            LedgerError::AmountOverflow {
                address: address.to_string(),
            }
            .into()
        })
    }

    fn record_from_row(row: &PgRow) -> AppResult<TransactionRecord> {
        let amount: String = row.try_get("amount_wei")?;
        Ok(TransactionRecord {
            id: row.try_get::<Uuid, _>("id")?,
            address: row.try_get("address")?,
            kind: row.try_get::<TransactionKind, _>("kind")?,
            amount_wei: Wei::parse_decimal(&amount)?,
            related_file_id: row.try_get("related_file_id")?,
            related_settlement_id: row.try_get("related_settlement_id")?,
            description: row.try_get("description")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        })
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn balance(&self, address: &str) -> AppResult<Option<AccountBalance>> {
        let row = sqlx::query(
            r#"
            SELECT address, balance_wei::TEXT AS balance_wei, updated_at
            FROM account_balances
            WHERE address = $1
            "#,
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let raw: String = row.try_get("balance_wei")?;
                Ok(Some(AccountBalance {
                    address: row.try_get("address")?,
                    balance_wei: Self::parse_balance(address, &raw)?,
                    updated_at: row.try_get("updated_at")?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn credit(&self, entry: NewEntry) -> AppResult<AccountBalance> {
        let mut tx = self.pool.begin().await?;
        let record = entry.into_record(TransactionKind::Deposit);

        // The partial unique index on related_settlement_id turns a replay into a no-op insert
        if Self::insert_record(&mut tx, &record).await? == 0 {
            tx.rollback().await?;
            return Err(LedgerError::SettlementAlreadyCredited {
                settlement_id: record.related_settlement_id.unwrap_or_default(),
            }
            .into());
        }

        let row = sqlx::query(
            r#"
            INSERT INTO account_balances (address, balance_wei, updated_at)
            VALUES ($1, CAST($2 AS NUMERIC), NOW())
            ON CONFLICT (address) DO UPDATE
            SET balance_wei = account_balances.balance_wei + EXCLUDED.balance_wei,
                updated_at = NOW()
            RETURNING balance_wei::TEXT AS balance_wei, updated_at
            "#,
        )
        .bind(&record.address)
        .bind(record.amount_wei.to_string())
        .fetch_one(&mut *tx)
        .await?;

        let raw: String = row.try_get("balance_wei")?;
        let balance = AccountBalance {
            address: record.address.clone(),
            balance_wei: Self::parse_balance(&record.address, &raw)?,
            updated_at: row.try_get("updated_at")?,
        };

        tx.commit().await?;
        debug!("Deposit {} committed for {}", record.id, record.address);
        Ok(balance)
    }

    async fn debit(&self, entry: NewEntry) -> AppResult<DebitOutcome> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE account_balances
            SET balance_wei = balance_wei - CAST($2 AS NUMERIC), updated_at = NOW()
            WHERE address = $1 AND balance_wei >= CAST($2 AS NUMERIC)
            RETURNING balance_wei::TEXT AS balance_wei
            "#,
        )
        .bind(&entry.address)
        .bind(entry.amount.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = updated else {
            let current: Option<String> = sqlx::query_scalar(
                "SELECT balance_wei::TEXT FROM account_balances WHERE address = $1",
            )
            .bind(&entry.address)
            .fetch_optional(&mut *tx)
            .await?;
            tx.rollback().await?;

            let current_balance = match current {
                Some(raw) => Self::parse_balance(&entry.address, &raw)?,
                None => Wei::ZERO,
            };
            return Ok(DebitOutcome::InsufficientFunds {
                current_balance,
                required: entry.amount,
            });
        };

        let raw: String = row.try_get("balance_wei")?;
        let new_balance = Self::parse_balance(&entry.address, &raw)?;
        let record = entry.into_record(TransactionKind::Deduct);
        Self::insert_record(&mut tx, &record).await?;
        tx.commit().await?;

        Ok(DebitOutcome::Debited {
            new_balance,
            transaction_id: record.id,
        })
    }

    async fn history(
        &self,
        address: &str,
        limit: Option<usize>,
    ) -> AppResult<Vec<TransactionRecord>> {
        let limit = limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));
        let rows = sqlx::query(
            r#"
            SELECT id, address, kind, amount_wei::TEXT AS amount_wei, related_file_id,
                   related_settlement_id, description, created_at
            FROM ledger_transactions
            WHERE address = $1
            ORDER BY seq DESC
            LIMIT $2
            "#,
        )
        .bind(address)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::record_from_row).collect()
    }
}
