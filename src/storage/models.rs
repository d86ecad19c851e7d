use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult, LedgerError};
use crate::ledger::models::Wei;

/// Upload lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "upload_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Settled,
    Refunded,
}

impl UploadStatus {
    /// Valid transitions:
    /// - Pending → Settled, Refunded
    /// - Terminal states (Settled, Refunded) → NO TRANSITIONS ALLOWED
    pub fn validate_transition(from: UploadStatus, to: UploadStatus) -> AppResult<()> {
        let allowed = match from {
            UploadStatus::Pending => vec![UploadStatus::Settled, UploadStatus::Refunded],
            UploadStatus::Settled | UploadStatus::Refunded => {
                return Err(AppError::InvalidState(format!(
                    "upload is {:?}, no transitions from terminal states",
                    from
                )));
            }
        };

        if !allowed.contains(&to) {
            return Err(AppError::InvalidState(format!(
                "upload is {:?}, expected one of {:?}",
                from, allowed
            )));
        }
        Ok(())
    }
}

/// Paid-for upload. `cost_wei` is fixed when the debit is made and never recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: Uuid,
    pub owner_address: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub content_hash: String,
    pub content_address: Option<String>,
    pub provider_id: Option<String>,
    pub duration_days: u32,
    pub cost_wei: Wei,
    pub status: UploadStatus,
    pub created_at: DateTime<Utc>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

/// Result of `reserve_and_store`; a shortfall is reported, not raised
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UploadOutcome {
    Stored(UploadRecord),
    InsufficientFunds {
        current_balance: Wei,
        required_amount: Wei,
    },
}

impl UploadOutcome {
    /// Turn a shortfall into `LedgerError::InsufficientFunds` for callers that want `?`
    pub fn into_result(self) -> AppResult<UploadRecord> {
        match self {
            UploadOutcome::Stored(record) => Ok(record),
            UploadOutcome::InsufficientFunds {
                current_balance,
                required_amount,
            } => Err(LedgerError::InsufficientFunds {
                required: required_amount,
                available: current_balance,
            }
            .into()),
        }
    }
}
