use crate::ledger::models::{Chain, Wei};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Upstream session error: {0}")]
    Session(#[from] SessionError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("External error: {0}")]
    ExternalError(String),
}

impl AppError {
    /// Routine outcomes are reported to the user as typed results, not alerts.
    pub fn is_routine(&self) -> bool {
        matches!(
            self,
            AppError::Ledger(LedgerError::InsufficientFunds { .. })
                | AppError::Settlement(SettlementError::UnsupportedRoute { .. })
        )
    }
}

/// Ledger-related errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Wei, available: Wei },

    #[error("Settlement {settlement_id} has already been credited")]
    SettlementAlreadyCredited { settlement_id: String },

    #[error("Amount overflow while updating balance of {address}")]
    AmountOverflow { address: String },
}

/// Cross-chain settlement errors
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("No route for {token} from {source_chain} to {destination_chain}")]
    UnsupportedRoute {
        source_chain: Chain,
        destination_chain: Chain,
        token: String,
    },

    #[error("Settlement {request_id} not resolved after {elapsed_ms}ms (executed: {last_executed:?})")]
    Timeout {
        request_id: String,
        elapsed_ms: u64,
        last_executed: Option<bool>,
    },

    #[error("Settlement submission failed: {0}")]
    SubmissionFailed(String),

    #[error("Fee estimation failed: {0}")]
    FeeEstimationFailed(String),

    #[error("Status unavailable for {request_id}: {message}")]
    StatusUnavailable { request_id: String, message: String },

    /// The transfer resolved but the ledger deposit did not happen
    #[error("Settlement {request_id} resolved but crediting {amount} wei failed: {message}")]
    CreditFailed {
        request_id: String,
        amount: Wei,
        message: String,
    },
}

/// Storage backend session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Storage backend unreachable after {attempts} attempts: {message}")]
    Unreachable { attempts: u32, message: String },

    #[error("Connection manager has been shut down")]
    Closed,
}

/// Paid upload errors that leave a debit or a stored object to reconcile
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Storage write for upload {file_id} failed, {cost} wei left debited: {message}")]
    StorageWriteFailed {
        file_id: Uuid,
        cost: Wei,
        message: String,
    },

    #[error("Upload {file_id} stored at {content_address} but its record was not settled: {message}")]
    RecordNotSettled {
        file_id: Uuid,
        content_address: String,
        provider_id: String,
        message: String,
    },
}

/// Error payload handed to the outer (HTTP) layer
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        let (error_code, details) = match err {
            AppError::Ledger(LedgerError::InsufficientFunds { required, available }) => (
                "INSUFFICIENT_FUNDS",
                Some(serde_json::json!({
                    "required_amount": required.to_string(),
                    "current_balance": available.to_string(),
                })),
            ),
            AppError::Ledger(LedgerError::SettlementAlreadyCredited { settlement_id }) => (
                "SETTLEMENT_ALREADY_CREDITED",
                Some(serde_json::json!({ "request_id": settlement_id })),
            ),
            AppError::Ledger(LedgerError::AmountOverflow { .. }) => ("AMOUNT_OVERFLOW", None),
            AppError::Settlement(SettlementError::UnsupportedRoute {
                source_chain,
                destination_chain,
                token,
            }) => (
                "UNSUPPORTED_ROUTE",
                Some(serde_json::json!({
                    "source_chain": source_chain,
                    "destination_chain": destination_chain,
                    "token": token,
                })),
            ),
            AppError::Settlement(SettlementError::Timeout {
                request_id,
                elapsed_ms,
                last_executed,
            }) => (
                "SETTLEMENT_TIMEOUT",
                Some(serde_json::json!({
                    "request_id": request_id,
                    "elapsed_ms": elapsed_ms,
                    "executed": last_executed,
                })),
            ),
            AppError::Settlement(SettlementError::SubmissionFailed(_)) => {
                ("SETTLEMENT_SUBMISSION_FAILED", None)
            }
            AppError::Settlement(SettlementError::StatusUnavailable { request_id, .. }) => (
                "SETTLEMENT_STATUS_UNAVAILABLE",
                Some(serde_json::json!({ "request_id": request_id })),
            ),
            AppError::Settlement(SettlementError::FeeEstimationFailed(_)) => {
                ("FEE_ESTIMATION_FAILED", None)
            }
            AppError::Settlement(SettlementError::CreditFailed {
                request_id, amount, ..
            }) => (
                "SETTLEMENT_CREDIT_FAILED",
                Some(serde_json::json!({
                    "request_id": request_id,
                    "amount": amount.to_string(),
                })),
            ),
            AppError::Upload(UploadError::StorageWriteFailed { file_id, cost, .. }) => (
                "STORAGE_WRITE_FAILED",
                Some(serde_json::json!({
                    "file_id": file_id,
                    "cost": cost.to_string(),
                })),
            ),
            AppError::Upload(UploadError::RecordNotSettled {
                file_id,
                content_address,
                provider_id,
                ..
            }) => (
                "UPLOAD_RECORD_NOT_SETTLED",
                Some(serde_json::json!({
                    "file_id": file_id,
                    "content_address": content_address,
                    "provider_id": provider_id,
                })),
            ),
            AppError::Session(_) => ("UPSTREAM_SESSION_ERROR", None),
            AppError::Config(_) => ("CONFIGURATION_ERROR", None),
            AppError::NotFound(_) => ("NOT_FOUND", None),
            AppError::InvalidInput(_) => ("INVALID_INPUT", None),
            AppError::InvalidAddress(_) => ("INVALID_ADDRESS", None),
            AppError::InvalidState(_) => ("INVALID_STATE", None),
            AppError::Database(_) => ("DATABASE_ERROR", None),
            AppError::ExternalError(_) | AppError::Internal(_) => ("INTERNAL_ERROR", None),
        };

        let error = match err {
            AppError::Database(_) => "A database error occurred".to_string(),
            other => other.to_string(),
        };

        ErrorResponse {
            error,
            error_code: error_code.to_string(),
            details,
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::ExternalError(format!("HTTP request error: {:?}", error))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
