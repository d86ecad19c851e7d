use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::models::{UploadOutcome, UploadRecord, UploadStatus};
use super::pricing::StorageCostModel;
use super::repository::UploadStore;
use crate::error::{AppError, AppResult, UploadError};
use crate::ledger::models::{normalize_address, DebitOutcome, Wei};
use crate::ledger::Ledger;
use crate::session::backend::UploadMetadata;
use crate::session::ConnectionManager;

/// What happens to a debit whose storage write failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundPolicy {
    /// Credit the cost back and mark the upload refunded
    #[default]
    Compensate,
    /// Leave the upload pending for an operator to reconcile
    Manual,
}

fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Paid uploads: debit first, then write through the connection manager.
pub struct UploadService {
    ledger: Arc<Ledger>,
    uploads: Arc<dyn UploadStore>,
    connections: Arc<ConnectionManager>,
    pricing: Arc<dyn StorageCostModel>,
    refund_policy: RefundPolicy,
    max_file_size: u64,
}

impl UploadService {
    pub fn new(
        ledger: Arc<Ledger>,
        uploads: Arc<dyn UploadStore>,
        connections: Arc<ConnectionManager>,
        pricing: Arc<dyn StorageCostModel>,
        refund_policy: RefundPolicy,
        max_file_size: u64,
    ) -> Self {
        Self {
            ledger,
            uploads,
            connections,
            pricing,
            refund_policy,
            max_file_size,
        }
    }

    /// Charge for and store one file.
    ///
    /// The debit happens before any storage work and fails fast: with too little credit
    /// the backend is never contacted and `UploadOutcome::InsufficientFunds` is returned.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn reserve_and_store(
        &self,
        address: &str,
        bytes: &[u8],
        file_name: &str,
        duration_days: u32,
    ) -> AppResult<UploadOutcome> {
        let owner = normalize_address(address)?;
        if bytes.is_empty() {
            return Err(AppError::InvalidInput("file is empty".to_string()));
        }
        let size_bytes = bytes.len() as u64;
        if size_bytes > self.max_file_size {
            return Err(AppError::InvalidInput(format!(
                "file is {} bytes, limit is {}",
                size_bytes, self.max_file_size
            )));
        }
        if file_name.trim().is_empty() {
            return Err(AppError::InvalidInput("file name is empty".to_string()));
        }

        let cost = self.pricing.cost(size_bytes, duration_days)?;
        if cost.is_zero() {
            return Err(AppError::InvalidInput(
                "pricing returned a zero cost".to_string(),
            ));
        }

        let file_id = Uuid::new_v4();
        let hash = content_hash(bytes);

        match self
            .ledger
            .debit(&owner, cost, file_id, &format!("storage: {}", file_name))
            .await?
        {
            DebitOutcome::Debited { .. } => {}
            DebitOutcome::InsufficientFunds {
                current_balance,
                required,
            } => {
                return Ok(UploadOutcome::InsufficientFunds {
                    current_balance,
                    required_amount: required,
                });
            }
        }

        let record = UploadRecord {
            id: file_id,
            owner_address: owner.clone(),
            file_name: file_name.to_string(),
            size_bytes,
            content_hash: hash.clone(),
            content_address: None,
            provider_id: None,
            duration_days,
            cost_wei: cost,
            status: UploadStatus::Pending,
            created_at: Utc::now(),
            uploaded_at: None,
        };

        if let Err(e) = self.uploads.insert(&record).await {
            error!("❌ Could not record upload {}: {}", file_id, e);
            self.refund(&owner, cost, file_id, false).await;
            return Err(e);
        }

        let metadata = UploadMetadata {
            file_name: record.file_name.clone(),
            owner_address: owner.clone(),
            content_hash: hash,
            size_bytes,
            duration_days,
        };

        let stored = self
            .connections
            .with_connection(|session| {
                let metadata = &metadata;
                async move { session.upload(bytes, metadata).await }
            })
            .await;

        let stored = match stored {
            Ok(stored) => stored,
            Err(e) => {
                error!("❌ Storage write for upload {} failed: {}", file_id, e);
                return match self.refund_policy {
                    RefundPolicy::Compensate => {
                        self.refund(&owner, cost, file_id, true).await;
                        Err(e)
                    }
                    RefundPolicy::Manual => {
                        error!(
                            "❌ Upload {} left pending for reconciliation ({} wei debited from {})",
                            file_id, cost, owner
                        );
                        Err(UploadError::StorageWriteFailed {
                            file_id,
                            cost,
                            message: e.to_string(),
                        }
                        .into())
                    }
                };
            }
        };

        let settled = match self
            .uploads
            .mark_settled(
                file_id,
                &stored.content_address,
                &stored.provider_id,
                Utc::now(),
            )
            .await
        {
            Ok(settled) => settled,
            Err(e) => {
                // The data is stored and paid for; only the record is behind
                error!(
                    "❌ Upload {} stored at {} by {} ({} wei from {}) but the record was not settled: {}",
                    file_id, stored.content_address, stored.provider_id, cost, owner, e
                );
                return Err(UploadError::RecordNotSettled {
                    file_id,
                    content_address: stored.content_address,
                    provider_id: stored.provider_id,
                    message: e.to_string(),
                }
                .into());
            }
        };

        info!(
            "📦 Stored {} ({} bytes) for {} at {} (cost {} wei)",
            settled.file_name, size_bytes, owner, stored.content_address, cost
        );
        Ok(UploadOutcome::Stored(settled))
    }

    /// Compensating credit. Failures here are logged, never raised over the original error.
    async fn refund(&self, owner: &str, cost: Wei, file_id: Uuid, mark_record: bool) {
        if let Err(e) = self
            .ledger
            .refund(owner, cost, file_id, "refund: storage write failed")
            .await
        {
            error!(
                "❌ Refund of {} wei for upload {} to {} failed, needs reconciliation: {}",
                cost, file_id, owner, e
            );
            return;
        }

        if mark_record {
            if let Err(e) = self.uploads.mark_refunded(file_id).await {
                error!("❌ Could not mark upload {} refunded: {}", file_id, e);
            }
        }
    }

    /// Download a settled upload and check it against the recorded hash
    #[instrument(skip(self))]
    pub async fn retrieve(&self, file_id: Uuid) -> AppResult<(UploadRecord, Vec<u8>)> {
        let record = self
            .uploads
            .get(file_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("upload {}", file_id)))?;

        let content_address = match (&record.status, &record.content_address) {
            (UploadStatus::Settled, Some(address)) => address.clone(),
            _ => {
                return Err(AppError::InvalidState(format!(
                    "upload {} is {:?}, nothing to retrieve",
                    file_id, record.status
                )))
            }
        };

        let bytes = self
            .connections
            .with_connection(|session| {
                let content_address = content_address.clone();
                async move { session.download(&content_address).await }
            })
            .await?;

        if content_hash(&bytes) != record.content_hash {
            return Err(AppError::ExternalError(format!(
                "content at {} does not match the recorded hash",
                content_address
            )));
        }
        Ok((record, bytes))
    }

    pub async fn list_uploads(
        &self,
        owner: &str,
        limit: Option<usize>,
    ) -> AppResult<Vec<UploadRecord>> {
        let owner = normalize_address(owner)?;
        self.uploads.list_by_owner(&owner, limit).await
    }
}
