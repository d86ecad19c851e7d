use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AppResult;

/// Metadata sent along with an upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub file_name: String,
    pub owner_address: String,
    pub content_hash: String,
    pub size_bytes: u64,
    pub duration_days: u32,
}

/// Where the backend put the data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub content_address: String,
    pub provider_id: String,
}

/// One live session with the storage backend
#[async_trait]
pub trait StorageSession: Send + Sync {
    fn id(&self) -> &str;

    async fn upload(&self, bytes: &[u8], metadata: &UploadMetadata) -> AppResult<StoredObject>;

    async fn download(&self, content_address: &str) -> AppResult<Vec<u8>>;

    async fn is_alive(&self) -> AppResult<bool>;

    async fn close(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Factory for storage sessions
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn connect(&self) -> AppResult<Arc<dyn StorageSession>>;
}
