use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::backend::{StorageBackend, StorageSession, StoredObject, UploadMetadata};
use crate::error::{AppError, AppResult};

#[derive(Deserialize)]
struct SessionOpened {
    session_id: String,
}

/// Storage gateway reached over HTTP.
///
/// Contract: `POST /sessions` opens a session; objects live under
/// `/sessions/{id}/objects`; `GET /sessions/{id}/ping` answers 200 while the session is
/// usable; `DELETE /sessions/{id}` closes it.
pub struct HttpStorageBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpStorageBackend {
    pub fn new(base_url: String, api_key: Option<String>, request_timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl StorageBackend for HttpStorageBackend {
    async fn connect(&self) -> AppResult<Arc<dyn StorageSession>> {
        let mut request = self.client.post(format!("{}/sessions", self.base_url));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let opened: SessionOpened = request.send().await?.error_for_status()?.json().await?;
        debug!("Opened storage session {}", opened.session_id);

        Ok(Arc::new(HttpStorageSession {
            client: self.client.clone(),
            session_url: format!("{}/sessions/{}", self.base_url, opened.session_id),
            id: opened.session_id,
            api_key: self.api_key.clone(),
        }))
    }
}

struct HttpStorageSession {
    client: Client,
    session_url: String,
    id: String,
    api_key: Option<String>,
}

impl HttpStorageSession {
    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl StorageSession for HttpStorageSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn upload(&self, bytes: &[u8], metadata: &UploadMetadata) -> AppResult<StoredObject> {
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| AppError::Internal(format!("Encoding upload metadata: {}", e)))?;

        let request = self
            .client
            .put(format!("{}/objects", self.session_url))
            .header("x-upload-metadata", metadata_json)
            .body(bytes.to_vec());

        let stored: StoredObject = self
            .authorized(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(stored)
    }

    async fn download(&self, content_address: &str) -> AppResult<Vec<u8>> {
        let request = self
            .client
            .get(format!("{}/objects/{}", self.session_url, content_address));
        let response = self.authorized(request).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("Object {}", content_address)));
        }
        let bytes = response.error_for_status()?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn is_alive(&self) -> AppResult<bool> {
        let request = self.client.get(format!("{}/ping", self.session_url));
        let response = self.authorized(request).send().await?;
        Ok(response.status().is_success())
    }

    async fn close(&self) -> AppResult<()> {
        let request = self.client.delete(self.session_url.clone());
        self.authorized(request).send().await?.error_for_status()?;
        Ok(())
    }
}
