//! Raw blob store transport
//!
//! Objects are addressed by key under a base URL: `PUT {base}/{key}` stores,
//! `GET {base}/{key}` fetches.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("gpc-ml/", env!("CARGO_PKG_VERSION"));

/// Transport-level failures
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Network error, timeout or 5xx; worth retrying
    #[error("Transient blob store error: {0}")]
    Transient(String),

    #[error("Blob not found: {0}")]
    NotFound(String),

    /// 4xx other than 404; retrying will not help
    #[error("Blob store rejected request: {0}")]
    Rejected(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

/// Confirmation of a stored object
#[derive(Debug, Clone, Serialize)]
pub struct Receipt {
    pub key: String,
    pub size_bytes: u64,
    pub etag: Option<String>,
    pub stored_at: DateTime<Utc>,
}

#[async_trait]
pub trait BlobTransport: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<Receipt, TransportError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, TransportError>;
}

/// HTTP object store client
pub struct HttpBlobTransport {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpBlobTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Transient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }
}

fn classify_status(status: reqwest::StatusCode, key: &str) -> Option<TransportError> {
    if status.is_success() {
        None
    } else if status == reqwest::StatusCode::NOT_FOUND {
        Some(TransportError::NotFound(key.to_string()))
    } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        Some(TransportError::Transient(format!("{} returned {}", key, status)))
    } else {
        Some(TransportError::Rejected(format!("{} returned {}", key, status)))
    }
}

#[async_trait]
impl BlobTransport for HttpBlobTransport {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<Receipt, TransportError> {
        let response = self
            .http_client
            .put(self.url(key))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;

        if let Some(err) = classify_status(response.status(), key) {
            return Err(err);
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string());

        Ok(Receipt {
            key: key.to_string(),
            size_bytes: bytes.len() as u64,
            etag,
            stored_at: Utc::now(),
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, TransportError> {
        let response = self
            .http_client
            .get(self.url(key))
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;

        if let Some(err) = classify_status(response.status(), key) {
            return Err(err);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
