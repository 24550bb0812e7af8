//! Blob store access guarded by retry and a circuit breaker
//!
//! Each attempt passes through the breaker. Transient transport errors count
//! against the circuit and are retried with backoff; not-found and rejected
//! requests prove the store is reachable, so they count as breaker successes
//! and are returned immediately. A rejection by the open circuit is never
//! retried.

use std::sync::Arc;
use thiserror::Error;

use super::circuit_breaker::{CircuitBreaker, CircuitOpen};
use super::retry::{retry_with_backoff, RetryPolicy};
use super::transport::{BlobTransport, Receipt, TransportError};

#[derive(Debug, Clone, Error)]
pub enum BlobError {
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpen),

    #[error("Blob '{0}' not found")]
    NotFound(String),

    #[error("Blob store rejected '{key}': {message}")]
    Rejected { key: String, message: String },

    #[error("Blob store unavailable for '{key}': {message}")]
    Unavailable { key: String, message: String },
}

impl BlobError {
    fn from_transport(key: &str, err: TransportError) -> Self {
        match err {
            TransportError::NotFound(_) => BlobError::NotFound(key.to_string()),
            TransportError::Rejected(message) => BlobError::Rejected {
                key: key.to_string(),
                message,
            },
            TransportError::Transient(message) => BlobError::Unavailable {
                key: key.to_string(),
                message,
            },
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, BlobError::Unavailable { .. })
    }
}

pub struct ResilientBlobStore {
    transport: Arc<dyn BlobTransport>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl ResilientBlobStore {
    pub fn new(
        transport: Arc<dyn BlobTransport>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            breaker,
            retry,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<Receipt, BlobError> {
        let attempt = move |_: u32| async move {
            self.breaker
                .call(
                    move || self.transport.put(key, bytes, content_type),
                    TransportError::is_transient,
                )
                .await?
                .map_err(|e| BlobError::from_transport(key, e))
        };
        let receipt =
            retry_with_backoff("blob put", &self.retry, BlobError::is_retryable, attempt).await?;

        tracing::debug!(key, size_bytes = receipt.size_bytes, "Blob stored");
        Ok(receipt)
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let attempt = move |_: u32| async move {
            self.breaker
                .call(move || self.transport.get(key), TransportError::is_transient)
                .await?
                .map_err(|e| BlobError::from_transport(key, e))
        };
        let bytes =
            retry_with_backoff("blob get", &self.retry, BlobError::is_retryable, attempt).await?;

        tracing::debug!(key, size_bytes = bytes.len(), "Blob fetched");
        Ok(bytes)
    }
}
