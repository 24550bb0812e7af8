//! Blob store access: transport, retry policy and circuit breaker

pub mod circuit_breaker;
pub mod retry;
pub mod store;
pub mod transport;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitOpen, CircuitSnapshot, CircuitState,
};
pub use retry::RetryPolicy;
pub use store::{BlobError, ResilientBlobStore};
pub use transport::{BlobTransport, HttpBlobTransport, Receipt, TransportError};
