//! Fixed pool of initialized scoring backends
//!
//! Backends are loaded once at startup and handed out per worker slot. A
//! slot is returned to the pool when its [`PooledModel`] guard drops, so a
//! panicking or cancelled worker never leaks a slot.

use std::future::Future;
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::ScoringError;

struct PoolInner<M: ?Sized> {
    idle: Mutex<Vec<Arc<M>>>,
    permits: Arc<Semaphore>,
    size: usize,
}

/// Pool of `size` ready-to-use backends
pub struct ModelPool<M: ?Sized> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ?Sized> Clone for ModelPool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ?Sized + Send + Sync> ModelPool<M> {
    /// Pool over already-initialized instances
    pub fn from_instances(instances: Vec<Arc<M>>) -> Self {
        let size = instances.len();
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(instances),
                permits: Arc::new(Semaphore::new(size)),
                size,
            }),
        }
    }

    /// Initialize `size` instances with `factory`, failing on the first error
    pub async fn initialize<F, Fut, E>(size: usize, mut factory: F) -> Result<Self, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<Arc<M>, E>>,
    {
        let mut instances = Vec::with_capacity(size);
        for slot in 0..size {
            instances.push(factory(slot).await?);
        }
        Ok(Self::from_instances(instances))
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<PooledModel<M>, ScoringError> {
        if self.inner.size == 0 {
            return Err(ScoringError::Unavailable("model pool is empty".to_string()));
        }

        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| ScoringError::Unavailable("model pool closed".to_string()))?;

        let model = self
            .inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or_else(|| ScoringError::Unavailable("no idle model in pool".to_string()))?;

        Ok(PooledModel {
            model: Some(model),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Total slots
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Currently idle slots
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }
}

/// Borrowed backend; returns itself to the pool on drop
pub struct PooledModel<M: ?Sized> {
    model: Option<Arc<M>>,
    pool: Arc<PoolInner<M>>,
    // Released after the model is back in `idle` (fields drop after `Drop::drop`)
    _permit: OwnedSemaphorePermit,
}

impl<M: ?Sized> Deref for PooledModel<M> {
    type Target = M;

    fn deref(&self) -> &M {
        match &self.model {
            Some(model) => model,
            // `model` is only taken in `drop`
            None => unreachable!("pooled model accessed after release"),
        }
    }
}

impl<M: ?Sized> PooledModel<M> {
    /// Shared handle to the borrowed instance. The slot stays taken until this
    /// guard drops, whatever happens to the handle.
    pub fn instance(&self) -> Arc<M> {
        match &self.model {
            Some(model) => Arc::clone(model),
            None => unreachable!("pooled model accessed after release"),
        }
    }
}

impl<M: ?Sized> Drop for PooledModel<M> {
    fn drop(&mut self) {
        if let Some(model) = self.model.take() {
            self.pool
                .idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(model);
        }
    }
}
