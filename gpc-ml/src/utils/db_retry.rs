//! SQLite lock retry
//!
//! Parent units of different photos write concurrently and SQLite has a
//! single writer. When `busy_timeout` runs out the write fails with
//! "database is locked"; those failures are retried with doubling backoff
//! until the wait budget is spent. Other errors are returned untouched.

use gpc_common::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Total retry budget for one database write
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

const FIRST_BACKOFF: Duration = Duration::from_millis(10);
const BACKOFF_CAP: Duration = Duration::from_millis(1000);

pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = Instant::now() + Duration::from_millis(max_wait_ms);
    let mut backoff = FIRST_BACKOFF;
    let mut locked_attempts = 0u32;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if locked_attempts > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        locked_attempts,
                        "Write went through after lock wait"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_database_locked() => err,
            Err(err) => return Err(err),
        };
        locked_attempts += 1;

        let now = Instant::now();
        if now >= deadline {
            tracing::error!(
                operation = operation_name,
                locked_attempts,
                max_wait_ms,
                error = %err,
                "Gave up waiting for database lock"
            );
            return Err(Error::Internal(format!(
                "Database locked: {} gave up after {} attempts within {} ms",
                operation_name, locked_attempts, max_wait_ms
            )));
        }

        let wait = backoff.min(deadline - now);
        tracing::warn!(
            operation = operation_name,
            locked_attempts,
            wait_ms = wait.as_millis() as u64,
            "Database locked, backing off"
        );
        tokio::time::sleep(wait).await;
        backoff = (backoff * 2).min(BACKOFF_CAP);
    }
}
