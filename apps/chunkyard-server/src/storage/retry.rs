//! Retry policy for storage operations

use std::future::Future;
use std::io;
use std::path::Path;
use std::time::Duration;

use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use super::StorageError;

/// Upper bound for a single backoff delay
const MAX_DELAY: Duration = Duration::from_secs(2);

/// Exponential backoff with jitter for transient I/O errors
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Delays between attempts: base, 2*base, 4*base, ... capped at `MAX_DELAY`
    fn strategy(&self) -> impl Iterator<Item = Duration> {
        let base_ms = (self.base_delay.as_millis() as u64 / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(base_ms)
            .max_delay(MAX_DELAY)
            .map(jitter)
            .take(self.max_attempts - 1)
    }

    /// Run `action`, retrying while it fails with a transient error
    pub async fn run<T, F, Fut>(
        &self,
        op: &'static str,
        path: &Path,
        action: F,
    ) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = io::Result<T>>,
    {
        RetryIf::spawn(self.strategy(), action, |err: &io::Error| {
            let transient = is_transient(err);
            if transient {
                tracing::warn!(op, path = %path.display(), error = %err, "Transient storage error, retrying");
            }
            transient
        })
        .await
        .map_err(|e| StorageError::io(op, path, e))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(50))
    }
}

/// Errors worth another attempt
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy(attempts: usize) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicUsize::new(0);
        let result = fast_policy(3)
            .run("write", Path::new("x"), || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(io::Error::from(io::ErrorKind::Interrupted))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = fast_policy(5)
            .run("read", Path::new("missing"), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(io::Error::from(io::ErrorKind::NotFound))
            })
            .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = fast_policy(2)
            .run("write", Path::new("busy"), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(io::Error::from(io::ErrorKind::TimedOut))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_none_policy_has_single_attempt() {
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
        assert_eq!(RetryPolicy::none().strategy().count(), 0);
    }
}
