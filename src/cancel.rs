//! Timeout and cancellation at subprocess and network boundaries.

use crate::{BackupError, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Races an operation against a timeout and an external cancellation token
#[derive(Debug, Clone)]
pub struct Guard {
    token: CancellationToken,
    timeout: Option<Duration>,
}

impl Guard {
    /// Guard with a token and an optional timeout
    pub fn new(token: CancellationToken, timeout: Option<Duration>) -> Self {
        Self { token, timeout }
    }

    /// Guard that never fires
    pub fn unbounded() -> Self {
        Self::new(CancellationToken::new(), None)
    }

    /// Same token, different timeout
    pub fn with_timeout(&self, timeout: Option<Duration>) -> Self {
        Self::new(self.token.clone(), timeout)
    }

    /// The token this guard watches
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Run `operation`, returning `Cancelled` if the token fires or the
    /// timeout elapses first. The operation future is dropped in that case.
    pub async fn run<F, T>(&self, what: &str, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.token.is_cancelled() {
            return Err(BackupError::Cancelled(format!("{what}: cancelled before start")));
        }

        let bounded = async {
            match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, operation).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(operation = what, timeout_secs = limit.as_secs(), "Operation timed out");
                        Err(BackupError::Cancelled(format!(
                            "{what}: timed out after {}s",
                            limit.as_secs()
                        )))
                    }
                },
                None => operation.await,
            }
        };

        tokio::select! {
            result = bounded => result,
            _ = self.token.cancelled() => {
                warn!(operation = what, "Operation cancelled");
                Err(BackupError::Cancelled(format!("{what}: cancelled")))
            }
        }
    }
}

impl Default for Guard {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passes_through() {
        let guard = Guard::unbounded();
        let value = guard.run("noop", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_timeout() {
        let guard = Guard::new(CancellationToken::new(), Some(Duration::from_millis(20)));
        let err = guard
            .run("sleep", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_token() {
        let token = CancellationToken::new();
        let guard = Guard::new(token.clone(), None);

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let err = guard
            .run("sleep", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Cancelled(_)));
        canceller.await.unwrap();

        // Already-cancelled guards refuse to start
        let err = guard.run("later", async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, BackupError::Cancelled(_)));
    }
}
