//! Cancellable long waits on store keys.

use std::sync::Arc;
use std::time::Duration;

use muster_store::CoordinationStore;
use muster_store::StoreError;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::config::BroadcastConfig;
use crate::error::CoordinationError;

/// Turns the store's bounded `wait` into a robust long-running wait.
///
/// Loops short per-attempt waits so the shutdown signal is observed at every
/// retry boundary rather than only after the full budget. Transient store
/// unavailability is absorbed within the same attempt budget; budget
/// exhaustion without shutdown escalates to `MaxRetriesExceeded`.
pub struct Waiter<S: CoordinationStore + ?Sized> {
    store: Arc<S>,
    attempt_timeout: Duration,
    retry_backoff: Duration,
    max_attempts: u32,
}

impl<S: CoordinationStore + ?Sized> Waiter<S> {
    /// Create a waiter from the shared retry configuration.
    pub fn new(store: Arc<S>, config: &BroadcastConfig) -> Self {
        config.validate();
        Self {
            store,
            attempt_timeout: Duration::from_millis(config.wait_attempt_timeout_ms),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            max_attempts: config.wait_attempts(),
        }
    }

    /// Block until every key exists, shutdown fires, or the budget runs out.
    ///
    /// `operation` names the wait in errors and logs.
    pub async fn wait(
        &self,
        keys: &[String],
        operation: &str,
        shutdown: &CancellationToken,
    ) -> Result<(), CoordinationError> {
        let mut attempt = 0u32;
        loop {
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => {
                    return Err(CoordinationError::Aborted {
                        operation: operation.to_string(),
                    });
                }
                outcome = self.store.wait(keys, self.attempt_timeout) => outcome,
            };

            match outcome {
                Ok(()) => return Ok(()),
                Err(StoreError::WaitTimeout { .. }) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(CoordinationError::MaxRetriesExceeded {
                            operation: operation.to_string(),
                            attempts: attempt,
                        });
                    }
                    debug!(operation, attempt, max = self.max_attempts, "wait attempt timed out, retrying");
                }
                Err(error) if error.is_transient() => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(CoordinationError::MaxRetriesExceeded {
                            operation: operation.to_string(),
                            attempts: attempt,
                        });
                    }
                    warn!(operation, attempt, %error, "store unavailable during wait, retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            return Err(CoordinationError::Aborted {
                                operation: operation.to_string(),
                            });
                        }
                        _ = tokio::time::sleep(self.retry_backoff) => {}
                    }
                }
                Err(error) => return Err(CoordinationError::Store { source: error }),
            }
        }
    }
}
