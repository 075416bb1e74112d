//! Bounded retry with cooperative cancellation.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why a retried operation gave up.
pub(crate) enum RetryFailure<E> {
    /// The shutdown signal fired.
    Aborted,
    /// The attempt budget ran out.
    Exhausted {
        /// Attempts made before giving up.
        attempts: u32,
        /// The error from the final attempt.
        last: E,
    },
}

/// Run `attempt_op` until it succeeds, the shutdown signal fires, or
/// `max_attempts` is exhausted, sleeping `backoff` between attempts.
///
/// The signal is checked before every attempt and interrupts the backoff
/// sleep, so cancellation never waits out a full backoff interval.
pub(crate) async fn retry_until<T, E, F, Fut>(
    operation: &'static str,
    max_attempts: u32,
    backoff: Duration,
    shutdown: &CancellationToken,
    mut attempt_op: F,
) -> Result<T, RetryFailure<E>>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    debug_assert!(max_attempts > 0);
    let mut attempt = 0u32;
    loop {
        if shutdown.is_cancelled() {
            return Err(RetryFailure::Aborted);
        }

        match attempt_op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(RetryFailure::Exhausted { attempts: attempt, last: error });
                }
                debug!(operation, attempt, max = max_attempts, %error, "attempt failed, backing off");
                tokio::select! {
                    _ = shutdown.cancelled() => return Err(RetryFailure::Aborted),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use super::*;

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let shutdown = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let value = retry_until("test op", 5, Duration::from_millis(1), &shutdown, || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 { Err("not yet") } else { Ok(attempt) }
            }
        })
        .await;

        assert!(matches!(value, Ok(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_the_budget() {
        let shutdown = CancellationToken::new();

        let result: Result<(), _> =
            retry_until("test op", 3, Duration::from_millis(1), &shutdown, || async {
                Err("always")
            })
            .await;

        assert!(matches!(result, Err(RetryFailure::Exhausted { attempts: 3, .. })));
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_backoff() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result: Result<(), _> =
            retry_until("test op", 3, Duration::from_secs(60), &shutdown, || async {
                Err("always")
            })
            .await;

        assert!(matches!(result, Err(RetryFailure::Aborted)));
    }
}
