use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::core::cancel::CancelToken;
use crate::core::error::{CloneError, Result};

/// Bounds for transient-fault retries. Flood waits are not bounded: the
/// server dictates the wait and we comply for as long as it keeps asking.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_secs(2),
            cap: Duration::from_secs(60),
        }
    }
}

fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..=1000))
}

fn backoff_for(policy: &RetryPolicy, failures: u32) -> Duration {
    let exp = policy
        .base
        .saturating_mul(2u32.saturating_pow(failures.saturating_sub(1)));
    exp.min(policy.cap)
}

async fn sleep_observing_cancel(cancel: &CancelToken, duration: Duration) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(CloneError::Interrupted),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Run a platform call under the retry policy. This wrapper is the only
/// place where sleeps intentionally block forward progress; it carries no
/// state between calls and is safe to nest around any closure.
///
/// * `RateLimited(n)` sleeps n seconds plus jitter and retries without
///   consuming an attempt.
/// * `Transient` retries with exponential back-off until the policy is
///   exhausted, then re-raises as `Permanent`.
/// * Everything else propagates immediately.
pub async fn call<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    operation: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut failures: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(CloneError::Interrupted);
        }
        match f().await {
            Ok(value) => return Ok(value),
            Err(CloneError::RateLimited(seconds)) => {
                warn!(operation, wait_secs = seconds, "flood wait from the platform");
                sleep_observing_cancel(cancel, Duration::from_secs(seconds) + jitter()).await?;
            }
            Err(CloneError::Transient(reason)) => {
                failures += 1;
                if failures > policy.max_attempts {
                    return Err(CloneError::Permanent(format!(
                        "{operation}: {reason} (gave up after {} attempts)",
                        policy.max_attempts
                    )));
                }
                let backoff = backoff_for(policy, failures);
                warn!(
                    operation,
                    attempt = failures,
                    backoff_ms = backoff.as_millis() as u64,
                    reason = reason.as_str(),
                    "transient failure, backing off"
                );
                sleep_observing_cancel(cancel, backoff + jitter()).await?;
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    #[tokio::test(start_paused = true)]
    async fn flood_wait_sleeps_at_least_the_instructed_time() {
        let cancel = CancelToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();

        let started = Instant::now();
        let value = call(&policy(), &cancel, "send", move || {
            let calls = counted.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CloneError::RateLimited(5))
                } else {
                    Ok(7u32)
                }
            }
        })
        .await
        .expect("eventually succeeds");

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two flood waits of five seconds each must have elapsed.
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_promoted_to_permanent() {
        let cancel = CancelToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();

        let result: Result<()> = call(&policy(), &cancel, "download", move || {
            let calls = counted.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CloneError::Transient("connection reset".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(CloneError::Permanent(_))));
        // Initial call plus five retries.
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn permanent_failures_propagate_without_retry() {
        let cancel = CancelToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();

        let result: Result<()> = call(&policy(), &cancel, "forward", move || {
            let calls = counted.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CloneError::Permanent("chat not found".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(CloneError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn restricted_is_not_swallowed_by_the_adapter() {
        let cancel = CancelToken::new();
        let result: Result<()> =
            call(&policy(), &cancel, "forward", || async { Err(CloneError::Restricted) }).await;
        assert!(matches!(result, Err(CloneError::Restricted)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_a_backoff_sleep() {
        let cancel = CancelToken::new();
        let observer = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            observer.cancel();
        });

        let result: Result<()> = call(&policy(), &cancel, "send", || async {
            Err(CloneError::Transient("timeout".into()))
        })
        .await;
        assert!(matches!(result, Err(CloneError::Interrupted)));
    }

    #[test]
    fn backoff_doubles_and_respects_the_cap() {
        let policy = policy();
        assert_eq!(backoff_for(&policy, 1), Duration::from_secs(2));
        assert_eq!(backoff_for(&policy, 2), Duration::from_secs(4));
        assert_eq!(backoff_for(&policy, 5), Duration::from_secs(32));
        assert_eq!(backoff_for(&policy, 12), Duration::from_secs(60));
    }
}
