use std::future::Future;
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use backoff::ExponentialBackoffBuilder;

use crate::provider::ProviderError;
use crate::spec::{BackoffMode, FailurePolicy};

/// Builds the `backoff` crate primitive matching a spec's `failure_policy`.
/// `exponential` and `exponential-jittered` differ only in randomization
/// factor — jittered keeps `backoff`'s default (0.5), plain exponential
/// zeroes it out for deterministic wait times.
fn build_backoff(policy: &FailurePolicy) -> Box<dyn Backoff + Send> {
    match policy.backoff {
        BackoffMode::Constant => Box::new(Constant::new(Duration::from_millis(policy.wait_min_ms))),
        BackoffMode::Exponential => Box::new(
            ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_millis(policy.wait_min_ms.max(1)))
                .with_max_interval(Duration::from_millis(policy.wait_max_ms.max(policy.wait_min_ms)))
                .with_randomization_factor(0.0)
                .with_max_elapsed_time(None)
                .build(),
        ),
        BackoffMode::ExponentialJittered => Box::new(
            ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_millis(policy.wait_min_ms.max(1)))
                .with_max_interval(Duration::from_millis(policy.wait_max_ms.max(policy.wait_min_ms)))
                .with_max_elapsed_time(None)
                .build(),
        ),
    }
}

/// Runs `attempt` up to `retries + 1` times per `policy`. `attempt` is
/// handed the 1-based attempt number, mainly so callers can log it.
/// Retries apply only to [`ProviderError::is_retriable`] failures;
/// deterministic failures return immediately, matching §4.3's "retries
/// apply only to transient failures".
pub(crate) async fn with_retry<F, Fut, T>(policy: &FailurePolicy, mut attempt: F) -> Result<T, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut backoff = build_backoff(policy);
    let max_attempts = policy.retries + 1;
    let mut attempt_no = 0u32;

    loop {
        attempt_no += 1;
        match attempt(attempt_no).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() && attempt_no < max_attempts => {
                log::warn!("invocation attempt {attempt_no} failed transiently: {err}, retrying");
                if let Some(wait) = backoff.next_backoff() {
                    tokio::time::sleep(wait).await;
                }
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let policy = FailurePolicy {
            retries: 2,
            backoff: BackoffMode::Constant,
            wait_min_ms: 1,
            wait_max_ms: 1,
        };
        let calls = AtomicU32::new(0);
        let result = with_retry(&policy, |_attempt| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProviderError::Transient("flaky".into()))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_deterministic_failures() {
        let policy = FailurePolicy {
            retries: 5,
            backoff: BackoffMode::Constant,
            wait_min_ms: 1,
            wait_max_ms: 1,
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), ProviderError> = with_retry(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::Auth("bad key".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_retries_means_terminal_on_first_failure() {
        let policy = FailurePolicy {
            retries: 0,
            backoff: BackoffMode::Constant,
            wait_min_ms: 1,
            wait_max_ms: 1,
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), ProviderError> = with_retry(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::Transient("flaky".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
