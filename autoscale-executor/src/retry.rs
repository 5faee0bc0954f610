//! Capped exponential backoff with jitter, applied per step per §4.4.
//! Shape grounded in a generic retry-with-backoff helper from the example
//! pack; the jitter and retryable-error predicate are specific to this
//! executor's `StepOutcome` classification.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Overall wall-clock deadline for the whole retry loop, independent of
    /// `max_attempts` -- whichever is hit first stops retrying.
    pub deadline: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            deadline: Duration::from_secs(60),
        }
    }
}

/// Adds up to 50% positive jitter to `delay`, capped at `max_delay`.
fn jittered(delay: Duration, max_delay: Duration) -> Duration {
    let capped = delay.min(max_delay);
    let jitter_frac: f64 = rand::thread_rng().gen_range(0.0..0.5);
    let jittered_ms = capped.as_secs_f64() * (1.0 + jitter_frac) * 1000.0;
    Duration::from_millis(jittered_ms as u64).min(max_delay)
}

/// Runs `attempt` until it returns a non-retryable result, `max_attempts`
/// is exhausted, or `deadline` elapses, backing off between retries.
/// `attempt` returns `Ok(T)` on success and `Err((is_retryable, E))` on
/// failure so the caller's error classification stays outside this module.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, mut attempt: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, (bool, E)>>,
{
    let start = Instant::now();
    let mut delay = config.initial_delay;
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err((retryable, err)) => {
                let exhausted = attempts >= config.max_attempts
                    || start.elapsed() >= config.deadline
                    || !retryable;
                if exhausted {
                    return Err(err);
                }
                tokio::time::sleep(jittered(delay, config.max_delay)).await;
                delay = Duration::from_secs_f64(delay.as_secs_f64() * config.multiplier);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            deadline: Duration::from_secs(5),
        };
        let result: Result<&str, &str> = retry_with_backoff(&config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err((true, "transient"))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_immediately_on_non_retryable_error() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default();
        let result: Result<&str, &str> = retry_with_backoff(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err((false, "fatal")) }
        })
        .await;
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
            deadline: Duration::from_secs(5),
        };
        let result: Result<&str, &str> = retry_with_backoff(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err((true, "still failing")) }
        })
        .await;
        assert_eq!(result, Err("still failing"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
