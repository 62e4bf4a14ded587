//! Retry with exponential backoff and jitter.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{ErrorKind, LlmError};

/// `InvalidResponse` gets one more chance, never the full budget.
const MAX_INVALID_RESPONSE_RETRIES: u32 = 1;

/// Execute `operation` with retries on transient errors.
///
/// Returns the value together with the number of attempts it took.
/// Non-retryable errors surface on first occurrence.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    model: &str,
    operation: F,
) -> Result<(T, u32), LlmError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut invalid_responses = 0;
    let mut attempt = 0;
    loop {
        let err = match operation(attempt).await {
            Ok(val) => return Ok((val, attempt + 1)),
            Err(e) => e,
        };

        if err.kind() == ErrorKind::InvalidResponse {
            invalid_responses += 1;
        }
        let retryable = should_retry(config, &err)
            && invalid_responses <= MAX_INVALID_RESPONSE_RETRIES;
        if !retryable || attempt >= config.max_retries {
            if retryable {
                tracing::warn!(
                    model,
                    attempts = attempt + 1,
                    error = %err,
                    "Retry budget exhausted"
                );
            }
            return Err(err);
        }

        let delay = compute_backoff(config, attempt, &err);
        tracing::warn!(
            model,
            attempt = attempt + 1,
            max = config.max_retries,
            backoff_ms = delay.as_millis() as u64,
            kind = %err.kind(),
            error = %err,
            "Retrying after transient error"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Whether the policy allows another attempt after `err`.
pub fn should_retry(config: &RetryConfig, err: &LlmError) -> bool {
    err.is_retryable() || (config.retry_rate_limited && err.kind() == ErrorKind::RateLimited)
}

/// Delay before the retry following `attempt` (zero-based).
///
/// A provider-supplied retry-after hint replaces the computed delay; both
/// are capped at `max_backoff_ms`.
pub fn compute_backoff(config: &RetryConfig, attempt: u32, err: &LlmError) -> Duration {
    let cap = Duration::from_millis(config.max_backoff_ms);
    if let Some(hint) = err.retry_after() {
        return hint.min(cap);
    }
    compute_exponential_backoff(config, attempt)
}

/// `min(base * multiplier^attempt + jitter, max)`, jitter up to 10% of base.
pub fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let jitter = if config.jitter && config.initial_backoff_ms > 0 {
        rand::thread_rng().gen_range(0.0..=config.initial_backoff_ms as f64 * 0.1)
    } else {
        0.0
    };
    let capped = (base + jitter).min(config.max_backoff_ms as f64);
    Duration::from_millis(capped as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        }
    }

    #[test]
    fn test_exponential_backoff_without_jitter() {
        let config = no_jitter();
        assert_eq!(compute_exponential_backoff(&config, 0), Duration::from_millis(1000));
        assert_eq!(compute_exponential_backoff(&config, 1), Duration::from_millis(2000));
        assert_eq!(compute_exponential_backoff(&config, 2), Duration::from_millis(4000));
        assert_eq!(compute_exponential_backoff(&config, 10), Duration::from_millis(60_000));
    }

    #[test]
    fn test_jitter_bounded_by_ten_percent_of_base() {
        let config = RetryConfig::default();
        for _ in 0..100 {
            let delay = compute_exponential_backoff(&config, 1).as_millis() as u64;
            assert!((2000..=2100).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn test_retry_after_replaces_computed_delay() {
        let config = no_jitter();
        let err = LlmError::Network {
            message: "unavailable".into(),
            status: Some(503),
            retry_after_secs: Some(7),
        };
        assert_eq!(compute_backoff(&config, 0, &err), Duration::from_secs(7));
        let huge = LlmError::Network {
            message: "unavailable".into(),
            status: Some(503),
            retry_after_secs: Some(3600),
        };
        assert_eq!(compute_backoff(&config, 0, &huge), Duration::from_secs(60));
    }

    #[test]
    fn test_rate_limited_requires_opt_in() {
        let err = LlmError::RateLimited {
            provider: "openai".into(),
            message: "quota".into(),
            retry_after_secs: None,
        };
        assert!(!should_retry(&RetryConfig::default(), &err));
        let opted_in = RetryConfig {
            retry_rate_limited: true,
            ..RetryConfig::default()
        };
        assert!(should_retry(&opted_in, &err));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let (value, attempts) = with_retry(&no_jitter(), "m", move |_| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(LlmError::network("reset"))
                } else {
                    Ok("ok")
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, "ok");
        assert_eq!(attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_four_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<((), u32), _> = with_retry(&no_jitter(), "m", move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::timeout(Duration::from_secs(1)))
            }
        })
        .await;
        assert!(matches!(result, Err(LlmError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<((), u32), _> = with_retry(&no_jitter(), "m", move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::Authentication {
                    provider: "anthropic".into(),
                    message: "bad key".into(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(LlmError::Authentication { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_response_retried_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<((), u32), _> = with_retry(&no_jitter(), "m", move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::invalid_response("empty"))
            }
        })
        .await;
        assert!(matches!(result, Err(LlmError::InvalidResponse { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
