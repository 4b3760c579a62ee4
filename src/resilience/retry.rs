use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff with jitter.
///
/// `max_retries` bounds the total number of attempts, the first one included.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Upper bound of the random extra delay, as a fraction of the base delay
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Capped exponential delay for the 0-based `attempt`, without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    /// Delay before retrying after the 0-based `attempt` failed
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let max_jitter = base.as_secs_f64() * self.jitter_factor.max(0.0);
        if max_jitter <= 0.0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=max_jitter);
        base + Duration::from_secs_f64(jitter)
    }

    /// Run `operation` until it succeeds or attempts run out
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.execute_if(operation, |_| true).await
    }

    /// Like `execute`, but errors for which `retryable` is false are
    /// returned immediately.
    pub async fn execute_if<F, Fut, T, E, P>(&self, mut operation: F, retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let attempts = self.max_retries.max(1);
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < attempts && retryable(&e) => {
                    let delay = self.delay(attempt);
                    warn!(
                        "Operation failed (attempt {}/{}): {}, retrying in {:?}",
                        attempt + 1,
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }

    #[test]
    fn test_base_delay_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay(0), Duration::from_secs(1));
        assert_eq!(policy.base_delay(1), Duration::from_secs(2));
        assert_eq!(policy.base_delay(3), Duration::from_secs(8));
        assert_eq!(policy.base_delay(4), Duration::from_secs(10));
        assert_eq!(policy.base_delay(60), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_factor() {
        let policy = RetryPolicy::default();
        for attempt in 0..5 {
            let base = policy.base_delay(attempt);
            for _ in 0..20 {
                let delay = policy.delay(attempt);
                assert!(delay >= base);
                assert!(delay <= base.mul_f64(1.1) + Duration::from_micros(1));
            }
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<&str, String> = fast_policy(3)
            .execute(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("boom".to_string())
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
    async fn test_returns_last_error_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = fast_policy(3)
            .execute(|| {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    Err(format!("failure {}", n))
                }
            })
            .await;

        assert_eq!(result, Err("failure 2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = fast_policy(5)
            .execute_if(
                || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err("quota".to_string())
                    }
                },
                |e| e.as_str() != "quota",
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
