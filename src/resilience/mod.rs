//! Protection for calls to unreliable external services.
//!
//! `Resilience::call` is the single entry point used by every outbound call
//! site: it consults the service's circuit breaker, retries transient errors
//! with backoff while taking a rate-limiter token before each attempt, and
//! feeds the outcome back into the breaker.

pub mod circuit_breaker;
pub mod rate_limit;
pub mod retry;

use crate::config::ResilienceConfig;
use crate::domain::errors::ExternalError;
use circuit_breaker::{CircuitBreakerRegistry, CircuitBreakerStats};
use rate_limit::RateLimiterRegistry;
use retry::RetryPolicy;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const MARKET_DATA_SERVICE: &str = "market_data";
pub const AI_ADVISOR_SERVICE: &str = "ai_advisor";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResilienceError {
    #[error("Circuit open for service '{service}'")]
    CircuitOpen { service: String },

    #[error(transparent)]
    Upstream(#[from] ExternalError),
}

impl ResilienceError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen { .. })
    }
}

pub struct Resilience {
    limiters: RateLimiterRegistry,
    breakers: CircuitBreakerRegistry,
    retry: RetryPolicy,
    quota_cooldown: Duration,
}

impl Resilience {
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            limiters: RateLimiterRegistry::new(config.rate_limits, config.default_rate_limit),
            breakers: CircuitBreakerRegistry::new(config.breakers, config.default_breaker),
            retry: config.retry,
            quota_cooldown: config.quota_cooldown,
        }
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Run `operation` against `service` under its breaker, limiter and the
    /// retry policy.
    ///
    /// Only `ExternalError::Transient` is retried. A quota error opens the
    /// breaker for the quota cooldown; any other final error counts as one
    /// breaker failure.
    pub async fn call<F, Fut, T>(&self, service: &str, mut operation: F) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExternalError>>,
    {
        let breaker = self.breakers.get(service).await;
        if !breaker.can_attempt().await {
            debug!("Skipping call to '{}': circuit open", service);
            return Err(ResilienceError::CircuitOpen {
                service: service.to_string(),
            });
        }

        let limiter = self.limiters.get(service).await;
        let outcome = self
            .retry
            .execute_if(
                || {
                    let limiter = limiter.clone();
                    let attempt = operation();
                    async move {
                        limiter.acquire().await;
                        attempt.await
                    }
                },
                ExternalError::is_transient,
            )
            .await;

        match outcome {
            Ok(value) => {
                breaker.record_success().await;
                Ok(value)
            }
            Err(e) if e.is_quota() => {
                warn!("Quota exhausted for '{}': {}", service, e);
                breaker.trip(self.quota_cooldown).await;
                Err(e.into())
            }
            Err(e) => {
                breaker.record_failure().await;
                Err(e.into())
            }
        }
    }

    pub async fn breaker_stats(&self) -> Vec<(String, CircuitBreakerStats)> {
        self.breakers.all_stats().await
    }
}
