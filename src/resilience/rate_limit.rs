//! Token-bucket rate limiting for outbound calls.
//!
//! Callers that find the bucket empty wait in a FIFO queue. A single drain
//! task per limiter wakes every `window / max_tokens`, refills, and hands one
//! token to each waiter in arrival order. The task exits once the queue is
//! empty and is respawned by the next caller that has to wait.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Bucket capacity
    pub max_tokens: u32,
    /// Time to refill an empty bucket
    pub window: Duration,
}

impl RateLimiterConfig {
    pub fn new(max_tokens: u32, window: Duration) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
            window,
        }
    }

    /// Time for one token to regenerate
    pub fn refill_interval(&self) -> Duration {
        self.window / self.max_tokens.max(1)
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
    waiters: VecDeque<oneshot::Sender<()>>,
    draining: bool,
}

impl BucketState {
    fn refill(&mut self, config: &RateLimiterConfig, now: Instant) {
        let capacity = config.max_tokens as f64;
        let elapsed = now.saturating_duration_since(self.last_refill);

        if elapsed >= config.window {
            self.tokens = capacity;
        } else {
            let window_secs = config.window.as_secs_f64();
            let regenerated = if window_secs > 0.0 {
                elapsed.as_secs_f64() / window_secs * capacity
            } else {
                capacity
            };
            self.tokens = (self.tokens + regenerated).min(capacity);
        }
        self.last_refill = now;
    }
}

pub struct RateLimiter {
    name: String,
    config: RateLimiterConfig,
    state: Arc<Mutex<BucketState>>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Self {
        let state = BucketState {
            tokens: config.max_tokens as f64,
            last_refill: Instant::now(),
            waiters: VecDeque::new(),
            draining: false,
        };
        Self {
            name: name.into(),
            config,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Wait until a token is available and consume it.
    ///
    /// There is no cancellation: wrap in `tokio::time::timeout` if needed.
    pub async fn acquire(&self) {
        let ticket = {
            let mut state = self.state.lock().await;
            state.refill(&self.config, Instant::now());

            if state.waiters.is_empty() && state.tokens >= 1.0 {
                state.tokens -= 1.0;
                return;
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            debug!(
                "Rate limiter '{}' exhausted, {} caller(s) waiting",
                self.name,
                state.waiters.len()
            );

            if !state.draining {
                state.draining = true;
                tokio::spawn(drain(
                    self.state.clone(),
                    self.config.clone(),
                    self.name.clone(),
                ));
            }
            rx
        };

        // The drain task owns the bucket, so the sender is never dropped unsent
        let _ = ticket.await;
    }

    /// Tokens currently in the bucket, after refilling
    pub async fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock().await;
        state.refill(&self.config, Instant::now());
        state.tokens
    }

    pub async fn queued(&self) -> usize {
        self.state.lock().await.waiters.len()
    }
}

async fn drain(state: Arc<Mutex<BucketState>>, config: RateLimiterConfig, name: String) {
    let interval = config.refill_interval();

    loop {
        tokio::time::sleep(interval).await;

        let mut bucket = state.lock().await;
        bucket.refill(&config, Instant::now());

        while bucket.tokens >= 1.0 {
            let Some(waiter) = bucket.waiters.pop_front() else {
                break;
            };
            // A closed receiver means the caller went away; keep the token
            if waiter.send(()).is_ok() {
                bucket.tokens -= 1.0;
            }
        }

        if bucket.waiters.is_empty() {
            bucket.draining = false;
            debug!("Rate limiter '{}' queue drained", name);
            return;
        }
    }
}

/// One limiter per named service, created on first use
pub struct RateLimiterRegistry {
    configs: HashMap<String, RateLimiterConfig>,
    default_config: RateLimiterConfig,
    limiters: RwLock<HashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiterRegistry {
    pub fn new(configs: HashMap<String, RateLimiterConfig>, default_config: RateLimiterConfig) -> Self {
        Self {
            configs,
            default_config,
            limiters: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, service: &str) -> Arc<RateLimiter> {
        if let Some(limiter) = self.limiters.read().await.get(service) {
            return limiter.clone();
        }

        let mut limiters = self.limiters.write().await;
        limiters
            .entry(service.to_string())
            .or_insert_with(|| {
                let config = self
                    .configs
                    .get(service)
                    .cloned()
                    .unwrap_or_else(|| self.default_config.clone());
                Arc::new(RateLimiter::new(service, config))
            })
            .clone()
    }
}
