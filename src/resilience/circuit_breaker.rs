use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit breaker states following the standard pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests fail fast until the reset timeout elapses
    Open,
    /// Trial requests probe whether the service recovered
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Time spent open before trial requests are admitted
    pub reset_timeout: Duration,
    /// Trial requests admitted while half-open; this many successes close it
    pub half_open_max_requests: u32,
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            half_open_max_requests: 1,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    half_open_attempts: u32,
    half_open_successes: u32,
    last_failure_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
    /// Half-open trials with no outcome by this time are considered lost
    trial_deadline: Option<Instant>,
    last_state_change: Instant,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_attempts: 0,
            half_open_successes: 0,
            last_failure_at: None,
            next_attempt_at: None,
            trial_deadline: None,
            last_state_change: Instant::now(),
        }
    }

    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.half_open_attempts = 0;
        self.half_open_successes = 0;
        self.trial_deadline = None;
        self.last_state_change = Instant::now();
    }

    fn open_for(&mut self, cooldown: Duration) {
        self.transition(CircuitState::Open);
        self.next_attempt_at = Some(Instant::now() + cooldown);
    }
}

/// Three-state failure isolator for one external service.
///
/// - **Closed**: every call is admitted; consecutive failures are counted
/// - **Open**: calls are refused until `reset_timeout` has passed
/// - **Half-open**: up to `half_open_max_requests` trial calls are admitted;
///   enough successes close the breaker, any failure re-opens it
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Arc<Mutex<BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Arc::new(Mutex::new(BreakerState::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    /// Whether a call may go through now.
    ///
    /// Moves Open to HalfOpen once the timeout expired. Each admitted
    /// half-open call counts against the trial limit. Trials that report no
    /// outcome within `reset_timeout` (a cancelled caller) free their slots.
    pub async fn can_attempt(&self) -> bool {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let ready = state.next_attempt_at.map_or(true, |at| now >= at);
                if !ready {
                    return false;
                }
                state.transition(CircuitState::HalfOpen);
                info!("Circuit breaker '{}' half-open, admitting trial request", self.name);
                state.half_open_attempts = 1;
                state.trial_deadline = Some(now + self.config.reset_timeout);
                true
            }
            CircuitState::HalfOpen => {
                let abandoned = state.trial_deadline.map_or(false, |at| now >= at);
                if abandoned && state.half_open_attempts > state.half_open_successes {
                    warn!(
                        "Circuit breaker '{}' trial request never reported back, admitting a new one",
                        self.name
                    );
                    state.half_open_attempts = state.half_open_successes;
                }
                if state.half_open_attempts < self.config.half_open_max_requests {
                    state.half_open_attempts += 1;
                    state.trial_deadline = Some(now + self.config.reset_timeout);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        state.failure_count = 0;

        if state.state == CircuitState::HalfOpen {
            state.half_open_successes += 1;
            if state.half_open_successes >= self.config.half_open_max_requests {
                state.transition(CircuitState::Closed);
                state.next_attempt_at = None;
                info!("✓ Circuit breaker '{}' closed, service recovered", self.name);
            }
        }
    }

    pub async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        state.failure_count += 1;
        state.last_failure_at = Some(Instant::now());

        match state.state {
            CircuitState::Closed if state.failure_count >= self.config.failure_threshold => {
                state.open_for(self.config.reset_timeout);
                warn!(
                    "Circuit breaker '{}' opened after {} consecutive failures",
                    self.name, state.failure_count
                );
            }
            CircuitState::HalfOpen => {
                state.open_for(self.config.reset_timeout);
                warn!("Circuit breaker '{}' re-opened, trial request failed", self.name);
            }
            _ => {}
        }
    }

    /// Force the breaker open for `cooldown`, regardless of the failure count
    pub async fn trip(&self, cooldown: Duration) {
        let mut state = self.state.lock().await;
        state.failure_count += 1;
        state.last_failure_at = Some(Instant::now());
        state.open_for(cooldown);
        warn!(
            "Circuit breaker '{}' tripped for {}s",
            self.name,
            cooldown.as_secs()
        );
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        let state = self.state.lock().await;
        let now = Instant::now();
        CircuitBreakerStats {
            state: state.state,
            failure_count: state.failure_count,
            half_open_successes: state.half_open_successes,
            time_in_current_state: now.saturating_duration_since(state.last_state_change),
            time_since_last_failure: state
                .last_failure_at
                .map(|t| now.saturating_duration_since(t)),
            retry_in: state
                .next_attempt_at
                .filter(|_| state.state == CircuitState::Open)
                .map(|at| at.saturating_duration_since(now)),
        }
    }

    /// Manually reset the breaker to closed
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        *state = BreakerState::new();
        info!("Circuit breaker '{}' manually reset", self.name);
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_successes: u32,
    pub time_in_current_state: Duration,
    pub time_since_last_failure: Option<Duration>,
    /// Remaining cooldown while open
    pub retry_in: Option<Duration>,
}

/// One breaker per named service, created on first use
pub struct CircuitBreakerRegistry {
    configs: HashMap<String, CircuitBreakerConfig>,
    default_config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(
        configs: HashMap<String, CircuitBreakerConfig>,
        default_config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            configs,
            default_config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().await.get(service) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write().await;
        breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                let config = self
                    .configs
                    .get(service)
                    .cloned()
                    .unwrap_or_else(|| self.default_config.clone());
                Arc::new(CircuitBreaker::new(service, config))
            })
            .clone()
    }

    /// Snapshot of every breaker created so far
    pub async fn all_stats(&self) -> Vec<(String, CircuitBreakerStats)> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.read().await.values().cloned().collect();
        let mut stats = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            stats.push((breaker.name().to_string(), breaker.stats().await));
        }
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }
}
