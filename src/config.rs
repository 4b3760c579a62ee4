use crate::domain::entities::position::MarketType;
use crate::domain::value_objects::decision::Confidence;
use crate::persistence::DatabaseConfig;
use crate::resilience::{
    circuit_breaker::CircuitBreakerConfig, rate_limit::RateLimiterConfig, retry::RetryPolicy,
    AI_ADVISOR_SERVICE, MARKET_DATA_SERVICE,
};
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// How stop-loss and take-profit distances are measured
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopRule {
    /// Fractions of the entry price (0.025 = 2.5%)
    Percent {
        stop_loss_pct: f64,
        take_profit_pct: f64,
    },
    /// Fixed pip counts
    Pips {
        pip_size: f64,
        stop_loss_pips: f64,
        take_profit_pips: f64,
    },
}

/// How a raw position size is snapped to a tradeable quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LotRounding {
    Floor(u32),
    Round(u32),
}

impl LotRounding {
    pub fn decimals(&self) -> u32 {
        match self {
            LotRounding::Floor(d) | LotRounding::Round(d) => *d,
        }
    }

    pub fn apply(&self, quantity: f64) -> f64 {
        use crate::domain::value_objects::price::{floor_to, round_to};
        match self {
            LotRounding::Floor(d) => floor_to(quantity, *d),
            LotRounding::Round(d) => round_to(quantity, *d),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketRiskParams {
    pub stops: StopRule,
    pub lot_rounding: LotRounding,
}

/// Parameters consumed by `RiskManager`
#[derive(Debug, Clone, PartialEq)]
pub struct RiskConfig {
    pub max_risk_per_trade: f64,
    pub max_trades_per_day: u32,
    pub minimum_balance: f64,
    pub loss_cooldown: Duration,
    /// Upper bound of a position's value as a fraction of balance
    pub max_position_value_fraction: f64,
    pub stock: MarketRiskParams,
    pub forex: MarketRiskParams,
    pub crypto: MarketRiskParams,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_risk_per_trade: 0.02,
            max_trades_per_day: 10,
            minimum_balance: 100.0,
            loss_cooldown: Duration::from_secs(15 * 60),
            max_position_value_fraction: 0.95,
            stock: MarketRiskParams {
                stops: StopRule::Percent {
                    stop_loss_pct: 0.025,
                    take_profit_pct: 0.05,
                },
                lot_rounding: LotRounding::Floor(0),
            },
            forex: MarketRiskParams {
                stops: StopRule::Pips {
                    pip_size: 0.0001,
                    stop_loss_pips: 20.0,
                    take_profit_pips: 40.0,
                },
                lot_rounding: LotRounding::Round(2),
            },
            crypto: MarketRiskParams {
                stops: StopRule::Percent {
                    stop_loss_pct: 0.03,
                    take_profit_pct: 0.06,
                },
                lot_rounding: LotRounding::Floor(6),
            },
        }
    }
}

impl RiskConfig {
    pub fn market(&self, market_type: MarketType) -> &MarketRiskParams {
        match market_type {
            MarketType::Stock => &self.stock,
            MarketType::Forex => &self.forex,
            MarketType::Crypto => &self.crypto,
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_risk_per_trade: env_parse("MAX_RISK_PER_TRADE", defaults.max_risk_per_trade, |v| {
                *v > 0.0 && *v <= 0.1
            }),
            max_trades_per_day: env_parse("MAX_TRADES_PER_DAY", defaults.max_trades_per_day, |v| {
                *v > 0
            }),
            loss_cooldown: Duration::from_secs(
                60 * env_parse(
                    "LOSS_COOLDOWN_MINUTES",
                    defaults.loss_cooldown.as_secs() / 60,
                    |_| true,
                ),
            ),
            ..defaults
        }
    }
}

/// What `reset_account` wipes besides the balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetMode {
    /// Restore the balance only; positions, history and counters survive
    #[default]
    BalanceOnly,
    /// Also close out positions, trade history and today's counter
    Full,
}

impl FromStr for ResetMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "balance_only" | "balance" => Ok(ResetMode::BalanceOnly),
            "full" => Ok(ResetMode::Full),
            other => Err(format!("unknown reset mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountConfig {
    pub initial_balance: f64,
    pub reset_mode: ResetMode,
    /// Number of trades listed in the portfolio snapshot
    pub recent_trades_limit: u32,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            reset_mode: ResetMode::BalanceOnly,
            recent_trades_limit: 10,
        }
    }
}

impl AccountConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            initial_balance: env_parse("INITIAL_BALANCE", defaults.initial_balance, |v| *v > 0.0),
            reset_mode: env_parse("ACCOUNT_RESET_MODE", defaults.reset_mode, |_| true),
            ..defaults
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedSymbol {
    pub symbol: String,
    pub market_type: MarketType,
}

/// Parse a watch list such as `AAPL:stock,EUR/USD:forex`.
///
/// Entries without a market type default to stock; malformed entries are
/// skipped with a warning.
pub fn parse_watchlist(raw: &str) -> Vec<WatchedSymbol> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let (symbol, market) = match entry.rsplit_once(':') {
                Some((symbol, market)) => (symbol.trim(), market.parse::<MarketType>()),
                None => (entry, Ok(MarketType::Stock)),
            };
            match market {
                Ok(market_type) if !symbol.is_empty() => Some(WatchedSymbol {
                    symbol: symbol.to_uppercase(),
                    market_type,
                }),
                Ok(_) => {
                    tracing::warn!("Ignoring watch list entry '{}': empty symbol", entry);
                    None
                }
                Err(e) => {
                    tracing::warn!("Ignoring watch list entry '{}': {}", entry, e);
                    None
                }
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub user_id: i64,
    pub watchlist: Vec<WatchedSymbol>,
    pub inter_symbol_delay: Duration,
    pub cycle_interval: Duration,
    pub candle_interval: String,
    pub candle_limit: usize,
    /// Recommendations below this confidence are treated as HOLD
    pub min_confidence: Confidence,
    /// Whether a SELL with no open position opens a short
    pub allow_short: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            user_id: 1,
            watchlist: parse_watchlist("AAPL:stock,MSFT:stock,EUR/USD:forex,BTC/USD:crypto"),
            inter_symbol_delay: Duration::from_secs(5),
            cycle_interval: Duration::from_secs(900),
            candle_interval: "1h".to_string(),
            candle_limit: 100,
            min_confidence: Confidence::Medium,
            allow_short: false,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let watchlist = match std::env::var("WATCHLIST") {
            Ok(raw) => {
                let parsed = parse_watchlist(&raw);
                if parsed.is_empty() {
                    tracing::warn!("WATCHLIST '{}' has no valid entries, using default", raw);
                    defaults.watchlist.clone()
                } else {
                    parsed
                }
            }
            Err(_) => defaults.watchlist.clone(),
        };

        Self {
            watchlist,
            inter_symbol_delay: Duration::from_secs(env_parse(
                "INTER_SYMBOL_DELAY_SECS",
                defaults.inter_symbol_delay.as_secs(),
                |_| true,
            )),
            cycle_interval: Duration::from_secs(env_parse(
                "CYCLE_INTERVAL_SECS",
                defaults.cycle_interval.as_secs(),
                |v| *v >= 60,
            )),
            candle_interval: std::env::var("CANDLE_INTERVAL")
                .unwrap_or_else(|_| defaults.candle_interval.clone()),
            candle_limit: env_parse("CANDLE_LIMIT", defaults.candle_limit, |v| {
                (30..=5000).contains(v)
            }),
            min_confidence: env_parse("MIN_CONFIDENCE", defaults.min_confidence, |_| true),
            allow_short: env_flag("ALLOW_SHORT", defaults.allow_short),
            ..defaults
        }
    }
}

/// Limits, breakers and retry policy for external collaborators
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub rate_limits: HashMap<String, RateLimiterConfig>,
    pub breakers: HashMap<String, CircuitBreakerConfig>,
    pub default_rate_limit: RateLimiterConfig,
    pub default_breaker: CircuitBreakerConfig,
    pub retry: RetryPolicy,
    /// How long a breaker stays open after a quota error
    pub quota_cooldown: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        let mut rate_limits = HashMap::new();
        rate_limits.insert(
            MARKET_DATA_SERVICE.to_string(),
            RateLimiterConfig::new(8, Duration::from_secs(60)),
        );
        rate_limits.insert(
            AI_ADVISOR_SERVICE.to_string(),
            RateLimiterConfig::new(15, Duration::from_secs(60)),
        );

        let mut breakers = HashMap::new();
        breakers.insert(
            MARKET_DATA_SERVICE.to_string(),
            CircuitBreakerConfig::new(5, Duration::from_secs(60)),
        );
        breakers.insert(
            AI_ADVISOR_SERVICE.to_string(),
            CircuitBreakerConfig::new(3, Duration::from_secs(120)),
        );

        Self {
            rate_limits,
            breakers,
            default_rate_limit: RateLimiterConfig::new(10, Duration::from_secs(60)),
            default_breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            quota_cooldown: Duration::from_secs(3600),
        }
    }
}

impl ResilienceConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        let market_rpm = env_parse("MARKET_DATA_REQUESTS_PER_MINUTE", 8u32, |v| *v > 0);
        config.rate_limits.insert(
            MARKET_DATA_SERVICE.to_string(),
            RateLimiterConfig::new(market_rpm, Duration::from_secs(60)),
        );
        let advisor_rpm = env_parse("AI_REQUESTS_PER_MINUTE", 15u32, |v| *v > 0);
        config.rate_limits.insert(
            AI_ADVISOR_SERVICE.to_string(),
            RateLimiterConfig::new(advisor_rpm, Duration::from_secs(60)),
        );

        config.retry.max_retries = env_parse("RETRY_MAX_ATTEMPTS", config.retry.max_retries, |v| {
            (1..=10).contains(v)
        });
        config.quota_cooldown = Duration::from_secs(env_parse(
            "QUOTA_COOLDOWN_SECS",
            config.quota_cooldown.as_secs(),
            |_| true,
        ));

        config
    }

    pub fn rate_limit_for(&self, service: &str) -> RateLimiterConfig {
        self.rate_limits
            .get(service)
            .cloned()
            .unwrap_or_else(|| self.default_rate_limit.clone())
    }

    pub fn breaker_for(&self, service: &str) -> CircuitBreakerConfig {
        self.breakers
            .get(service)
            .cloned()
            .unwrap_or_else(|| self.default_breaker.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketDataConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl MarketDataConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("TWELVE_DATA_BASE_URL")
                .unwrap_or_else(|_| "https://api.twelvedata.com".to_string()),
            api_key: std::env::var("TWELVE_DATA_API_KEY").ok(),
            timeout: Duration::from_secs(env_parse("MARKET_DATA_TIMEOUT_SECS", 10, |v| *v > 0)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdvisorConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl AdvisorConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key: std::env::var("LLM_API_KEY").ok(),
            model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            temperature: env_parse("LLM_TEMPERATURE", 0.2f32, |v| (0.0..=2.0).contains(v)),
            timeout: Duration::from_secs(env_parse("LLM_TIMEOUT_SECS", 30, |v| *v > 0)),
        }
    }
}

/// Everything the binary needs, read once at startup
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub risk: RiskConfig,
    pub account: AccountConfig,
    pub pipeline: PipelineConfig,
    pub resilience: ResilienceConfig,
    pub database: DatabaseConfig,
    pub market_data: MarketDataConfig,
    pub advisor: AdvisorConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            risk: RiskConfig::from_env(),
            account: AccountConfig::from_env(),
            pipeline: PipelineConfig::from_env(),
            resilience: ResilienceConfig::from_env(),
            database: DatabaseConfig::from_env(),
            market_data: MarketDataConfig::from_env(),
            advisor: AdvisorConfig::from_env(),
        }
    }
}

/// Read `key` from the environment, keeping `default` when it is unset,
/// unparseable or rejected by `valid`.
fn env_parse<T>(key: &str, default: T, valid: impl Fn(&T) -> bool) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Ok(raw) = std::env::var(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        Ok(value) => {
            tracing::warn!(
                "Invalid {} value: {} (out of range), using default: {}",
                key,
                value,
                default
            );
            default
        }
        Err(e) => {
            tracing::warn!(
                "Failed to parse {} '{}': {}, using default: {}",
                key,
                raw,
                e,
                default
            );
            default
        }
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => value.eq_ignore_ascii_case("true") || value == "1",
        Err(_) => default,
    }
}

impl Display for ResetMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResetMode::BalanceOnly => f.write_str("balance_only"),
            ResetMode::Full => f.write_str("full"),
        }
    }
}
