//! Decision pipeline end-to-end tests
//!
//! Scripted market data and advisor fakes drive full cycles against an
//! in-memory store, covering trade actions, degradation to HOLD and the
//! cycle re-entrancy guard.

use async_trait::async_trait;
use chrono::Utc;
use paperdesk::application::services::decision_pipeline::{
    DecisionAction, DecisionPipeline, PipelineError,
};
use paperdesk::config::{
    AccountConfig, PipelineConfig, ResilienceConfig, RiskConfig, WatchedSymbol,
};
use paperdesk::domain::entities::position::{MarketType, PositionSide};
use paperdesk::domain::errors::ExternalError;
use paperdesk::domain::repositories::market_data::{MarketDataProvider, Quote};
use paperdesk::domain::repositories::trade_advisor::{AdvisoryRequest, TradeAdvisor};
use paperdesk::domain::services::indicators::Candle;
use paperdesk::domain::services::risk_manager::RiskManager;
use paperdesk::domain::services::trading_engine::TradingEngine;
use paperdesk::domain::value_objects::decision::{AiDecision, Confidence, Recommendation};
use paperdesk::persistence::{init_database, repository::SqliteTradingStore};
use paperdesk::resilience::circuit_breaker::CircuitState;
use paperdesk::resilience::rate_limit::RateLimiterConfig;
use paperdesk::resilience::retry::RetryPolicy;
use paperdesk::resilience::{Resilience, AI_ADVISOR_SERVICE};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct ScriptedMarket {
    prices: Mutex<HashMap<String, f64>>,
    outage: Mutex<Option<ExternalError>>,
    quote_calls: AtomicU32,
}

impl ScriptedMarket {
    fn set_price(&self, symbol: &str, price: f64) {
        self.prices
            .lock()
            .unwrap()
            .insert(symbol.to_string(), price);
    }

    fn fail_with(&self, error: ExternalError) {
        *self.outage.lock().unwrap() = Some(error);
    }
}

#[async_trait]
impl MarketDataProvider for ScriptedMarket {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn quote(&self, symbol: &str) -> Result<Quote, ExternalError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.outage.lock().unwrap().clone() {
            return Err(error);
        }
        let price = self
            .prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| ExternalError::Permanent(format!("unknown symbol {}", symbol)))?;
        Ok(Quote {
            symbol: symbol.to_string(),
            price,
            timestamp: Utc::now(),
        })
    }

    async fn candles(
        &self,
        symbol: &str,
        _interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExternalError> {
        let price = self.prices.lock().unwrap().get(symbol).copied().unwrap_or(1.0);
        let now = Utc::now();
        (0..limit.min(30))
            .rev()
            .map(|i| {
                Candle::new(
                    now - chrono::Duration::hours(i as i64 + 1),
                    price,
                    price * 1.01,
                    price * 0.99,
                    price,
                    1_000.0,
                )
                .map_err(|e| ExternalError::Parse(e.to_string()))
            })
            .collect()
    }
}

#[derive(Default)]
struct ScriptedAdvisor {
    advice: Mutex<HashMap<String, AiDecision>>,
    outage: Mutex<Option<ExternalError>>,
    delay: Mutex<Duration>,
    requests: Mutex<Vec<AdvisoryRequest>>,
    calls: AtomicU32,
}

impl ScriptedAdvisor {
    fn advise(&self, symbol: &str, recommendation: Recommendation, confidence: Confidence) {
        self.advice.lock().unwrap().insert(
            symbol.to_string(),
            AiDecision {
                recommendation,
                confidence,
                reasoning: format!("scripted {}", recommendation),
            },
        );
    }

    fn last_request(&self) -> Option<AdvisoryRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TradeAdvisor for ScriptedAdvisor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn recommend(&self, request: &AdvisoryRequest) -> Result<AiDecision, ExternalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.outage.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self
            .advice
            .lock()
            .unwrap()
            .get(&request.symbol)
            .cloned()
            .unwrap_or_else(|| AiDecision {
                recommendation: Recommendation::Hold,
                confidence: Confidence::Medium,
                reasoning: "no signal".to_string(),
            }))
    }
}

struct Harness {
    pipeline: Arc<DecisionPipeline>,
    engine: Arc<TradingEngine>,
    resilience: Arc<Resilience>,
    market: Arc<ScriptedMarket>,
    advisor: Arc<ScriptedAdvisor>,
}

async fn harness(symbols: &[(&str, MarketType)]) -> Harness {
    let pool = init_database("sqlite::memory:").await.unwrap();
    let engine = Arc::new(TradingEngine::new(
        Arc::new(SqliteTradingStore::new(pool)),
        RiskManager::new(RiskConfig::default()),
        AccountConfig::default(),
    ));

    let mut resilience_config = ResilienceConfig::default();
    resilience_config.rate_limits.clear();
    resilience_config.default_rate_limit = RateLimiterConfig::new(1_000, Duration::from_secs(1));
    resilience_config.retry = RetryPolicy {
        max_retries: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        backoff_multiplier: 2.0,
        jitter_factor: 0.0,
    };
    let resilience = Arc::new(Resilience::new(resilience_config));

    let market = Arc::new(ScriptedMarket::default());
    let advisor = Arc::new(ScriptedAdvisor::default());

    let config = PipelineConfig {
        watchlist: symbols
            .iter()
            .map(|(symbol, market_type)| WatchedSymbol {
                symbol: symbol.to_string(),
                market_type: *market_type,
            })
            .collect(),
        inter_symbol_delay: Duration::ZERO,
        cycle_interval: Duration::from_secs(60),
        ..PipelineConfig::default()
    };

    let pipeline = Arc::new(DecisionPipeline::new(
        market.clone(),
        advisor.clone(),
        engine.clone(),
        resilience.clone(),
        config,
    ));

    Harness {
        pipeline,
        engine,
        resilience,
        market,
        advisor,
    }
}

#[tokio::test]
async fn test_buy_opens_and_sell_closes() {
    let h = harness(&[("AAPL", MarketType::Stock)]).await;
    h.market.set_price("AAPL", 100.0);
    h.advisor.advise("AAPL", Recommendation::Buy, Confidence::High);

    let report = h.pipeline.run_cycle().await.unwrap();
    let aapl = report.decision("AAPL").unwrap();
    assert_eq!(aapl.price, Some(100.0));
    assert!(matches!(
        aapl.actions.as_slice(),
        [DecisionAction::Opened { side: PositionSide::Long, quantity, .. }] if *quantity == 80.0
    ));

    let request = h.advisor.last_request().unwrap();
    assert!(request.position.is_none());
    assert_eq!(request.indicators.candle_count, 30);

    h.market.set_price("AAPL", 104.0);
    h.advisor.advise("AAPL", Recommendation::Sell, Confidence::Medium);

    let report = h.pipeline.run_cycle().await.unwrap();
    let request = h.advisor.last_request().unwrap();
    let context = request.position.expect("advisor sees the open position");
    assert_eq!(context.entry_price, 100.0);
    assert_eq!(context.unrealized_pnl, 320.0);

    match report.decisions[0].actions.as_slice() {
        [DecisionAction::Closed {
            exit_reason,
            profit_loss,
            ..
        }] => {
            assert_eq!(exit_reason, "AI_SELL_SIGNAL");
            assert_eq!(*profit_loss, 320.0);
        }
        other => panic!("unexpected actions {:?}", other),
    }

    let portfolio = h.engine.get_portfolio(1).await.unwrap();
    assert_eq!(portfolio.balance, 10_320.0);
    assert!(portfolio.open_positions.is_empty());
}

#[tokio::test]
async fn test_stop_loss_is_checked_before_advice() {
    let h = harness(&[("AAPL", MarketType::Stock)]).await;
    h.market.set_price("AAPL", 100.0);
    h.advisor.advise("AAPL", Recommendation::Buy, Confidence::High);
    h.pipeline.run_cycle().await.unwrap();

    h.market.set_price("AAPL", 95.0);
    h.advisor.advise("AAPL", Recommendation::Hold, Confidence::High);
    let report = h.pipeline.run_cycle().await.unwrap();

    let actions = &report.decisions[0].actions;
    assert_eq!(actions.len(), 2);
    assert!(matches!(
        &actions[0],
        DecisionAction::Closed { exit_reason, profit_loss, .. }
            if exit_reason == "STOP_LOSS_HIT" && *profit_loss == -200.0
    ));
    assert_eq!(
        actions[1],
        DecisionAction::Skipped {
            reason: "hold".to_string()
        }
    );
    assert!(h.advisor.last_request().unwrap().position.is_none());
    assert_eq!(h.engine.get_portfolio(1).await.unwrap().balance, 9_800.0);
}

#[tokio::test]
async fn test_cooldown_rejects_buy_after_loss() {
    let h = harness(&[("AAPL", MarketType::Stock), ("MSFT", MarketType::Stock)]).await;
    h.market.set_price("AAPL", 100.0);
    h.market.set_price("MSFT", 400.0);
    h.advisor.advise("AAPL", Recommendation::Buy, Confidence::High);
    h.pipeline.run_cycle().await.unwrap();

    h.market.set_price("AAPL", 90.0);
    h.advisor.advise("AAPL", Recommendation::Hold, Confidence::High);
    h.advisor.advise("MSFT", Recommendation::Buy, Confidence::High);
    let report = h.pipeline.run_cycle().await.unwrap();

    match report.decision("MSFT").unwrap().actions.as_slice() {
        [DecisionAction::Rejected { reasons }] => {
            assert_eq!(reasons.len(), 1);
            assert!(reasons[0].starts_with("Cooling down after a loss"));
        }
        other => panic!("unexpected actions {:?}", other),
    }
    assert!(h.engine.current_position(1, "MSFT").await.unwrap().is_none());
}

#[tokio::test]
async fn test_advisor_quota_degrades_to_hold_and_opens_breaker() {
    let h = harness(&[("AAPL", MarketType::Stock), ("EUR/USD", MarketType::Forex)]).await;
    h.market.set_price("AAPL", 100.0);
    h.market.set_price("EUR/USD", 1.1);
    *h.advisor.outage.lock().unwrap() = Some(ExternalError::Quota("429".to_string()));

    let report = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(report.decisions.len(), 2);
    for decision in &report.decisions {
        assert!(decision.degraded);
        assert_eq!(decision.decision.recommendation, Recommendation::Hold);
        assert_eq!(decision.decision.confidence, Confidence::Low);
        assert!(decision.decision.reasoning.starts_with("AI advisor unavailable"));
        assert!(decision.price.is_some());
    }

    // the quota error is not retried and the second symbol never reaches the advisor
    assert_eq!(h.advisor.calls.load(Ordering::SeqCst), 1);
    let breaker = h.resilience.breakers().get(AI_ADVISOR_SERVICE).await;
    assert_eq!(breaker.state().await, CircuitState::Open);
    assert!(h.engine.get_portfolio(1).await.unwrap().open_positions.is_empty());
}

#[tokio::test]
async fn test_market_data_outage_degrades_every_symbol() {
    let h = harness(&[("AAPL", MarketType::Stock), ("BTC/USD", MarketType::Crypto)]).await;
    h.market
        .fail_with(ExternalError::Transient("connection reset".to_string()));

    let report = h.pipeline.run_cycle().await.unwrap();
    for decision in &report.decisions {
        assert!(decision.degraded);
        assert_eq!(decision.price, None);
        assert!(decision.decision.reasoning.starts_with("Market data unavailable"));
    }
    // two attempts per symbol
    assert_eq!(h.market.quote_calls.load(Ordering::SeqCst), 4);
    assert_eq!(h.advisor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_concurrent_cycle_is_rejected() {
    let h = harness(&[("AAPL", MarketType::Stock)]).await;
    h.market.set_price("AAPL", 100.0);
    *h.advisor.delay.lock().unwrap() = Duration::from_millis(300);

    let pipeline = h.pipeline.clone();
    let first = tokio::spawn(async move { pipeline.run_cycle().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = h.pipeline.run_cycle().await;
    assert!(matches!(second, Err(PipelineError::CycleInProgress)));

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.decisions.len(), 1);

    // the guard is released once the cycle finishes
    assert!(h.pipeline.run_cycle().await.is_ok());
}

#[tokio::test]
async fn test_scheduled_tick_skips_while_cycle_runs() {
    let h = harness(&[("AAPL", MarketType::Stock)]).await;
    h.market.set_price("AAPL", 100.0);
    *h.advisor.delay.lock().unwrap() = Duration::from_millis(300);

    let pipeline = h.pipeline.clone();
    let manual = tokio::spawn(async move { pipeline.run_cycle().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let pipeline = h.pipeline.clone();
    let scheduler = tokio::spawn(async move {
        pipeline
            .run_forever(async {
                let _ = stop_rx.await;
            })
            .await
    });

    assert!(manual.await.unwrap().is_ok());
    // the first tick landed on the running cycle and was skipped
    assert_eq!(h.advisor.calls.load(Ordering::SeqCst), 1);
    assert!(!scheduler.is_finished());

    stop_tx.send(()).unwrap();
    assert!(scheduler.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_run_forever_toggles_running_flag() {
    let h = harness(&[("AAPL", MarketType::Stock)]).await;
    h.market.set_price("AAPL", 100.0);

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let pipeline = h.pipeline.clone();
    let task = tokio::spawn(async move {
        pipeline
            .run_forever(async {
                let _ = stop_rx.await;
            })
            .await
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    let status = h.engine.store().bot_status().await.unwrap();
    assert!(status.running);
    assert!(status.last_check_at.is_some());
    assert_eq!(h.advisor.calls.load(Ordering::SeqCst), 1);

    stop_tx.send(()).unwrap();
    task.await.unwrap().unwrap();
    assert!(!h.engine.store().bot_status().await.unwrap().running);
}
