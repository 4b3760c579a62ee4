//! The autonomous decision cycle.
//!
//! For each watched symbol: quote, stop/take check, candles and indicators,
//! advisor recommendation, then the matching engine action. Every outbound
//! call goes through `Resilience`, and a failing collaborator degrades that
//! symbol to HOLD instead of aborting the cycle.

use crate::config::{PipelineConfig, WatchedSymbol};
use crate::domain::entities::position::{MarketType, Position, PositionSide};
use crate::domain::entities::trade::ExitReason;
use crate::domain::errors::TradingError;
use crate::domain::repositories::market_data::MarketDataProvider;
use crate::domain::repositories::trade_advisor::{AdvisoryRequest, PositionContext, TradeAdvisor};
use crate::domain::services::indicators::IndicatorSnapshot;
use crate::domain::services::trading_engine::TradingEngine;
use crate::domain::value_objects::decision::{AiDecision, Recommendation};
use crate::resilience::{Resilience, AI_ADVISOR_SERVICE, MARKET_DATA_SERVICE};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("A decision cycle is already running")]
    CycleInProgress,

    #[error(transparent)]
    Trading(#[from] TradingError),
}

/// What the pipeline did for a symbol
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DecisionAction {
    Opened {
        position_id: String,
        side: PositionSide,
        quantity: f64,
    },
    Closed {
        trade_id: String,
        exit_reason: String,
        profit_loss: f64,
    },
    /// The risk gate or the engine refused the trade
    Rejected { reasons: Vec<String> },
    /// Nothing to do
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolDecision {
    pub symbol: String,
    pub market_type: MarketType,
    pub price: Option<f64>,
    pub decision: AiDecision,
    /// True when the decision is a fallback rather than the advisor's answer
    pub degraded: bool,
    pub actions: Vec<DecisionAction>,
}

impl SymbolDecision {
    fn degraded(watched: &WatchedSymbol, price: Option<f64>, reason: String) -> Self {
        Self {
            symbol: watched.symbol.clone(),
            market_type: watched.market_type,
            price,
            decision: AiDecision::degraded(reason.clone()),
            degraded: true,
            actions: vec![DecisionAction::Skipped { reason }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub decisions: Vec<SymbolDecision>,
}

impl CycleReport {
    pub fn decision(&self, symbol: &str) -> Option<&SymbolDecision> {
        self.decisions.iter().find(|d| d.symbol == symbol)
    }

    pub fn actions(&self) -> impl Iterator<Item = &DecisionAction> {
        self.decisions.iter().flat_map(|d| d.actions.iter())
    }

    pub fn summary(&self) -> String {
        let mut opened = 0;
        let mut closed = 0;
        let mut rejected = 0;
        let mut failed = 0;
        for action in self.actions() {
            match action {
                DecisionAction::Opened { .. } => opened += 1,
                DecisionAction::Closed { .. } => closed += 1,
                DecisionAction::Rejected { .. } => rejected += 1,
                DecisionAction::Failed { .. } => failed += 1,
                DecisionAction::Skipped { .. } => {}
            }
        }
        let degraded = self.decisions.iter().filter(|d| d.degraded).count();
        format!(
            "{} symbols: {} opened, {} closed, {} rejected, {} failed, {} degraded",
            self.decisions.len(),
            opened,
            closed,
            rejected,
            failed,
            degraded
        )
    }
}

pub struct DecisionPipeline {
    market_data: Arc<dyn MarketDataProvider>,
    advisor: Arc<dyn TradeAdvisor>,
    engine: Arc<TradingEngine>,
    resilience: Arc<Resilience>,
    config: PipelineConfig,
    cycle_lock: Mutex<()>,
}

impl DecisionPipeline {
    pub fn new(
        market_data: Arc<dyn MarketDataProvider>,
        advisor: Arc<dyn TradeAdvisor>,
        engine: Arc<TradingEngine>,
        resilience: Arc<Resilience>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            market_data,
            advisor,
            engine,
            resilience,
            config,
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<TradingEngine> {
        &self.engine
    }

    /// Run one pass over the watch list.
    ///
    /// Returns `CycleInProgress` immediately if another cycle holds the lock.
    /// Per-symbol failures are reported in the `CycleReport`; only account
    /// bookkeeping failures abort the cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport, PipelineError> {
        let _guard = self
            .cycle_lock
            .try_lock()
            .map_err(|_| PipelineError::CycleInProgress)?;
        let started_at = Utc::now();
        info!(
            "Starting decision cycle over {} symbols",
            self.config.watchlist.len()
        );

        self.engine.ensure_account(self.config.user_id).await?;
        self.engine.roll_daily_counter().await?;
        self.engine.record_check().await?;

        let mut decisions = Vec::with_capacity(self.config.watchlist.len());
        for (index, watched) in self.config.watchlist.iter().enumerate() {
            if index > 0 && !self.config.inter_symbol_delay.is_zero() {
                tokio::time::sleep(self.config.inter_symbol_delay).await;
            }
            let decision = self.process_symbol(watched).await;
            info!(
                "{}: {} ({}){}",
                decision.symbol,
                decision.decision.recommendation,
                decision.decision.confidence,
                if decision.degraded { " [degraded]" } else { "" }
            );
            decisions.push(decision);
        }

        let report = CycleReport {
            started_at,
            finished_at: Utc::now(),
            decisions,
        };
        info!("✓ Decision cycle finished: {}", report.summary());
        Ok(report)
    }

    /// Run cycles every `cycle_interval` until `shutdown` resolves.
    ///
    /// A cycle already in flight is allowed to finish before the loop exits.
    pub async fn run_forever<S>(&self, shutdown: S) -> Result<(), PipelineError>
    where
        S: Future<Output = ()>,
    {
        self.engine.ensure_account(self.config.user_id).await?;
        self.engine.set_running(true).await?;
        info!(
            "✓ Pipeline running every {}s",
            self.config.cycle_interval.as_secs()
        );

        let mut interval = tokio::time::interval(self.config.cycle_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping pipeline");
                    break;
                }
                _ = interval.tick() => {
                    match self.run_cycle().await {
                        Ok(_) => {}
                        Err(PipelineError::CycleInProgress) => {
                            warn!("Skipping scheduled tick, previous cycle still running");
                        }
                        Err(e) => error!("Decision cycle failed: {}", e),
                    }
                }
            }
        }

        self.engine.set_running(false).await?;
        Ok(())
    }

    async fn process_symbol(&self, watched: &WatchedSymbol) -> SymbolDecision {
        let symbol = watched.symbol.as_str();
        let user_id = self.config.user_id;

        let price = match self
            .resilience
            .call(MARKET_DATA_SERVICE, || self.market_data.quote(symbol))
            .await
        {
            Ok(quote) => quote.price,
            Err(e) => {
                warn!("Quote for {} unavailable: {}", symbol, e);
                return SymbolDecision::degraded(
                    watched,
                    None,
                    format!("Market data unavailable: {}", e),
                );
            }
        };

        let mut actions = Vec::new();

        let mut position = match self.engine.current_position(user_id, symbol).await {
            Ok(position) => position,
            Err(e) => {
                error!("Failed to load position for {}: {}", symbol, e);
                let mut decision = SymbolDecision::degraded(
                    watched,
                    Some(price),
                    format!("Position lookup failed: {}", e),
                );
                decision.actions = vec![DecisionAction::Failed {
                    error: e.to_string(),
                }];
                return decision;
            }
        };

        if let Some(open) = &position {
            if let Some(trigger) = self.engine.risk().should_close_position(open, price) {
                info!(
                    "{} for {} at {} (exit {})",
                    trigger.reason, symbol, price, trigger.exit_price
                );
                let action = self
                    .close(open, trigger.exit_price, trigger.reason)
                    .await;
                if matches!(action, DecisionAction::Closed { .. }) {
                    position = None;
                }
                actions.push(action);
            }
        }

        let indicators = match self
            .resilience
            .call(MARKET_DATA_SERVICE, || {
                self.market_data.candles(
                    symbol,
                    &self.config.candle_interval,
                    self.config.candle_limit,
                )
            })
            .await
        {
            Ok(candles) => IndicatorSnapshot::compute(&candles),
            Err(e) => {
                warn!("Candles for {} unavailable, advising without indicators: {}", symbol, e);
                IndicatorSnapshot::default()
            }
        };

        let request = AdvisoryRequest {
            symbol: symbol.to_string(),
            market_type: watched.market_type,
            current_price: price,
            indicators,
            position: position
                .as_ref()
                .map(|p| PositionContext::from_position(p, price)),
        };

        let (decision, degraded) = match self
            .resilience
            .call(AI_ADVISOR_SERVICE, || self.advisor.recommend(&request))
            .await
        {
            Ok(decision) => (decision, false),
            Err(e) => {
                warn!("Advisor unavailable for {}, holding: {}", symbol, e);
                (AiDecision::degraded(format!("AI advisor unavailable: {}", e)), true)
            }
        };

        let recommendation = if decision.recommendation != Recommendation::Hold
            && decision.confidence < self.config.min_confidence
        {
            debug!(
                "{} {} below minimum confidence {}, holding",
                symbol, decision.confidence, self.config.min_confidence
            );
            Recommendation::Hold
        } else {
            decision.recommendation
        };

        let action = match (recommendation, position.as_ref()) {
            (Recommendation::Buy, None) => {
                self.open(watched, PositionSide::Long, price, &decision.reasoning)
                    .await
            }
            (Recommendation::Sell, None) if self.config.allow_short => {
                self.open(watched, PositionSide::Short, price, &decision.reasoning)
                    .await
            }
            (Recommendation::Sell, Some(open)) if open.side == PositionSide::Long => {
                self.close(open, price, ExitReason::AiSellSignal).await
            }
            (Recommendation::Buy, Some(open)) if open.side == PositionSide::Short => {
                self.close(open, price, ExitReason::AiBuySignal).await
            }
            (Recommendation::Hold, _) => skipped("hold"),
            (Recommendation::Sell, None) => skipped("short selling disabled"),
            (_, Some(open)) => skipped(&format!("{} position already open", open.side)),
        };
        actions.push(action);

        SymbolDecision {
            symbol: symbol.to_string(),
            market_type: watched.market_type,
            price: Some(price),
            decision,
            degraded,
            actions,
        }
    }

    async fn open(
        &self,
        watched: &WatchedSymbol,
        side: PositionSide,
        price: f64,
        reasoning: &str,
    ) -> DecisionAction {
        let user_id = self.config.user_id;
        let symbol = watched.symbol.as_str();

        let gate = match self.engine.can_open_trade(user_id, symbol).await {
            Ok(gate) => gate,
            Err(e) => return failed(symbol, e),
        };
        if !gate.allowed {
            let reasons: Vec<String> = gate.failures().map(|c| c.message.clone()).collect();
            info!("{} {} blocked: {}", side, symbol, reasons.join("; "));
            return DecisionAction::Rejected { reasons };
        }

        match self
            .engine
            .open_position(user_id, symbol, watched.market_type, side, price, reasoning)
            .await
        {
            Ok(opened) => DecisionAction::Opened {
                position_id: opened.position.id,
                side,
                quantity: opened.position.quantity,
            },
            Err(e) if e.is_rejection() => {
                info!("{} {} rejected [{}]: {}", side, symbol, e.error_code(), e);
                DecisionAction::Rejected {
                    reasons: vec![e.to_string()],
                }
            }
            Err(e) => failed(symbol, e),
        }
    }

    async fn close(&self, position: &Position, price: f64, reason: ExitReason) -> DecisionAction {
        match self.engine.close_position(&position.id, price, reason).await {
            Ok(closed) => DecisionAction::Closed {
                trade_id: closed.trade.id,
                exit_reason: closed.trade.exit_reason.to_string(),
                profit_loss: closed.trade.profit_loss,
            },
            Err(e) => failed(&position.symbol, e),
        }
    }
}

fn skipped(reason: &str) -> DecisionAction {
    DecisionAction::Skipped {
        reason: reason.to_string(),
    }
}

fn failed(symbol: &str, e: TradingError) -> DecisionAction {
    error!("Trade action for {} failed [{}]: {}", symbol, e.error_code(), e);
    DecisionAction::Failed {
        error: e.to_string(),
    }
}
