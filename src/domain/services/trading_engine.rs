//! Paper-trading execution.
//!
//! The engine owns the account through a `TradingStore` and turns
//! `RiskManager` outputs into opened and settled positions. Opening and
//! closing are serialized by an internal lock so the one-position-per-symbol
//! rule and balance settlement hold with concurrent callers.
//!
//! The balance only moves when a position is closed: opening a position
//! reserves nothing, so the balance is realized P&L only.

use crate::config::{AccountConfig, ResetMode};
use crate::domain::entities::position::{MarketType, Position, PositionSide};
use crate::domain::entities::trade::{ExitReason, Trade, TradeStats};
use crate::domain::errors::{StoreError, TradingError, ValidationError};
use crate::domain::repositories::trading_store::TradingStore;
use crate::domain::services::risk_manager::{
    AccountActivity, LastTradeOutcome, RiskManager, TradeGate,
};
use crate::domain::value_objects::price::{round_to, Price};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenedPosition {
    pub position: Position,
    pub position_value: f64,
    pub risk_amount: f64,
    pub risk_reward_ratio: f64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedPosition {
    pub trade: Trade,
    pub new_balance: f64,
    pub message: String,
}

/// Read-only view of the account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSnapshot {
    pub balance: f64,
    pub initial_balance: f64,
    pub total_profit_loss: f64,
    pub total_profit_loss_percent: f64,
    pub open_positions: Vec<Position>,
    /// Entry price times quantity, not marked to market
    pub open_positions_value: f64,
    pub stats: TradeStats,
    pub recent_trades: Vec<Trade>,
}

pub struct TradingEngine {
    store: Arc<dyn TradingStore>,
    risk: RiskManager,
    account: AccountConfig,
    trade_lock: Mutex<()>,
}

impl TradingEngine {
    pub fn new(store: Arc<dyn TradingStore>, risk: RiskManager, account: AccountConfig) -> Self {
        Self {
            store,
            risk,
            account,
            trade_lock: Mutex::new(()),
        }
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn store(&self) -> &Arc<dyn TradingStore> {
        &self.store
    }

    /// Create the account at the initial balance if it does not exist
    pub async fn ensure_account(&self, user_id: i64) -> Result<(), TradingError> {
        self.store
            .ensure_account(user_id, self.account.initial_balance)
            .await?;
        Ok(())
    }

    /// Evaluate the gating rules for `symbol` against the stored account
    pub async fn can_open_trade(&self, user_id: i64, symbol: &str) -> Result<TradeGate, TradingError> {
        let now = Utc::now();
        let balance = self.store.get_balance(user_id).await?;
        let status = self.store.bot_status().await?;
        let has_open_position = !self
            .store
            .positions_for_symbol(user_id, symbol)
            .await?
            .is_empty();
        let last_trade = self
            .store
            .last_trade(user_id)
            .await?
            .map(|trade| LastTradeOutcome {
                profit_loss: trade.profit_loss,
                closed_at: trade.closed_at,
            });

        let activity = AccountActivity {
            trades_today: status.trades_on(now.date_naive()),
            has_open_position,
            last_trade,
            now,
        };
        Ok(self.risk.can_open_trade(symbol, balance, &activity))
    }

    /// Size and record a new position.
    ///
    /// Gating rules are not evaluated here apart from the duplicate check;
    /// callers run `can_open_trade` first.
    pub async fn open_position(
        &self,
        user_id: i64,
        symbol: &str,
        market_type: MarketType,
        side: PositionSide,
        entry_price: f64,
        reasoning: &str,
    ) -> Result<OpenedPosition, TradingError> {
        let entry_price = Price::new(entry_price)?.value();
        if symbol.trim().is_empty() {
            return Err(ValidationError::InvalidSymbol("symbol must not be empty".to_string()).into());
        }

        let _guard = self.trade_lock.lock().await;

        if !self
            .store
            .positions_for_symbol(user_id, symbol)
            .await?
            .is_empty()
        {
            return Err(TradingError::DuplicatePosition {
                symbol: symbol.to_string(),
            });
        }

        let balance = self.store.get_balance(user_id).await?;
        let levels = self.risk.calculate_stop_levels(entry_price, side, market_type);
        let size = self
            .risk
            .calculate_position_size(balance, entry_price, levels.stop_loss, market_type);

        if size.error.is_some() {
            return Err(TradingError::DegenerateStop);
        }
        if size.quantity <= 0.0 {
            debug!(
                "Rejected {} {}: size {} at balance {:.2}",
                side, symbol, size.quantity, balance
            );
            return Err(TradingError::PositionTooSmall);
        }

        let now = Utc::now();
        let position = Position {
            id: Uuid::new_v4().to_string(),
            user_id,
            symbol: symbol.to_string(),
            market_type,
            side,
            entry_price,
            quantity: size.quantity,
            stop_loss: levels.stop_loss,
            take_profit: levels.take_profit,
            entry_reason: reasoning.to_string(),
            opened_at: now,
        };

        self.store.open_position(&position, now).await?;

        let message = format!("Opened {} position for {} at ${}", side, symbol, entry_price);
        info!(
            "✓ {} (qty {}, SL {}, TP {})",
            message, position.quantity, position.stop_loss, position.take_profit
        );

        Ok(OpenedPosition {
            position,
            position_value: size.position_value,
            risk_amount: size.risk_amount,
            risk_reward_ratio: levels.risk_reward_ratio,
            message,
        })
    }

    /// Settle an open position at `exit_price`
    pub async fn close_position(
        &self,
        position_id: &str,
        exit_price: f64,
        reason: ExitReason,
    ) -> Result<ClosedPosition, TradingError> {
        let exit_price = Price::new(exit_price)?.value();
        let _guard = self.trade_lock.lock().await;

        let position = self
            .store
            .get_position(position_id)
            .await?
            .ok_or_else(|| TradingError::PositionNotFound {
                position_id: position_id.to_string(),
            })?;

        let pnl = self.risk.calculate_profit_loss(
            position.entry_price,
            exit_price,
            position.quantity,
            position.side,
        );
        let trade = Trade::from_closed_position(
            Uuid::new_v4().to_string(),
            &position,
            exit_price,
            pnl,
            reason,
            Utc::now(),
        );

        let new_balance = match self.store.settle_position(&trade).await {
            Ok(balance) => balance,
            Err(StoreError::NotFound(_)) => {
                return Err(TradingError::PositionNotFound {
                    position_id: position_id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let outcome = if pnl.is_loss() { "loss" } else { "profit" };
        let message = format!(
            "Closed {} position for {} with {} of ${:.2} ({:+.2}%)",
            position.side,
            position.symbol,
            outcome,
            pnl.abs(),
            pnl.profit_loss_percent
        );
        info!("✓ {} [{}], balance now ${:.2}", message, trade.exit_reason, new_balance);

        Ok(ClosedPosition {
            trade,
            new_balance,
            message,
        })
    }

    /// Close every open position whose stop or take was crossed.
    ///
    /// Symbols missing from `prices` are skipped. One result per closed
    /// position; a failed close does not stop the others.
    pub async fn check_positions(
        &self,
        user_id: i64,
        prices: &HashMap<String, f64>,
    ) -> Result<Vec<Result<ClosedPosition, TradingError>>, TradingError> {
        let positions = self.store.open_positions(user_id).await?;
        let mut results = Vec::new();

        for position in positions {
            let Some(&price) = prices.get(&position.symbol) else {
                continue;
            };
            if let Some(trigger) = self.risk.should_close_position(&position, price) {
                info!(
                    "{} triggered for {} at {} (exit {})",
                    trigger.reason, position.symbol, price, trigger.exit_price
                );
                let result = self
                    .close_position(&position.id, trigger.exit_price, trigger.reason)
                    .await;
                if let Err(e) = &result {
                    warn!("Failed to close {}: {}", position.symbol, e);
                }
                results.push(result);
            }
        }

        Ok(results)
    }

    /// The open position for `symbol`, if any
    pub async fn current_position(
        &self,
        user_id: i64,
        symbol: &str,
    ) -> Result<Option<Position>, TradingError> {
        Ok(self
            .store
            .positions_for_symbol(user_id, symbol)
            .await?
            .into_iter()
            .next())
    }

    pub async fn get_portfolio(&self, user_id: i64) -> Result<PortfolioSnapshot, TradingError> {
        let balance = self.store.get_balance(user_id).await?;
        let open_positions = self.store.open_positions(user_id).await?;
        let stats = self.store.trade_stats(user_id).await?;
        let recent_trades = self
            .store
            .recent_trades(user_id, self.account.recent_trades_limit)
            .await?;

        let initial_balance = self.account.initial_balance;
        let total_profit_loss = round_to(balance - initial_balance, 2);
        let total_profit_loss_percent = if initial_balance > 0.0 {
            round_to(total_profit_loss / initial_balance * 100.0, 2)
        } else {
            0.0
        };
        let open_positions_value = round_to(
            open_positions.iter().map(Position::notional_value).sum(),
            2,
        );

        Ok(PortfolioSnapshot {
            balance,
            initial_balance,
            total_profit_loss,
            total_profit_loss_percent,
            open_positions,
            open_positions_value,
            stats,
            recent_trades,
        })
    }

    /// Restore the initial balance; `ResetMode::Full` also wipes positions,
    /// trade history and today's trade counter.
    pub async fn reset_account(&self, user_id: i64) -> Result<f64, TradingError> {
        let _guard = self.trade_lock.lock().await;
        let initial_balance = self.account.initial_balance;

        if self.account.reset_mode == ResetMode::Full {
            let positions = self.store.clear_positions(user_id).await?;
            let trades = self.store.clear_trades(user_id).await?;
            self.store
                .reset_daily_counter(Utc::now().date_naive())
                .await?;
            info!(
                "Cleared {} open position(s) and {} trade(s) for account {}",
                positions, trades, user_id
            );
        }

        self.store.set_balance(user_id, initial_balance).await?;
        info!(
            "✓ Account {} reset to ${:.2} ({})",
            user_id, initial_balance, self.account.reset_mode
        );
        Ok(initial_balance)
    }

    /// Zero the daily counter if the stored date is not today (UTC)
    pub async fn roll_daily_counter(&self) -> Result<bool, TradingError> {
        let today = Utc::now().date_naive();
        let status = self.store.bot_status().await?;
        if !status.needs_rollover(today) {
            return Ok(false);
        }
        self.store.reset_daily_counter(today).await?;
        info!(
            "New trading day {}, daily counter reset (was {} on {})",
            today, status.trades_today, status.counter_date
        );
        Ok(true)
    }

    pub async fn record_check(&self) -> Result<(), TradingError> {
        self.store.touch_last_check(Utc::now()).await?;
        Ok(())
    }

    pub async fn set_running(&self, running: bool) -> Result<(), TradingError> {
        self.store.set_running(running).await?;
        Ok(())
    }
}
