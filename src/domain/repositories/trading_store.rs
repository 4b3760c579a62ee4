//! Persistence boundary of the trading engine.
//!
//! The engine never touches storage directly. Any implementation must make
//! `open_position` and `settle_position` atomic: the position insert and the
//! daily counter bump happen together, as do the position delete, the balance
//! credit and the trade insert.

use crate::domain::entities::account::BotStatus;
use crate::domain::entities::position::Position;
use crate::domain::entities::trade::{Trade, TradeStats};
use crate::domain::errors::StoreResult;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

#[async_trait]
pub trait TradingStore: Send + Sync {
    /// Create the account with `initial_balance` if it does not exist yet
    async fn ensure_account(&self, user_id: i64, initial_balance: f64) -> StoreResult<()>;

    async fn get_balance(&self, user_id: i64) -> StoreResult<f64>;

    async fn set_balance(&self, user_id: i64, balance: f64) -> StoreResult<()>;

    async fn get_position(&self, position_id: &str) -> StoreResult<Option<Position>>;

    async fn positions_for_symbol(&self, user_id: i64, symbol: &str) -> StoreResult<Vec<Position>>;

    async fn open_positions(&self, user_id: i64) -> StoreResult<Vec<Position>>;

    /// Atomically record the position and count one executed trade for the
    /// day of `at`, stamping the last-trade time
    async fn open_position(&self, position: &Position, at: DateTime<Utc>) -> StoreResult<()>;

    /// Atomically delete the traded position, credit its P&L to the
    /// account and record the trade. Returns the new balance.
    ///
    /// Fails with `StoreError::NotFound` when the position no longer exists.
    async fn settle_position(&self, trade: &Trade) -> StoreResult<f64>;

    async fn trade_stats(&self, user_id: i64) -> StoreResult<TradeStats>;

    /// Most recently closed trades, newest first
    async fn recent_trades(&self, user_id: i64, limit: u32) -> StoreResult<Vec<Trade>>;

    async fn last_trade(&self, user_id: i64) -> StoreResult<Option<Trade>>;

    async fn clear_positions(&self, user_id: i64) -> StoreResult<u64>;

    async fn clear_trades(&self, user_id: i64) -> StoreResult<u64>;

    async fn bot_status(&self) -> StoreResult<BotStatus>;

    /// Zero the daily counter and move it to `day`
    async fn reset_daily_counter(&self, day: NaiveDate) -> StoreResult<()>;

    async fn set_running(&self, running: bool) -> StoreResult<()>;

    async fn touch_last_check(&self, at: DateTime<Utc>) -> StoreResult<()>;
}
