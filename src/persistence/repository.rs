//! Database Repository
//!
//! `TradingStore` backed by SQLite.

use super::models::{BotStatusRecord, PositionRecord, TradeRecord};
use super::DbPool;
use crate::domain::entities::account::BotStatus;
use crate::domain::entities::position::Position;
use crate::domain::entities::trade::{Trade, TradeStats};
use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::repositories::trading_store::TradingStore;
use crate::domain::value_objects::price::round_to;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, error};

const POSITION_COLUMNS: &str = "id, user_id, symbol, market_type, side, entry_price, quantity, \
     stop_loss, take_profit, entry_reason, opened_at";

const TRADE_COLUMNS: &str = "id, position_id, user_id, symbol, market_type, side, entry_price, \
     exit_price, quantity, stop_loss, take_profit, profit_loss, profit_loss_percent, \
     entry_reason, exit_reason, opened_at, closed_at";

fn query_error(context: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| {
        error!("Failed to {}: {}", context, e);
        StoreError::Query(format!("Failed to {}: {}", context, e))
    }
}

pub struct SqliteTradingStore {
    pool: DbPool,
}

impl SqliteTradingStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TradingStore for SqliteTradingStore {
    async fn ensure_account(&self, user_id: i64, initial_balance: f64) -> StoreResult<()> {
        let inserted = sqlx::query("INSERT OR IGNORE INTO accounts (id, balance) VALUES (?1, ?2)")
            .bind(user_id)
            .bind(initial_balance)
            .execute(&self.pool)
            .await
            .map_err(query_error("create account"))?
            .rows_affected();

        if inserted > 0 {
            debug!("Created account {} with balance {:.2}", user_id, initial_balance);
        }
        Ok(())
    }

    async fn get_balance(&self, user_id: i64) -> StoreResult<f64> {
        let balance: Option<(f64,)> = sqlx::query_as("SELECT balance FROM accounts WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("read balance"))?;

        balance
            .map(|(b,)| b)
            .ok_or_else(|| StoreError::NotFound(format!("account {}", user_id)))
    }

    async fn set_balance(&self, user_id: i64, balance: f64) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, balance) VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET balance = excluded.balance, updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(user_id)
        .bind(balance)
        .execute(&self.pool)
        .await
        .map_err(query_error("set balance"))?;

        debug!("Set balance of account {} to {:.2}", user_id, balance);
        Ok(())
    }

    async fn get_position(&self, position_id: &str) -> StoreResult<Option<Position>> {
        let sql = format!("SELECT {} FROM positions WHERE id = ?1", POSITION_COLUMNS);
        let record = sqlx::query_as::<_, PositionRecord>(&sql)
            .bind(position_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("get position"))?;

        record.map(Position::try_from).transpose()
    }

    async fn positions_for_symbol(&self, user_id: i64, symbol: &str) -> StoreResult<Vec<Position>> {
        let sql = format!(
            "SELECT {} FROM positions WHERE user_id = ?1 AND symbol = ?2 ORDER BY opened_at",
            POSITION_COLUMNS
        );
        let records = sqlx::query_as::<_, PositionRecord>(&sql)
            .bind(user_id)
            .bind(symbol)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("list positions for symbol"))?;

        records.into_iter().map(Position::try_from).collect()
    }

    async fn open_positions(&self, user_id: i64) -> StoreResult<Vec<Position>> {
        let sql = format!(
            "SELECT {} FROM positions WHERE user_id = ?1 ORDER BY opened_at",
            POSITION_COLUMNS
        );
        let records = sqlx::query_as::<_, PositionRecord>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("list open positions"))?;

        records.into_iter().map(Position::try_from).collect()
    }

    async fn open_position(&self, position: &Position, at: DateTime<Utc>) -> StoreResult<()> {
        // Dropping `tx` without commit rolls everything back
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_error("begin position open"))?;

        sqlx::query(
            r#"
            INSERT INTO positions (
                id, user_id, symbol, market_type, side, entry_price, quantity,
                stop_loss, take_profit, entry_reason, opened_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&position.id)
        .bind(position.user_id)
        .bind(&position.symbol)
        .bind(position.market_type.as_str())
        .bind(position.side.as_str())
        .bind(position.entry_price)
        .bind(position.quantity)
        .bind(position.stop_loss)
        .bind(position.take_profit)
        .bind(&position.entry_reason)
        .bind(position.opened_at)
        .execute(&mut *tx)
        .await
        .map_err(query_error("insert position"))?;

        let counted = sqlx::query(
            r#"
            UPDATE bot_status
            SET trades_today = CASE WHEN counter_date = ?2 THEN trades_today + 1 ELSE 1 END,
                counter_date = ?2,
                last_trade_at = ?1
            WHERE id = 1
            "#,
        )
        .bind(at)
        .bind(at.date_naive())
        .execute(&mut *tx)
        .await
        .map_err(query_error("count opened trade"))?
        .rows_affected();
        if counted == 0 {
            return Err(StoreError::NotFound("bot status".to_string()));
        }

        tx.commit()
            .await
            .map_err(query_error("commit position open"))?;

        debug!("Opened position {} for {}", position.id, position.symbol);
        Ok(())
    }

    async fn settle_position(&self, trade: &Trade) -> StoreResult<f64> {
        // Dropping `tx` without commit rolls everything back
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_error("begin settlement"))?;

        let deleted = sqlx::query("DELETE FROM positions WHERE id = ?1")
            .bind(&trade.position_id)
            .execute(&mut *tx)
            .await
            .map_err(query_error("delete position"))?
            .rows_affected();
        if deleted == 0 {
            return Err(StoreError::NotFound(format!("position {}", trade.position_id)));
        }

        let credited = sqlx::query(
            "UPDATE accounts SET balance = balance + ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
        )
        .bind(trade.profit_loss)
        .bind(trade.user_id)
        .execute(&mut *tx)
        .await
        .map_err(query_error("credit realized P&L"))?
        .rows_affected();
        if credited == 0 {
            return Err(StoreError::NotFound(format!("account {}", trade.user_id)));
        }

        let (balance,): (f64,) = sqlx::query_as("SELECT balance FROM accounts WHERE id = ?1")
            .bind(trade.user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(query_error("read settled balance"))?;

        sqlx::query(
            r#"
            INSERT INTO trades (
                id, position_id, user_id, symbol, market_type, side, entry_price,
                exit_price, quantity, stop_loss, take_profit, profit_loss,
                profit_loss_percent, entry_reason, exit_reason, opened_at, closed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.position_id)
        .bind(trade.user_id)
        .bind(&trade.symbol)
        .bind(trade.market_type.as_str())
        .bind(trade.side.as_str())
        .bind(trade.entry_price)
        .bind(trade.exit_price)
        .bind(trade.quantity)
        .bind(trade.stop_loss)
        .bind(trade.take_profit)
        .bind(trade.profit_loss)
        .bind(trade.profit_loss_percent)
        .bind(&trade.entry_reason)
        .bind(trade.exit_reason.as_str())
        .bind(trade.opened_at)
        .bind(trade.closed_at)
        .execute(&mut *tx)
        .await
        .map_err(query_error("insert trade"))?;

        tx.commit().await.map_err(query_error("commit settlement"))?;

        debug!(
            "Settled position {} into trade {} (P&L {:.2})",
            trade.position_id, trade.id, trade.profit_loss
        );
        Ok(balance)
    }

    async fn trade_stats(&self, user_id: i64) -> StoreResult<TradeStats> {
        let (total, wins, avg_percent, total_pnl): (i64, i64, f64, f64) = sqlx::query_as(
            r#"
            SELECT
                CAST(COUNT(*) AS INTEGER),
                CAST(COALESCE(SUM(CASE WHEN profit_loss > 0 THEN 1 ELSE 0 END), 0) AS INTEGER),
                CAST(COALESCE(AVG(profit_loss_percent), 0.0) AS REAL),
                CAST(COALESCE(SUM(profit_loss), 0.0) AS REAL)
            FROM trades
            WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(query_error("aggregate trade stats"))?;

        let total_trades = u64::try_from(total).unwrap_or(0);
        let winning_trades = u64::try_from(wins).unwrap_or(0);
        let win_rate = if total_trades > 0 {
            round_to(winning_trades as f64 / total_trades as f64 * 100.0, 2)
        } else {
            0.0
        };

        Ok(TradeStats {
            total_trades,
            winning_trades,
            win_rate,
            average_return_percent: round_to(avg_percent, 2),
            total_profit_loss: round_to(total_pnl, 2),
        })
    }

    async fn recent_trades(&self, user_id: i64, limit: u32) -> StoreResult<Vec<Trade>> {
        let sql = format!(
            "SELECT {} FROM trades WHERE user_id = ?1 ORDER BY closed_at DESC, rowid DESC LIMIT ?2",
            TRADE_COLUMNS
        );
        let records = sqlx::query_as::<_, TradeRecord>(&sql)
            .bind(user_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("list recent trades"))?;

        records.into_iter().map(Trade::try_from).collect()
    }

    async fn last_trade(&self, user_id: i64) -> StoreResult<Option<Trade>> {
        Ok(self.recent_trades(user_id, 1).await?.into_iter().next())
    }

    async fn clear_positions(&self, user_id: i64) -> StoreResult<u64> {
        let removed = sqlx::query("DELETE FROM positions WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(query_error("clear positions"))?
            .rows_affected();
        Ok(removed)
    }

    async fn clear_trades(&self, user_id: i64) -> StoreResult<u64> {
        let removed = sqlx::query("DELETE FROM trades WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(query_error("clear trades"))?
            .rows_affected();
        Ok(removed)
    }

    async fn bot_status(&self) -> StoreResult<BotStatus> {
        let record = sqlx::query_as::<_, BotStatusRecord>(
            r#"
            SELECT running, trades_today, counter_date, last_trade_at, last_check_at
            FROM bot_status WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("read bot status"))?;

        record
            .map(BotStatus::from)
            .ok_or_else(|| StoreError::NotFound("bot status".to_string()))
    }

    async fn reset_daily_counter(&self, day: NaiveDate) -> StoreResult<()> {
        sqlx::query("UPDATE bot_status SET trades_today = 0, counter_date = ?1 WHERE id = 1")
            .bind(day)
            .execute(&self.pool)
            .await
            .map_err(query_error("reset daily counter"))?;
        Ok(())
    }

    async fn set_running(&self, running: bool) -> StoreResult<()> {
        sqlx::query("UPDATE bot_status SET running = ?1 WHERE id = 1")
            .bind(running)
            .execute(&self.pool)
            .await
            .map_err(query_error("update running flag"))?;
        Ok(())
    }

    async fn touch_last_check(&self, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE bot_status SET last_check_at = ?1 WHERE id = 1")
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(query_error("stamp last check"))?;
        Ok(())
    }
}
