//! Database Models
//!
//! Row shapes for accounts, positions, trades and the bot status, plus their
//! conversion into domain entities.

use crate::domain::entities::account::BotStatus;
use crate::domain::entities::position::{MarketType, Position, PositionSide};
use crate::domain::entities::trade::{ExitReason, Trade};
use crate::domain::errors::StoreError;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;

/// Position row
#[derive(Debug, Clone, FromRow)]
pub struct PositionRecord {
    pub id: String,
    pub user_id: i64,
    pub symbol: String,
    pub market_type: String, // "stock", "forex" or "crypto"
    pub side: String,        // "long" or "short"
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub entry_reason: String,
    pub opened_at: DateTime<Utc>,
}

impl TryFrom<PositionRecord> for Position {
    type Error = StoreError;

    fn try_from(record: PositionRecord) -> Result<Self, Self::Error> {
        Ok(Position {
            market_type: parse_column(&record.id, &record.market_type)?,
            side: parse_column(&record.id, &record.side)?,
            id: record.id,
            user_id: record.user_id,
            symbol: record.symbol,
            entry_price: record.entry_price,
            quantity: record.quantity,
            stop_loss: record.stop_loss,
            take_profit: record.take_profit,
            entry_reason: record.entry_reason,
            opened_at: record.opened_at,
        })
    }
}

/// Trade row
#[derive(Debug, Clone, FromRow)]
pub struct TradeRecord {
    pub id: String,
    pub position_id: String,
    pub user_id: i64,
    pub symbol: String,
    pub market_type: String,
    pub side: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub profit_loss: f64,
    pub profit_loss_percent: f64,
    pub entry_reason: String,
    pub exit_reason: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl TryFrom<TradeRecord> for Trade {
    type Error = StoreError;

    fn try_from(record: TradeRecord) -> Result<Self, Self::Error> {
        let market_type: MarketType = parse_column(&record.id, &record.market_type)?;
        let side: PositionSide = parse_column(&record.id, &record.side)?;
        Ok(Trade {
            exit_reason: ExitReason::from(record.exit_reason.as_str()),
            id: record.id,
            position_id: record.position_id,
            user_id: record.user_id,
            symbol: record.symbol,
            market_type,
            side,
            entry_price: record.entry_price,
            exit_price: record.exit_price,
            quantity: record.quantity,
            stop_loss: record.stop_loss,
            take_profit: record.take_profit,
            profit_loss: record.profit_loss,
            profit_loss_percent: record.profit_loss_percent,
            entry_reason: record.entry_reason,
            opened_at: record.opened_at,
            closed_at: record.closed_at,
        })
    }
}

/// The single bot_status row
#[derive(Debug, Clone, FromRow)]
pub struct BotStatusRecord {
    pub running: bool,
    pub trades_today: i64,
    pub counter_date: NaiveDate,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub last_check_at: Option<DateTime<Utc>>,
}

impl From<BotStatusRecord> for BotStatus {
    fn from(record: BotStatusRecord) -> Self {
        BotStatus {
            running: record.running,
            trades_today: u32::try_from(record.trades_today.max(0)).unwrap_or(u32::MAX),
            counter_date: record.counter_date,
            last_trade_at: record.last_trade_at,
            last_check_at: record.last_check_at,
        }
    }
}

fn parse_column<T>(row_id: &str, raw: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| StoreError::Decode(format!("row {}: {}", row_id, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(market_type: &str) -> PositionRecord {
        PositionRecord {
            id: "pos_1".to_string(),
            user_id: 1,
            symbol: "AAPL".to_string(),
            market_type: market_type.to_string(),
            side: "long".to_string(),
            entry_price: 100.0,
            quantity: 10.0,
            stop_loss: 97.5,
            take_profit: 105.0,
            entry_reason: String::new(),
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn test_position_record_conversion() {
        let position = Position::try_from(record("stock")).unwrap();
        assert_eq!(position.market_type, MarketType::Stock);
        assert_eq!(position.side, PositionSide::Long);
    }

    #[test]
    fn test_corrupt_market_type_is_a_decode_error() {
        let err = Position::try_from(record("bonds")).unwrap_err();
        assert!(matches!(err, StoreError::Decode(msg) if msg.contains("pos_1")));
    }
}
